//! Where the driver keeps its documents.
//!
//! Everything lives in one directory: the optional `VizConfig` (`config.json`), the
//! generated sweep (`sequence.json`, loadable with `Sequence::from_json`) and the
//! `SceneSnapshot` written when a replay ends or is interrupted.

use std::fs;
use std::path::PathBuf;

/// Overrides the platform data directory, e.g. `CONVVIZ_DATA_DIR=/tmp/viz`.
const DATA_DIR_VAR: &str = "CONVVIZ_DATA_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, String> {
        let data_dir = Self::get_data_dir()?;

        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory {:?}: {}", data_dir, e))?;

        Ok(Self { data_dir })
    }

    fn get_data_dir() -> Result<PathBuf, String> {
        if let Some(dir) = std::env::var_os(DATA_DIR_VAR).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let base = dirs::data_dir().ok_or("Could not determine data directory")?;
        Ok(base.join("convviz"))
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Optional `VizConfig`; `CONVVIZ_*` variables still win over it.
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Overwritten on every run so an external player can replay the same frames.
    pub fn sequence_file(&self) -> PathBuf {
        self.data_dir.join("sequence.json")
    }

    /// State of the scene at the last replayed frame.
    pub fn snapshot_file(&self) -> PathBuf {
        self.data_dir.join("snapshot.json")
    }
}

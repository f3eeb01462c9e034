//! Convviz driver - headless replay of the demo network
//!
//! Builds the demo scene, generates a sweep over every layer, replays it frame
//! by frame against an in-memory instance buffer and writes the sequence and a
//! final scene snapshot next to the config.
//!
//! Storage locations:
//! - Linux: ~/.local/share/convviz/
//! - Windows: %APPDATA%\convviz\
//! - MacOS: ~/Library/Application Support/convviz/
//! - anywhere else with `CONVVIZ_DATA_DIR`
//!
//! Usage: `vizd [--realtime]`. With `--realtime` frames are paced at the
//! sequence's fps.

use std::fs;
use std::process::ExitCode;
use std::time::Duration;

use convviz::observer::SceneAdapter;
use convviz::{InstanceBuffer, Scene, Sequence, VizConfig, VizError};
use thiserror::Error;
use tokio::time;
use tracing::{error, info, warn};

mod demo;
mod paths;

use paths::AppPaths;

#[derive(Debug, Error)]
enum VizdError {
    #[error("{0}")]
    Paths(String),
    #[error(transparent)]
    Viz(#[from] VizError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// `config.json` when present, then `CONVVIZ_*` environment overrides.
fn load_config(paths: &AppPaths) -> Result<VizConfig, VizdError> {
    let file = paths.config_file();
    let cfg = if file.exists() {
        let cfg: VizConfig = serde_json::from_str(&fs::read_to_string(&file)?)?;
        info!("Config loaded from {:?}", file);
        cfg
    } else {
        VizConfig::default()
    };
    Ok(cfg.apply_env())
}

struct Replay {
    frames: u32,
    rebuilds: u64,
}

async fn replay(
    scene: &mut Scene,
    sink: &mut InstanceBuffer,
    seq: &Sequence,
    realtime: bool,
) -> Result<Replay, VizdError> {
    let frame_time = Duration::from_millis((1000 / seq.fps.max(1)).max(1) as u64);
    let mut focus = None;
    let mut rebuilds = 0;
    for frame in 0..seq.frames {
        seq.apply(frame, scene)?;
        let report = scene.update(sink)?;
        if sink.take_rebuild() {
            rebuilds += 1;
        }
        if report.focus.is_some() && report.focus != focus {
            focus = report.focus;
            let snap = SceneAdapter::new(scene).snapshot();
            info!(
                "Frame {}: layer {:?} active, {} particles free",
                frame,
                snap.focus,
                snap.pool.free_positive + snap.pool.free_negative
            );
        }
        if realtime {
            time::sleep(frame_time).await;
        } else if frame % 64 == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok(Replay {
        frames: seq.frames,
        rebuilds,
    })
}

async fn run(realtime: bool) -> Result<(), VizdError> {
    let paths = AppPaths::new().map_err(VizdError::Paths)?;
    info!("Data directory: {:?}", paths.data_dir());
    let cfg = load_config(&paths)?;

    let mut sink = InstanceBuffer::new();
    let mut scene = demo::build(&mut sink, cfg)?;
    sink.build();
    scene.init(&mut sink)?;
    info!(
        "Scene ready: {} grids, {} layers, {} instances",
        scene.grids().len(),
        scene.layers().len(),
        sink.len()
    );

    let seq = demo::sweep(&scene, cfg.frames_per_step)?;
    fs::write(paths.sequence_file(), seq.to_json()?)?;
    info!("Sequence of {} frames saved to {:?}", seq.frames, paths.sequence_file());

    tokio::select! {
        done = replay(&mut scene, &mut sink, &seq, realtime) => {
            let done = done?;
            info!("Replayed {} frames, {} acceleration rebuilds", done.frames, done.rebuilds);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; writing snapshot of the current frame");
        }
    }

    let snapshot = SceneAdapter::new(&scene).snapshot();
    fs::write(paths.snapshot_file(), serde_json::to_string_pretty(&snapshot)?)?;
    info!("Snapshot saved to {:?}", paths.snapshot_file());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let realtime = std::env::args().skip(1).any(|a| a == "--realtime");
    match run(realtime).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

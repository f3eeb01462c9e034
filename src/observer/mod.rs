use crate::layer::{Layer, Phase};
use crate::pool::Polarity;
use crate::scene::{Camera, Scene};
use crate::window::Window;

#[cfg(feature = "serde")]
use serde::Serialize;

/// A read-only snapshot of what the scene is showing.
///
/// Design intent:
/// - Observers cannot mutate or steer the scene.
/// - Snapshotting is *on-demand* and can allocate; the frame loop stays unchanged.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SceneSnapshot {
    pub focus: Option<String>,
    pub layers: Vec<LayerSnapshot>,
    pub grids: Vec<GridSnapshot>,
    pub pool: PoolSnapshot,
    pub camera: Camera,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LayerSnapshot {
    pub name: String,
    pub kind: &'static str,
    pub phase: Phase,
    pub stage: f32,
    pub window: Window,
    pub visible: bool,
    /// Pre-bias sum of the active filter's bound window.
    pub sum: Option<f32>,
    pub particles: usize,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct GridSnapshot {
    pub name: String,
    pub dims: (usize, usize, usize),
    pub shown: bool,
    pub revealed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolSnapshot {
    pub reserved: usize,
    pub free_positive: usize,
    pub free_negative: usize,
    pub checked_out: usize,
}

pub struct SceneAdapter<'a> {
    scene: &'a Scene,
}

impl<'a> SceneAdapter<'a> {
    pub fn new(scene: &'a Scene) -> Self {
        Self { scene }
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        let pool = self.scene.pool();
        SceneSnapshot {
            focus: self
                .scene
                .focus()
                .and_then(|id| self.scene.layer(id))
                .map(|l| l.name().to_string()),
            layers: self.scene.layers().iter().map(layer_snapshot).collect(),
            grids: self
                .scene
                .grids()
                .iter()
                .map(|g| GridSnapshot {
                    name: g.name().to_string(),
                    dims: g.dims(),
                    shown: g.is_shown(),
                    revealed: g.revealed_count(),
                })
                .collect(),
            pool: PoolSnapshot {
                reserved: pool.reserved(Polarity::Positive) + pool.reserved(Polarity::Negative),
                free_positive: pool.free(Polarity::Positive),
                free_negative: pool.free(Polarity::Negative),
                checked_out: pool.checked_out(),
            },
            camera: self.scene.camera(),
        }
    }
}

fn layer_snapshot(layer: &Layer) -> LayerSnapshot {
    let state = layer.state();
    let filter = layer.active_filter();
    LayerSnapshot {
        name: layer.name().to_string(),
        kind: layer.kind().label(),
        phase: state.phase,
        stage: state.stage,
        window: state.window,
        visible: state.visible,
        sum: filter.and_then(|f| f.sum()),
        particles: filter.map_or(0, |f| f.particle_count()),
        dirty: layer.is_dirty(),
    }
}

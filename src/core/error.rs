use thiserror::Error;

use crate::pool::Polarity;

/// Configuration and usage faults.
///
/// None of these are recoverable at runtime: they mean the scene was wired up
/// wrongly or the visualization drifted away from the numbers it is showing.
/// Conditions driven by continuous input (stage, transition fractions, scale
/// magnitude) are clamped instead and never show up here.
#[derive(Debug, Error)]
pub enum VizError {
    #[error("shape {shape:?} needs {expected} values, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("filter has {weights} weights but the window supplies {sources} sources")]
    WeightCountMismatch { sources: usize, weights: usize },

    #[error(
        "recomputed value {computed} diverges from ground truth {expected} at {layer} window {window} (tolerance {tolerance})"
    )]
    Divergence {
        layer: String,
        window: String,
        computed: f64,
        expected: f64,
        tolerance: f64,
    },

    #[error("window {window} is outside the bounds of layer '{layer}'")]
    WindowOutOfBounds { layer: String, window: String },

    #[error("{0:?} particles over-allocation")]
    PoolExhausted(Polarity),

    #[error("particle {polarity:?}#{slot} is not checked out")]
    ParticleNotCheckedOut { polarity: Polarity, slot: u32 },

    #[error("position magnitude {magnitude} exceeds bound {bound}")]
    PositionOutOfBounds { magnitude: f32, bound: f32 },

    #[error("acceleration structure used before it was built")]
    AccelerationNotBuilt,

    #[error("unknown instance {0}")]
    UnknownInstance(u32),

    #[error("unknown grid {0}")]
    UnknownGrid(usize),

    #[error("layer input and output must be different grids (both {0})")]
    GridAliasing(usize),

    #[error("unknown track '{0}'")]
    UnknownTrack(String),

    #[error("layer '{0}' has no filters")]
    EmptyLayer(String),

    #[error("a layer named '{0}' already exists")]
    DuplicateLayer(String),
}

pub type Result<T> = core::result::Result<T, VizError>;

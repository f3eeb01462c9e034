//! Procedural animation of a small convolutional network's forward pass.
//!
//! Scalars are cubes, each weight × input contribution is a cloud of particles,
//! and one scalar stage per layer drives everything that moves.

#[path = "core/math.rs"]
pub mod math;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/render.rs"]
pub mod render;

#[path = "core/pool.rs"]
pub mod pool;

#[path = "core/particle.rs"]
pub mod particle;

#[path = "core/curve.rs"]
pub mod curve;

#[path = "core/cell.rs"]
pub mod cell;

#[path = "core/tensor.rs"]
pub mod tensor;

#[path = "core/window.rs"]
pub mod window;

#[path = "core/grid.rs"]
pub mod grid;

#[path = "core/filter.rs"]
pub mod filter;

#[path = "core/layer.rs"]
pub mod layer;

#[path = "core/scene.rs"]
pub mod scene;

#[path = "core/sequence.rs"]
pub mod sequence;

pub mod observer;

pub use config::VizConfig;
pub use error::{Result, VizError};
pub use layer::{ConvParams, Layer, LayerState, Phase};
pub use render::{InstanceBuffer, InstanceSink};
pub use scene::Scene;
pub use sequence::Sequence;
pub use tensor::Tensor;

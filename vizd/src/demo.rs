//! The demo network: conv → avg-pool → ReLU → dense → sigmoid over a 6×6×2 input.
//!
//! Ground truth for every grid comes from the reference forward pass, so the
//! scene's own recomputation is checked against it window by window.

use convviz::grid::GridLayout;
use convviz::math::Vec3;
use convviz::tensor::{avg_pool, conv2d, Tensor};
use convviz::{ConvParams, InstanceSink, Result, Scene, Sequence, VizConfig};

/// Layer names in network order.
pub const LAYERS: [&str; 5] = ["conv", "pool", "relu", "dense", "sigmoid"];

const GAP: f32 = 4.0;

fn pattern(shape: Vec<usize>, mul: usize, modulo: usize, centre: f32, gain: f32) -> Tensor {
    Tensor::from_fn(shape, |i| {
        ((i * mul) % modulo) as f32 / modulo as f32 - centre
    })
    .map(|v| v * gain)
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Stacks grids upwards, centring each over the input footprint.
struct Stacker {
    y: f32,
    width: f32,
}

impl Stacker {
    fn next(&mut self, tensor: &Tensor) -> GridLayout {
        let (w, h, d) = tensor.dims3();
        let layout = GridLayout::new(Vec3::ZERO);
        let origin = Vec3::new(
            (self.width - (w as f32 - 1.0) * layout.spacing) * 0.5,
            self.y,
            (self.width - (h as f32 - 1.0) * layout.spacing) * 0.5,
        );
        self.y += d as f32 * layout.layer_spacing + GAP;
        GridLayout { origin, ..layout }
    }
}

pub fn build(sink: &mut dyn InstanceSink, cfg: VizConfig) -> Result<Scene> {
    let input = pattern(vec![2, 6, 6], 37, 23, 0.45, 0.8);
    let conv_w = pattern(vec![2, 2, 3, 3], 11, 13, 0.5, 0.6);
    let conv_b = vec![0.05, -0.08];
    let dense_w = pattern(vec![3, 2, 2, 2], 5, 7, 0.4, 0.9);
    let dense_b = vec![0.1, 0.0, -0.1];

    let conv = conv2d(&input, &conv_w, &conv_b, 1)?;
    let pooled = avg_pool(&conv, 2)?;
    let relu = pooled.map(|v| v.max(0.0));
    let dense = conv2d(&relu, &dense_w, &dense_b, 1)?;
    let probs = dense.map(sigmoid);

    let mut stack = Stacker {
        y: 0.0,
        width: 5.0 * GridLayout::new(Vec3::ZERO).spacing,
    };
    let mut scene = Scene::new(sink, cfg);
    let g_in = scene.add_grid(sink, "input", &input, stack.next(&input))?;
    let g_conv = scene.add_grid(sink, "conv", &conv, stack.next(&conv))?;
    let g_pool = scene.add_grid(sink, "pool", &pooled, stack.next(&pooled))?;
    let g_relu = scene.add_grid(sink, "relu", &relu, stack.next(&relu))?;
    let g_dense = scene.add_grid(sink, "dense", &dense, stack.next(&dense).axes())?;
    let g_probs = scene.add_grid(sink, "sigmoid", &probs, stack.next(&probs).axes())?;

    scene.add_conv(sink, LAYERS[0], g_in, g_conv, &ConvParams::new(conv_w, conv_b, 1))?;
    scene.add_avg_pool(sink, LAYERS[1], g_conv, g_pool, 2)?;
    scene.add_transition(LAYERS[2], g_pool, g_relu)?;
    scene.add_conv(sink, LAYERS[3], g_relu, g_dense, &ConvParams::new(dense_w, dense_b, 1))?;
    scene.add_transition(LAYERS[4], g_dense, g_probs)?;
    Ok(scene)
}

/// Every layer swept in network order.
pub fn sweep(scene: &Scene, frames_per_step: u32) -> Result<Sequence> {
    let mut seq = Sequence::default();
    for layer in LAYERS {
        seq.append(&Sequence::full_sweep(scene, layer, frames_per_step)?);
    }
    Ok(seq)
}

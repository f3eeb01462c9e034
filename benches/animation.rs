//! Criterion benchmarks for the animation core.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use convviz::cell::split_volume;
use convviz::grid::GridLayout;
use convviz::math::Vec3;
use convviz::prng::Prng;
use convviz::tensor::{conv2d, Tensor};
use convviz::{ConvParams, InstanceBuffer, Scene, VizConfig};

fn conv_scene(sink: &mut InstanceBuffer, particles_per_size: f32) -> Scene {
    let cfg = VizConfig::default()
        .with_particles_per_size(particles_per_size)
        .with_particle_reserve(8192);
    let mut scene = Scene::new(sink, cfg);
    let input = Tensor::from_fn(vec![3, 8, 8], |i| ((i * 13) % 17) as f32 / 17.0 - 0.3);
    let weights = Tensor::from_fn(vec![4, 3, 3, 3], |i| ((i * 7) % 11) as f32 / 11.0 - 0.5);
    let bias = vec![0.05; 4];
    let output = conv2d(&input, &weights, &bias, 1).expect("valid conv");
    let g0 = scene
        .add_grid(sink, "in", &input, GridLayout::new(Vec3::ZERO))
        .expect("input grid");
    let g1 = scene
        .add_grid(sink, "out", &output, GridLayout::new(Vec3::new(0.0, 10.0, 0.0)))
        .expect("output grid");
    scene
        .add_conv(sink, "conv", g0, g1, &ConvParams::new(weights, bias, 1))
        .expect("conv layer");
    sink.build();
    scene.init(sink).expect("init");
    scene
}

/// Benchmark split() with varying point counts.
fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");

    for n in [8usize, 64, 512, 4096].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            let mut rng = Prng::new(7);
            b.iter(|| black_box(split_volume(0.8, 0.6, n, &mut rng).points.len()));
        });
    }

    group.finish();
}

/// Benchmark one frame of a stage sweep through the flow range, per particle density.
fn bench_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("advance");

    for pps in [16.0f32, 64.0, 256.0].iter() {
        group.bench_with_input(BenchmarkId::new("flow", pps), pps, |b, &pps| {
            let mut sink = InstanceBuffer::new();
            let mut scene = conv_scene(&mut sink, pps);
            let mut frame = 0u32;
            b.iter(|| {
                // Stays inside [3, 4) so the flow is built once and then only redrawn.
                let stage = 3.0 + (frame % 97) as f32 / 100.0;
                frame = frame.wrapping_add(1);
                scene.set_track("conv: Time", stage).expect("track");
                let report = scene.update(&mut sink).expect("update");
                sink.take_rebuild();
                black_box(report.changed.len())
            });
        });
    }

    // Full window change: recompute, teardown, rebuild.
    group.bench_function("window_step", |b| {
        let mut sink = InstanceBuffer::new();
        let mut scene = conv_scene(&mut sink, 64.0);
        let mut x = 0u32;
        b.iter(|| {
            x = (x + 1) % 6;
            scene.set_track("conv: X", x as f32).expect("track");
            scene.set_track("conv: Time", 3.5).expect("track");
            black_box(scene.update(&mut sink).expect("update").changed.len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_split, bench_advance);
criterion_main!(benches);

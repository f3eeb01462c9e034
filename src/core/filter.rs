//! Computation and animation of one window at one output depth.
//!
//! A filter owns one weight cell per kernel weight and a transient result cell. It is
//! bound to a window by [`Filter::recompute`], which gathers the sources, checks the
//! sum against the ground-truth output cell and records every pose the animation
//! needs. [`Filter::advance`] is then a pure function of the stage:
//!
//! | stage    | phase                                                        |
//! |----------|--------------------------------------------------------------|
//! | `[0, 1)` | weights shrink back from the previous window's contribution  |
//! | `[1, 2)` | weights hop to the new window (lift, slide, drop)            |
//! | `[2, 3)` | weights scale to `source × weight`                           |
//! | `[3, 4)` | particles flow: opposite pairs merge, the excess builds the result |
//! | `[4, 5)` | the built result grows by the bias                           |
//! | `5`      | result handed over to the output grid                        |

use crate::cell::{split_volume, Cell, CellProps};
use crate::config::VizConfig;
use crate::curve::{Curve, Path};
use crate::error::{Result, VizError};
use crate::grid::Grid;
use crate::math::{lerp, Transform, Vec3};
use crate::particle::Particle;
use crate::pool::{ParticlePool, Polarity};
use crate::prng::Prng;
use crate::render::InstanceSink;
use crate::tensor::{weighted_sum, KernelShape, Tensor};
use crate::window::Window;

pub const VALUE_UNSCALE: f32 = 1.0;
pub const VALUE_MOVE: f32 = 2.0;
pub const VALUE_SCALE: f32 = 3.0;
pub const VALUE_MERGE: f32 = 4.0;
pub const VALUE_BIAS: f32 = 5.0;

pub const STAGE_MIN: f32 = 0.0;
pub const STAGE_MAX: f32 = VALUE_BIAS;

/// Share of a particle's flight spent fading in.
const SHOW_RAMP: f32 = 0.01;
/// Local time at which the arrival visual starts to take over.
const FILLER_START: f32 = 0.9;
/// Fillers are drawn slightly larger than their slot so they never z-fight the cell.
const FILLER_OVERLAP: f32 = 1.01;
/// Lift / slide / drop shares of the move phase.
const MOVE_SPLIT: [f32; 3] = [0.2, 0.6, 0.2];

/// Static weights of one output depth, kernel order `[in, kh, kw]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterWeights {
    pub in_depth: usize,
    pub height: usize,
    pub width: usize,
    pub values: Vec<f32>,
    pub bias: f32,
}

impl FilterWeights {
    /// Output depth `out` of conv weights `[out, in, kh, kw]`.
    pub fn from_conv(weights: &Tensor, bias: &[f32], out: usize) -> Result<Self> {
        let k = KernelShape::of(weights)?;
        if out >= k.out_depth || bias.len() != k.out_depth {
            return Err(VizError::ShapeMismatch {
                shape: weights.shape().to_vec(),
                expected: k.out_depth,
                actual: bias.len(),
            });
        }
        let per = k.per_filter();
        Ok(Self {
            in_depth: k.in_depth,
            height: k.height,
            width: k.width,
            values: weights.values()[out * per..(out + 1) * per].to_vec(),
            bias: bias[out],
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(dx, dy, z)` of weight `i` inside the kernel.
    pub fn offset(&self, i: usize) -> (usize, usize, usize) {
        let plane = self.width * self.height;
        (i % self.width, (i % plane) / self.width, i / plane)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pose {
    position: Vec3,
    scale: f32,
    ref_scale: f32,
}

#[derive(Debug, Clone)]
struct WeightMotion {
    from: Pose,
    to: Vec3,
    path: Path,
    source: f32,
    weight: f32,
}

impl WeightMotion {
    fn contribution(&self) -> f32 {
        self.source * self.weight
    }

    /// Pose once the contribution is fully shown.
    fn settled(&self) -> Pose {
        Pose {
            position: self.to,
            scale: self.contribution(),
            ref_scale: self.source.abs(),
        }
    }

    fn pose(&self, stage: f32) -> Pose {
        if stage < VALUE_UNSCALE {
            Pose {
                position: self.from.position,
                scale: lerp(self.from.scale, self.weight, stage),
                ref_scale: lerp(self.from.ref_scale, 0.0, stage),
            }
        } else if stage < VALUE_MOVE {
            Pose {
                position: self.path.evaluate(stage - VALUE_UNSCALE),
                scale: self.weight,
                ref_scale: 0.0,
            }
        } else if stage < VALUE_SCALE {
            let t = stage - VALUE_MOVE;
            Pose {
                position: self.to,
                scale: lerp(self.weight, self.contribution(), t),
                ref_scale: lerp(0.0, self.source.abs(), t),
            }
        } else {
            self.settled()
        }
    }
}

fn move_path(from: Vec3, to: Vec3, lift: f32) -> Path {
    if from == to {
        return Path::new(vec![(1.0, Curve::eased(to, to))]);
    }
    let up = Vec3::new(0.0, lift, 0.0);
    Path::new(vec![
        (MOVE_SPLIT[0], Curve::eased(from, from + up)),
        (MOVE_SPLIT[1], Curve::eased(from + up, to + up)),
        (MOVE_SPLIT[2], Curve::eased(to + up, to)),
    ])
}

fn merge_curve(from: Vec3, meet: Vec3) -> Curve {
    Curve::new(from, from.with_y(meet.y), meet, meet)
}

fn construction_curve(from: Vec3, to: Vec3) -> Curve {
    Curve::new(
        from,
        from + (to - from) * 0.1,
        to - Vec3::new(0.0, 0.5, 0.0),
        to,
    )
}

/// Everything recompute derived for the current window.
#[derive(Debug, Clone)]
struct Binding {
    window: Window,
    motions: Vec<WeightMotion>,
    /// Pre-bias sum.
    sum: f32,
    /// Ground-truth output value.
    value: f32,
    /// Result cube at the pre-bias sum: what the construction particles fill.
    build_body: Transform,
    build_extents: Vec3,
    dst_position: Vec3,
    salt: u64,
}

#[derive(Debug)]
struct FlowParticle {
    particle: Particle,
    /// Carries the flight start as its time offset.
    curve: Curve,
    depth: usize,
    filler_scale: Vec3,
}

struct Launch {
    polarity: Polarity,
    splashing: bool,
    curve: Curve,
    depth: usize,
    filler_scale: Vec3,
    flight: usize,
}

#[derive(Debug)]
pub struct Filter {
    index: usize,
    weights: FilterWeights,
    cfg: VizConfig,
    cells: Vec<Cell>,
    result: Cell,
    binding: Option<Binding>,
    flow: Option<Vec<FlowParticle>>,
    stage: f32,
    hidden: bool,
    depth_hidden: Vec<bool>,
}

impl Filter {
    /// Register the weight and result cells. Cells start over `input`'s first window
    /// and stay hidden until the filter is shown and bound.
    pub fn new(
        sink: &mut dyn InstanceSink,
        index: usize,
        weights: FilterWeights,
        input: &Grid,
        cfg: &VizConfig,
    ) -> Result<Self> {
        let lift = Vec3::new(0.0, cfg.weight_lift, 0.0);
        let mut cells = Vec::with_capacity(weights.len());
        for (i, w) in weights.values.iter().enumerate() {
            let (dx, dy, z) = weights.offset(i);
            let position = input.layout().position(dx, dy, z) + lift;
            cells.push(Cell::new(
                sink,
                CellProps::new(*w, position).with_reference(),
                cfg,
            )?);
        }
        let result = Cell::new(
            sink,
            CellProps::new(0.0, input.layout().origin).construction(),
            cfg,
        )?;
        Ok(Self {
            index,
            depth_hidden: vec![false; weights.in_depth],
            weights,
            cfg: *cfg,
            cells,
            result,
            binding: None,
            flow: None,
            stage: STAGE_MIN,
            hidden: true,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn weights(&self) -> &FilterWeights {
        &self.weights
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn result_cell(&self) -> &Cell {
        &self.result
    }

    pub fn stage(&self) -> f32 {
        self.stage
    }

    pub fn window(&self) -> Option<Window> {
        self.binding.as_ref().map(|b| b.window)
    }

    /// Pre-bias sum of the bound window.
    pub fn sum(&self) -> Option<f32> {
        self.binding.as_ref().map(|b| b.sum)
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_depth_hidden(&self, depth: usize) -> bool {
        self.depth_hidden.get(depth).copied().unwrap_or(false)
    }

    /// Particles currently checked out by the flow.
    pub fn particle_count(&self) -> usize {
        self.flow.as_ref().map_or(0, Vec::len)
    }

    /// Bind to `window` and validate it against the ground truth in `output`.
    ///
    /// Any running flow is torn down first. The new binding remembers where each
    /// weight settled in the previous window so the unscale and move phases start
    /// from there.
    #[allow(clippy::too_many_arguments)]
    pub fn recompute(
        &mut self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
        layer: &str,
        window: Window,
        stride: usize,
        input: &Grid,
        output: &Grid,
    ) -> Result<()> {
        let stride = stride.max(1);
        let (x0, y0) = (window.x * stride, window.y * stride);
        let sources = input.range(
            x0..=x0 + self.weights.width.saturating_sub(1),
            y0..=y0 + self.weights.height.saturating_sub(1),
        );
        if sources.len() != self.weights.len() {
            return Err(VizError::WeightCountMismatch {
                sources: sources.len(),
                weights: self.weights.len(),
            });
        }
        let dst = output
            .glyph(window.x, window.y, window.z)
            .ok_or_else(|| VizError::WindowOutOfBounds {
                layer: layer.to_string(),
                window: window.to_string(),
            })?;

        let values: Vec<f32> = sources.iter().map(|g| g.value()).collect();
        let sum = weighted_sum(&values, &self.weights.values);
        let computed = sum + f64::from(self.weights.bias);
        let expected = f64::from(dst.value());
        let tolerance = f64::from(self.cfg.divergence_tolerance);
        // Written so NaN fails too.
        if !((computed - expected).abs() <= tolerance) {
            return Err(VizError::Divergence {
                layer: layer.to_string(),
                window: window.to_string(),
                computed,
                expected,
                tolerance,
            });
        }

        self.teardown(sink, pool)?;

        let lift = Vec3::new(0.0, self.cfg.weight_lift, 0.0);
        let previous = self.binding.take();
        let motions = sources
            .iter()
            .zip(values)
            .zip(&self.weights.values)
            .enumerate()
            .map(|(i, ((glyph, source), weight))| {
                let to = glyph.position() + lift;
                let from = match &previous {
                    Some(prev) => prev.motions[i].settled(),
                    None => Pose {
                        position: to,
                        scale: *weight,
                        ref_scale: 0.0,
                    },
                };
                WeightMotion {
                    from,
                    to,
                    path: move_path(from.position, to, self.cfg.move_lift),
                    source,
                    weight: *weight,
                }
            })
            .collect();

        let dst_position = dst.primary().position();
        let sum = sum as f32;
        self.binding = Some(Binding {
            window,
            motions,
            sum,
            value: dst.value(),
            build_body: self.result.body_at(dst_position, sum),
            build_extents: self.result.extents_at(sum),
            dst_position,
            salt: window.salt() ^ ((self.index as u64) << 56),
        });
        tracing::debug!(
            "{} filter {} bound to {}: sum {:.6} + bias {:.6} = {:.6}",
            layer,
            self.index,
            window,
            sum,
            self.weights.bias,
            expected
        );
        Ok(())
    }

    /// Draw the bound window at `stage` (clamped to `[STAGE_MIN, STAGE_MAX]`).
    ///
    /// Repeated calls with the same stage write identical transforms. The output
    /// cell of the window is revealed exactly when the stage reaches
    /// [`VALUE_BIAS`].
    pub fn advance(
        &mut self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
        output: &mut Grid,
        stage: f32,
    ) -> Result<()> {
        self.stage = if stage.is_nan() {
            STAGE_MIN
        } else {
            stage.clamp(STAGE_MIN, STAGE_MAX)
        };
        self.redraw(sink, pool)?;
        if let Some(b) = &self.binding {
            let w = b.window;
            output.set_revealed(sink, w.x, w.y, w.z, self.stage >= VALUE_BIAS)?;
        }
        Ok(())
    }

    /// Set visibility flags without drawing; the next `advance` applies them.
    pub fn set_visibility(&mut self, visible: bool, depth_visible: &[bool]) {
        self.hidden = !visible;
        for (hidden, visible) in self.depth_hidden.iter_mut().zip(depth_visible) {
            *hidden = !*visible;
        }
    }

    pub fn hide(&mut self, sink: &mut dyn InstanceSink, pool: &mut ParticlePool) -> Result<()> {
        self.hidden = true;
        self.redraw(sink, pool)
    }

    pub fn show(&mut self, sink: &mut dyn InstanceSink, pool: &mut ParticlePool) -> Result<()> {
        self.hidden = false;
        self.redraw(sink, pool)
    }

    pub fn hide_depth(
        &mut self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
        depth: usize,
    ) -> Result<()> {
        if let Some(h) = self.depth_hidden.get_mut(depth) {
            *h = true;
        }
        self.redraw(sink, pool)
    }

    pub fn show_depth(
        &mut self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
        depth: usize,
    ) -> Result<()> {
        if let Some(h) = self.depth_hidden.get_mut(depth) {
            *h = false;
        }
        self.redraw(sink, pool)
    }

    fn redraw(&mut self, sink: &mut dyn InstanceSink, pool: &mut ParticlePool) -> Result<()> {
        let Some(binding) = self.binding.as_ref() else {
            for cell in &mut self.cells {
                cell.set_hidden(sink, true)?;
            }
            return self.result.set_hidden(sink, true);
        };
        let stage = self.stage;

        for (i, (cell, motion)) in self.cells.iter_mut().zip(&binding.motions).enumerate() {
            let (_, _, z) = self.weights.offset(i);
            let pose = motion.pose(stage);
            let hidden = self.hidden || self.depth_hidden[z];
            cell.place(sink, pose.position, pose.scale, Some(pose.ref_scale), hidden)?;
        }

        let building = (VALUE_SCALE..VALUE_BIAS).contains(&stage);
        let scale = if stage < VALUE_MERGE {
            0.0
        } else {
            lerp(binding.sum, binding.value, stage - VALUE_MERGE)
        };
        let dst_position = binding.dst_position;
        self.result.set_marker(sink, building)?;
        self.result
            .place(sink, dst_position, scale, None, self.hidden || !building)?;

        if self.hidden || !(VALUE_SCALE..VALUE_MERGE).contains(&stage) {
            return self.teardown(sink, pool);
        }
        if self.flow.is_none() {
            let flow = self.build_flow(sink, pool)?;
            tracing::debug!("Filter {} flow built with {} particles", self.index, flow.len());
            self.flow = Some(flow);
        }
        self.draw_flow(sink, pool)
    }

    fn flight(&self) -> f32 {
        self.cfg.flight_fraction.clamp(f32::EPSILON, 1.0)
    }

    /// Split every weight cell into particles and route them.
    ///
    /// Must run with the weight cells in their settled pose; all randomness comes
    /// from a PRNG seeded by the binding, so rebuilding yields the same flow.
    fn build_flow(
        &self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
    ) -> Result<Vec<FlowParticle>> {
        let Some(binding) = self.binding.as_ref() else {
            return Ok(Vec::new());
        };
        let cfg = &self.cfg;
        let mut rng = Prng::derive(cfg.seed, binding.salt);

        let mut positive = Vec::new();
        let mut negative = Vec::new();
        for (i, (cell, motion)) in self.cells.iter().zip(&binding.motions).enumerate() {
            let c = motion.contribution();
            let n = (c.abs() * cfg.particles_per_size).round() as usize;
            if c == 0.0 || n == 0 {
                continue;
            }
            let (_, _, z) = self.weights.offset(i);
            let split = cell.split(n, &mut rng);
            let bucket = if c > 0.0 { &mut positive } else { &mut negative };
            bucket.extend(split.points.iter().map(|p| (cell.world_point(*p), z)));
        }

        let pairs = positive.len().min(negative.len());
        let (excess, polarity) = if positive.len() >= negative.len() {
            (&positive[pairs..], Polarity::Positive)
        } else {
            (&negative[pairs..], Polarity::Negative)
        };

        let mut launches = Vec::with_capacity(2 * pairs + excess.len());
        for (k, (&(a, za), &(b, zb))) in positive.iter().zip(&negative).enumerate() {
            let meet = ((a + b) * 0.5).with_y(a.y.max(b.y) + cfg.merge_height);
            for (polarity, from, depth) in [(Polarity::Positive, a, za), (Polarity::Negative, b, zb)] {
                launches.push(Launch {
                    polarity,
                    splashing: true,
                    curve: merge_curve(from, meet),
                    depth,
                    filler_scale: Vec3::ZERO,
                    flight: k,
                });
            }
        }
        if !excess.is_empty() {
            let ext = binding.build_extents;
            let split = split_volume(ext.x, ext.y, excess.len(), &mut rng);
            let filler_scale =
                Vec3::new(split.width, split.height, split.width).mul_elem(ext) * FILLER_OVERLAP;
            for (k, (&(from, depth), local)) in excess.iter().zip(&split.points).enumerate() {
                launches.push(Launch {
                    polarity,
                    splashing: false,
                    curve: construction_curve(from, binding.build_body.transform_point(*local)),
                    depth,
                    filler_scale,
                    flight: pairs + k,
                });
            }
        }

        // Fixed stagger by flight index plus seeded jitter; a merging pair shares one
        // flight so both halves meet at the same time.
        let flights = pairs + excess.len();
        let d = self.flight();
        let starts: Vec<f32> = (0..flights)
            .map(|k| {
                let stagger = (1.0 - d) * k as f32 / flights.saturating_sub(1).max(1) as f32;
                let jitter = cfg.time_offset * rng.centered();
                (stagger + jitter).clamp(0.0, 1.0 - d)
            })
            .collect();

        let mut flow: Vec<FlowParticle> = Vec::with_capacity(launches.len());
        for launch in launches {
            match Particle::acquire(pool, launch.polarity, launch.splashing) {
                Ok(particle) => flow.push(FlowParticle {
                    particle,
                    curve: launch.curve.with_time_offset(starts[launch.flight]),
                    depth: launch.depth,
                    filler_scale: launch.filler_scale,
                }),
                Err(e) => {
                    for fp in flow {
                        fp.particle.retire(pool, sink)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(flow)
    }

    fn draw_flow(&self, sink: &mut dyn InstanceSink, pool: &ParticlePool) -> Result<()> {
        let Some(flow) = self.flow.as_ref() else {
            return Ok(());
        };
        let u = self.stage - VALUE_SCALE;
        let d = self.flight();
        for fp in flow {
            if self.is_depth_hidden(fp.depth) {
                fp.particle.hide(pool, sink)?;
                continue;
            }
            let tau = fp.curve.local_time(u, d);
            let show = tau / SHOW_RAMP;
            let filler = (tau - FILLER_START) * 10.0;
            fp.particle.place(
                pool,
                sink,
                &self.cfg,
                fp.curve.evaluate(tau),
                filler,
                fp.filler_scale,
                show,
            )?;
        }
        Ok(())
    }

    /// Hide every flow particle and hand it back to the pool.
    fn teardown(&mut self, sink: &mut dyn InstanceSink, pool: &mut ParticlePool) -> Result<()> {
        let Some(flow) = self.flow.take() else {
            return Ok(());
        };
        let mut outcome = Ok(());
        for fp in flow {
            let retired = fp.particle.retire(pool, sink);
            if outcome.is_ok() {
                outcome = retired;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use crate::render::{InstanceBuffer, ModelKind};
    use crate::tensor::conv2d;

    const PARTICLE_MODELS: [ModelKind; 5] = [
        ModelKind::ParticlePositive,
        ModelKind::ParticleNegative,
        ModelKind::ParticlePositiveShell,
        ModelKind::ParticleNegativeShell,
        ModelKind::Filler,
    ];

    struct Rig {
        sink: InstanceBuffer,
        pool: ParticlePool,
        input: Grid,
        output: Grid,
        filter: Filter,
    }

    /// 3×3 ones convolved with a 2×2 kernel whose contributions are
    /// `[0.5, -0.25, 0.25, 0]`: 6 positive and 2 negative particles at 8 per unit.
    fn rig(output_nudge: f32) -> Rig {
        let cfg = VizConfig::default()
            .with_particles_per_size(8.0)
            .with_particle_reserve(64);
        let mut sink = InstanceBuffer::new();
        let data = Tensor::new(vec![1, 3, 3], vec![1.0; 9]).unwrap();
        let weights = Tensor::new(vec![1, 1, 2, 2], vec![0.5, -0.25, 0.25, 0.0]).unwrap();
        let bias = [0.1];
        let mut truth = conv2d(&data, &weights, &bias, 1).unwrap();
        if output_nudge != 0.0 {
            let mut values = truth.values().to_vec();
            values[0] += output_nudge;
            truth = Tensor::new(truth.shape().to_vec(), values).unwrap();
        }

        let input =
            Grid::from_tensor(&mut sink, "in", &data, GridLayout::new(Vec3::ZERO), &cfg).unwrap();
        let output = Grid::from_tensor(
            &mut sink,
            "out",
            &truth,
            GridLayout::new(Vec3::new(0.75, 8.0, 0.75)),
            &cfg,
        )
        .unwrap();
        let filter = Filter::new(
            &mut sink,
            0,
            FilterWeights::from_conv(&weights, &bias, 0).unwrap(),
            &input,
            &cfg,
        )
        .unwrap();
        let pool = ParticlePool::reserve(&mut sink, cfg.particle_reserve);
        sink.build();
        Rig {
            sink,
            pool,
            input,
            output,
            filter,
        }
    }

    impl Rig {
        fn bind(&mut self, window: Window) -> Result<()> {
            self.filter.recompute(
                &mut self.sink,
                &mut self.pool,
                "conv",
                window,
                1,
                &self.input,
                &self.output,
            )
        }

        fn advance(&mut self, stage: f32) {
            self.filter
                .advance(&mut self.sink, &mut self.pool, &mut self.output, stage)
                .unwrap();
        }

        fn visible_particles(&self) -> Vec<String> {
            let mut out: Vec<String> = (0..self.sink.len() as u32)
                .filter_map(|id| self.sink.instance(id))
                .filter(|i| PARTICLE_MODELS.contains(&i.model) && !i.transform.is_hidden())
                .map(|i| format!("{:?} {:?}", i.model, i.transform))
                .collect();
            out.sort();
            out
        }
    }

    #[test]
    fn advance_is_idempotent_at_every_stage() {
        let mut r = rig(0.0);
        r.bind(Window::new(0, 0, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();
        for stage in [-1.0, 0.0, 0.5, 1.3, 2.5, 3.0, 3.2, 3.7, 3.99, 4.5, 5.0, 9.0] {
            r.advance(stage);
            let first = r.sink.tlas().unwrap().to_vec();
            r.advance(stage);
            assert_eq!(first, r.sink.tlas().unwrap(), "stage {stage}");
        }
    }

    #[test]
    fn diverging_ground_truth_is_rejected() {
        let mut r = rig(1.0e-3);
        assert!(matches!(
            r.bind(Window::new(0, 0, 0)),
            Err(VizError::Divergence { .. })
        ));
        // Other windows still agree.
        assert!(r.bind(Window::new(1, 1, 0)).is_ok());
    }

    #[test]
    fn source_count_must_match_weights() {
        let mut r = rig(0.0);
        let cfg = VizConfig::default();
        let deep = Tensor::new(vec![2, 3, 3], vec![1.0; 18]).unwrap();
        r.input =
            Grid::from_tensor(&mut r.sink, "deep", &deep, GridLayout::new(Vec3::ZERO), &cfg)
                .unwrap();
        assert!(matches!(
            r.bind(Window::new(0, 0, 0)),
            Err(VizError::WeightCountMismatch {
                sources: 8,
                weights: 4
            })
        ));
    }

    #[test]
    fn flow_pairs_opposite_particles_and_returns_them() {
        let mut r = rig(0.0);
        r.bind(Window::new(0, 0, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();

        r.advance(3.5);
        // 2 merging pairs + 4 construction particles.
        assert_eq!(r.filter.particle_count(), 8);
        assert_eq!(r.pool.checked_out(), 8);
        assert_eq!(r.pool.free(Polarity::Negative), 64 - 2);

        r.advance(4.5);
        assert_eq!(r.filter.particle_count(), 0);
        assert_eq!(r.pool.checked_out(), 0);
        assert_eq!(r.pool.free(Polarity::Positive), r.pool.reserved(Polarity::Positive));
    }

    #[test]
    fn reentering_the_flow_rebuilds_the_same_picture() {
        let mut r = rig(0.0);
        r.bind(Window::new(1, 0, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();

        r.advance(3.6);
        let first = r.visible_particles();
        assert!(!first.is_empty());
        r.advance(2.0);
        assert!(r.visible_particles().is_empty());
        r.advance(3.6);
        assert_eq!(first, r.visible_particles());
    }

    #[test]
    fn commit_reveals_the_output_cell() {
        let mut r = rig(0.0);
        r.bind(Window::new(0, 1, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();

        r.advance(4.5);
        assert!(!r.output.is_revealed(0, 1, 0));
        assert!(!r.filter.result_cell().is_hidden());
        assert!(r.filter.result_cell().has_marker());
        assert!((r.filter.result_cell().scale() - 0.55).abs() < 1e-6);

        r.advance(5.0);
        assert!(r.output.is_revealed(0, 1, 0));
        assert!(r.filter.result_cell().is_hidden());
    }

    #[test]
    fn construction_fills_the_cube_it_hands_over() {
        let mut r = rig(0.0);
        r.bind(Window::new(0, 0, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();

        r.advance(3.999);
        let fillers: Vec<Transform> = (0..r.sink.len() as u32)
            .filter_map(|id| r.sink.instance(id))
            .filter(|i| i.model == ModelKind::Filler && !i.transform.is_hidden())
            .map(|i| i.transform)
            .collect();
        assert_eq!(fillers.len(), 4);

        // Sum 0.5, not the biased 0.6 of the output cell.
        r.advance(4.0);
        let cube = r.filter.result_cell();
        assert!((cube.scale() - 0.5).abs() < 1e-6);
        let (centre, ext) = (cube.position(), cube.extents());
        for f in &fillers {
            let width = f.rows[0][0];
            assert!(
                width <= ext.x * FILLER_OVERLAP + 1e-5,
                "filler {width} wider than the cube {}",
                ext.x
            );
            let c = f.translation_part();
            assert!((c.x - centre.x).abs() <= ext.x * 0.5 + 1e-3);
            assert!((c.z - centre.z).abs() <= ext.z * 0.5 + 1e-3);
        }
    }

    #[test]
    fn unscale_starts_from_the_previous_contribution() {
        let mut r = rig(0.0);
        r.bind(Window::new(0, 0, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();
        r.advance(0.0);
        // First binding: nothing to undo.
        assert_eq!(r.filter.cells()[1].scale(), -0.25);
        assert_eq!(r.filter.cells()[1].ref_scale(), Some(0.0));

        r.bind(Window::new(1, 0, 0)).unwrap();
        r.advance(0.0);
        assert_eq!(r.filter.cells()[1].ref_scale(), Some(1.0));
        let before = r.filter.cells()[1].position();
        r.advance(2.0);
        assert_eq!(r.filter.cells()[1].ref_scale(), Some(0.0));
        assert!((r.filter.cells()[1].position().x - before.x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn hidden_depths_hide_their_weights() {
        let mut r = rig(0.0);
        r.bind(Window::new(0, 0, 0)).unwrap();
        r.filter.show(&mut r.sink, &mut r.pool).unwrap();
        r.filter.hide_depth(&mut r.sink, &mut r.pool, 0).unwrap();
        r.advance(3.5);
        assert!(r.filter.cells().iter().all(Cell::is_hidden));
        assert!(r.visible_particles().is_empty());
    }
}

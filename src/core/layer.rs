//! Layers drive filters over a window and own the applied/desired state pair.
//!
//! `state` is what has been pushed to the renderer, `new_state` is what a UI or
//! sequence wants. [`reconcile`] diffs the two into a [`ChangeSet`] and
//! [`Layer::update`] is the only place that applies it.

use crate::config::VizConfig;
use crate::error::{Result, VizError};
use crate::filter::{Filter, FilterWeights, STAGE_MAX, STAGE_MIN};
use crate::grid::{pair_mut, Grid, GridId};
use crate::math::lerp;
use crate::pool::ParticlePool;
use crate::render::InstanceSink;
use crate::tensor::{avg_pool_weights, KernelShape, Tensor};
use crate::window::{Window, WindowBounds};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const TRANSITION_MIN: f32 = 0.0;
pub const TRANSITION_MAX: f32 = 1.0;

/// Where a layer sits in the narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    /// Not started: output hidden, stage at its minimum.
    #[default]
    Pending,
    /// Being examined: outputs of earlier windows shown, filter drawn if visible.
    Active,
    /// Finished: whole output shown, stage at its maximum, filter hidden.
    Done,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerState {
    pub phase: Phase,
    pub stage: f32,
    pub window: Window,
    pub visible: bool,
    /// Per input depth.
    pub depth_visible: Vec<bool>,
}

impl LayerState {
    pub fn new(input_depth: usize) -> Self {
        Self {
            phase: Phase::Pending,
            stage: STAGE_MIN,
            window: Window::default(),
            visible: true,
            depth_visible: vec![true; input_depth],
        }
    }
}

/// Fields that differ between two states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub window: bool,
    pub phase: bool,
    pub visible: bool,
    /// Input depths whose visibility toggled.
    pub depths: Vec<usize>,
    pub stage: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !(self.window || self.phase || self.visible || self.stage) && self.depths.is_empty()
    }

    fn everything(depths: usize) -> Self {
        Self {
            window: true,
            phase: true,
            visible: true,
            depths: (0..depths).collect(),
            stage: true,
        }
    }
}

/// Diff `desired` against `applied`. Returns the state to apply and what changed.
pub fn reconcile(applied: &LayerState, desired: &LayerState) -> (LayerState, ChangeSet) {
    let n = applied.depth_visible.len().max(desired.depth_visible.len());
    let changes = ChangeSet {
        window: applied.window != desired.window,
        phase: applied.phase != desired.phase,
        visible: applied.visible != desired.visible,
        depths: (0..n)
            .filter(|d| applied.depth_visible.get(*d) != desired.depth_visible.get(*d))
            .collect(),
        stage: applied.stage != desired.stage,
    };
    (desired.clone(), changes)
}

/// Weights, bias and stride of a convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    /// `[out, in, kh, kw]`.
    pub weights: Tensor,
    pub bias: Vec<f32>,
    pub stride: usize,
}

impl ConvParams {
    pub fn new(weights: Tensor, bias: Vec<f32>, stride: usize) -> Self {
        Self {
            weights,
            bias,
            stride,
        }
    }

    /// Average pooling over `depth` channels as a strided convolution.
    pub fn avg_pool(depth: usize, stride: usize) -> Self {
        let stride = stride.max(1);
        Self {
            weights: avg_pool_weights(depth, stride),
            bias: vec![0.0; depth],
            stride,
        }
    }
}

#[derive(Debug)]
pub struct ConvLayer {
    filters: Vec<Filter>,
    stride: usize,
    windows: WindowBounds,
}

impl ConvLayer {
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn windows(&self) -> WindowBounds {
        self.windows
    }

    fn apply(
        &mut self,
        io: &mut Io<'_>,
        layer: &str,
        previous: Window,
        next: &LayerState,
        changes: &ChangeSet,
    ) -> Result<()> {
        let w = next.window;
        if !self.windows.contains(w) {
            return Err(VizError::WindowOutOfBounds {
                layer: layer.to_string(),
                window: w.to_string(),
            });
        }

        // Recompute rejects a bad window before drawing anything, so the previous
        // filter is only hidden once the new one is bound.
        if changes.window {
            self.filters[w.z].recompute(
                io.sink,
                io.pool,
                layer,
                w,
                self.stride,
                &*io.input,
                &*io.output,
            )?;
            if previous.z != w.z {
                if let Some(f) = self.filters.get_mut(previous.z) {
                    f.hide(io.sink, io.pool)?;
                }
            }
        }

        if changes.window || changes.phase {
            let bounds = self.windows;
            match next.phase {
                Phase::Pending => io.output.reveal_where(io.sink, |_, _, _| false)?,
                Phase::Active => {
                    let current = bounds.order(w);
                    io.output.reveal_where(io.sink, |x, y, z| {
                        bounds.order(Window::new(x, y, z)) < current
                    })?
                }
                Phase::Done => io.output.reveal_where(io.sink, |_, _, _| true)?,
            }
        }

        for &d in &changes.depths {
            let visible = next.depth_visible.get(d).copied().unwrap_or(true);
            io.input.set_depth_visible(io.sink, d, visible)?;
        }

        let filter = &mut self.filters[w.z];
        filter.set_visibility(
            next.phase == Phase::Active && next.visible,
            &next.depth_visible,
        );
        filter.advance(io.sink, io.pool, io.output, next.stage)
    }
}

#[derive(Debug)]
pub enum LayerKind {
    Conv(ConvLayer),
    AvgPool(ConvLayer),
    /// Element-wise activation between two equally shaped grids.
    Transition,
}

impl LayerKind {
    pub fn label(&self) -> &'static str {
        match self {
            LayerKind::Conv(_) => "conv",
            LayerKind::AvgPool(_) => "avg_pool",
            LayerKind::Transition => "transition",
        }
    }

    pub fn conv(&self) -> Option<&ConvLayer> {
        match self {
            LayerKind::Conv(c) | LayerKind::AvgPool(c) => Some(c),
            LayerKind::Transition => None,
        }
    }

    fn conv_mut(&mut self) -> Option<&mut ConvLayer> {
        match self {
            LayerKind::Conv(c) | LayerKind::AvgPool(c) => Some(c),
            LayerKind::Transition => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerBounds {
    pub windows: WindowBounds,
    pub stage_min: f32,
    pub stage_max: f32,
}

/// Named per-layer values a timeline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerTrack {
    Time,
    X,
    Y,
    Filter,
    Visible,
}

impl LayerTrack {
    pub const ALL: [LayerTrack; 5] = [
        LayerTrack::Time,
        LayerTrack::X,
        LayerTrack::Y,
        LayerTrack::Filter,
        LayerTrack::Visible,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            LayerTrack::Time => "Time",
            LayerTrack::X => "X",
            LayerTrack::Y => "Y",
            LayerTrack::Filter => "Filter",
            LayerTrack::Visible => "Visible",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.suffix() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Slider,
    IntSlider,
    Toggle,
}

/// UI-agnostic description of one control a front end may draw for a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Control {
    pub track: LayerTrack,
    pub kind: ControlKind,
    pub min: f32,
    pub max: f32,
}

struct Io<'a> {
    sink: &'a mut dyn InstanceSink,
    pool: &'a mut ParticlePool,
    input: &'a mut Grid,
    output: &'a mut Grid,
}

#[derive(Debug)]
pub struct Layer {
    name: String,
    kind: LayerKind,
    input: GridId,
    output: GridId,
    state: LayerState,
    new_state: LayerState,
}

fn io_pair(grids: &[Grid], input: GridId, output: GridId) -> Result<(&Grid, &Grid)> {
    if input == output {
        return Err(VizError::GridAliasing(input));
    }
    let inp = grids.get(input).ok_or(VizError::UnknownGrid(input))?;
    let out = grids.get(output).ok_or(VizError::UnknownGrid(output))?;
    Ok((inp, out))
}

impl Layer {
    pub fn conv(
        sink: &mut dyn InstanceSink,
        name: impl Into<String>,
        grids: &[Grid],
        input: GridId,
        output: GridId,
        params: &ConvParams,
        cfg: &VizConfig,
    ) -> Result<Self> {
        let conv = Self::build_conv(sink, grids, input, output, params, cfg)?;
        Self::with_kind(name.into(), LayerKind::Conv(conv), grids, input, output)
    }

    /// Conv with synthesized weights: each output depth averages its own input depth
    /// over `stride × stride` cells.
    pub fn avg_pool(
        sink: &mut dyn InstanceSink,
        name: impl Into<String>,
        grids: &[Grid],
        input: GridId,
        output: GridId,
        stride: usize,
        cfg: &VizConfig,
    ) -> Result<Self> {
        let (inp, _) = io_pair(grids, input, output)?;
        let params = ConvParams::avg_pool(inp.dims().2, stride);
        let conv = Self::build_conv(sink, grids, input, output, &params, cfg)?;
        Self::with_kind(name.into(), LayerKind::AvgPool(conv), grids, input, output)
    }

    pub fn transition(
        name: impl Into<String>,
        grids: &[Grid],
        input: GridId,
        output: GridId,
    ) -> Result<Self> {
        let (inp, out) = io_pair(grids, input, output)?;
        if inp.dims() != out.dims() {
            let (w, h, d) = out.dims();
            return Err(VizError::ShapeMismatch {
                shape: vec![d, h, w],
                expected: inp.len(),
                actual: out.len(),
            });
        }
        let state = LayerState {
            stage: TRANSITION_MIN,
            ..LayerState::new(0)
        };
        Ok(Self {
            name: name.into(),
            kind: LayerKind::Transition,
            input,
            output,
            new_state: state.clone(),
            state,
        })
    }

    fn build_conv(
        sink: &mut dyn InstanceSink,
        grids: &[Grid],
        input: GridId,
        output: GridId,
        params: &ConvParams,
        cfg: &VizConfig,
    ) -> Result<ConvLayer> {
        let (inp, out) = io_pair(grids, input, output)?;
        let k = KernelShape::of(&params.weights)?;
        let (w, h, d) = inp.dims();
        if k.in_depth != d {
            return Err(VizError::WeightCountMismatch {
                sources: d * k.height * k.width,
                weights: k.per_filter(),
            });
        }
        if k.width == 0 || k.height == 0 || k.width > w || k.height > h {
            return Err(VizError::ShapeMismatch {
                shape: params.weights.shape().to_vec(),
                expected: w * h,
                actual: k.width * k.height,
            });
        }
        let stride = params.stride.max(1);
        let windows = WindowBounds::new(
            (w - k.width) / stride + 1,
            (h - k.height) / stride + 1,
            k.out_depth,
        );
        if out.dims() != (windows.width, windows.height, windows.depth) {
            return Err(VizError::ShapeMismatch {
                shape: vec![windows.depth, windows.height, windows.width],
                expected: windows.count(),
                actual: out.len(),
            });
        }
        let filters = (0..k.out_depth)
            .map(|o| {
                let weights = FilterWeights::from_conv(&params.weights, &params.bias, o)?;
                Filter::new(sink, o, weights, inp, cfg)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ConvLayer {
            filters,
            stride,
            windows,
        })
    }

    fn with_kind(
        name: String,
        kind: LayerKind,
        grids: &[Grid],
        input: GridId,
        output: GridId,
    ) -> Result<Self> {
        if kind.conv().is_some_and(|c| c.filters.is_empty()) {
            return Err(VizError::EmptyLayer(name));
        }
        let (inp, _) = io_pair(grids, input, output)?;
        let state = LayerState::new(inp.dims().2);
        Ok(Self {
            name,
            kind,
            input,
            output,
            new_state: state.clone(),
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn input(&self) -> GridId {
        self.input
    }

    pub fn output(&self) -> GridId {
        self.output
    }

    /// Applied state.
    pub fn state(&self) -> &LayerState {
        &self.state
    }

    /// Desired state.
    pub fn new_state(&self) -> &LayerState {
        &self.new_state
    }

    pub fn desired_mut(&mut self) -> &mut LayerState {
        &mut self.new_state
    }

    pub fn is_dirty(&self) -> bool {
        self.state != self.new_state
    }

    pub fn filters(&self) -> &[Filter] {
        match self.kind.conv() {
            Some(c) => &c.filters,
            None => &[],
        }
    }

    pub fn active_filter(&self) -> Option<&Filter> {
        self.filters().get(self.state.window.z)
    }

    pub fn bounds(&self) -> LayerBounds {
        match &self.kind {
            LayerKind::Conv(c) | LayerKind::AvgPool(c) => LayerBounds {
                windows: c.windows,
                stage_min: STAGE_MIN,
                stage_max: STAGE_MAX,
            },
            LayerKind::Transition => LayerBounds {
                windows: WindowBounds::SINGLE,
                stage_min: TRANSITION_MIN,
                stage_max: TRANSITION_MAX,
            },
        }
    }

    pub fn controls(&self) -> Vec<Control> {
        let b = self.bounds();
        let mut controls = vec![Control {
            track: LayerTrack::Time,
            kind: ControlKind::Slider,
            min: b.stage_min,
            max: b.stage_max,
        }];
        if self.kind.conv().is_some() {
            let int = |track, count: usize| Control {
                track,
                kind: ControlKind::IntSlider,
                min: 0.0,
                max: count.saturating_sub(1) as f32,
            };
            controls.push(int(LayerTrack::X, b.windows.width));
            controls.push(int(LayerTrack::Y, b.windows.height));
            controls.push(int(LayerTrack::Filter, b.windows.depth));
            controls.push(Control {
                track: LayerTrack::Visible,
                kind: ControlKind::Toggle,
                min: 0.0,
                max: 1.0,
            });
        }
        controls
    }

    /// Push the desired state towards `phase`. Pending and Done also pin the stage.
    pub fn drive(&mut self, phase: Phase) {
        let b = self.bounds();
        self.new_state.phase = phase;
        match phase {
            Phase::Pending => self.new_state.stage = b.stage_min,
            Phase::Done => self.new_state.stage = b.stage_max,
            Phase::Active => {}
        }
    }

    /// Desired value of a track.
    pub fn track(&self, track: LayerTrack) -> f32 {
        let s = &self.new_state;
        match track {
            LayerTrack::Time => s.stage,
            LayerTrack::X => s.window.x as f32,
            LayerTrack::Y => s.window.y as f32,
            LayerTrack::Filter => s.window.z as f32,
            LayerTrack::Visible => {
                if s.visible {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Write a track into the desired state. Stage values clamp to the layer's
    /// range; window values truncate toward zero, then clamp.
    pub fn set_track(&mut self, track: LayerTrack, value: f32) {
        let b = self.bounds();
        match track {
            LayerTrack::Time => {
                self.new_state.stage = if value.is_nan() {
                    b.stage_min
                } else {
                    value.clamp(b.stage_min, b.stage_max)
                };
            }
            LayerTrack::X => self.new_state.window.x = self.index_value(track, value, b.windows.width),
            LayerTrack::Y => {
                self.new_state.window.y = self.index_value(track, value, b.windows.height)
            }
            LayerTrack::Filter => {
                self.new_state.window.z = self.index_value(track, value, b.windows.depth)
            }
            LayerTrack::Visible => self.new_state.visible = value >= 0.5,
        }
    }

    fn index_value(&self, track: LayerTrack, value: f32, count: usize) -> usize {
        let max = count.saturating_sub(1);
        let truncated = if value.is_finite() { value.trunc() } else { 0.0 };
        let index = (truncated.max(0.0) as usize).min(max);
        if index as f32 != truncated {
            tracing::warn!(
                "{}: {} = {} clamped to {}",
                self.name,
                track.suffix(),
                value,
                index
            );
        }
        index
    }

    /// Push the applied state to every visual, regardless of what changed.
    pub fn init(
        &mut self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
        grids: &mut [Grid],
    ) -> Result<()> {
        let (input, output) = pair_mut(grids, self.input, self.output)?;
        let mut io = Io {
            sink,
            pool,
            input,
            output,
        };
        if let Some(c) = self.kind.conv_mut() {
            for f in &mut c.filters {
                f.hide(io.sink, io.pool)?;
            }
        }
        let state = self.state.clone();
        let changes = ChangeSet::everything(state.depth_visible.len());
        self.apply(&mut io, state.window, &state, &changes)
    }

    /// Apply the desired state. Returns whether anything changed.
    pub fn update(
        &mut self,
        sink: &mut dyn InstanceSink,
        pool: &mut ParticlePool,
        grids: &mut [Grid],
    ) -> Result<bool> {
        let (next, changes) = reconcile(&self.state, &self.new_state);
        if changes.is_empty() {
            return Ok(false);
        }
        let (input, output) = pair_mut(grids, self.input, self.output)?;
        let mut io = Io {
            sink,
            pool,
            input,
            output,
        };
        self.apply(&mut io, self.state.window, &next, &changes)?;
        self.state = next;
        Ok(true)
    }

    fn apply(
        &mut self,
        io: &mut Io<'_>,
        previous: Window,
        next: &LayerState,
        changes: &ChangeSet,
    ) -> Result<()> {
        match &mut self.kind {
            LayerKind::Conv(c) | LayerKind::AvgPool(c) => {
                c.apply(io, &self.name, previous, next, changes)
            }
            LayerKind::Transition => apply_transition(io, next),
        }
    }
}

/// Output cells lerp from the recorded pre-activation value to their own
/// post-activation value; the input grid steps aside while the stage is above
/// its minimum.
fn apply_transition(io: &mut Io<'_>, next: &LayerState) -> Result<()> {
    let stage = next.stage.clamp(TRANSITION_MIN, TRANSITION_MAX);
    let (show_output, t) = match next.phase {
        Phase::Pending => (false, 0.0),
        Phase::Active => (stage > TRANSITION_MIN, stage),
        Phase::Done => (true, 1.0),
    };
    let (w, h, d) = io.output.dims();
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let pre = io.input.value(x, y, z).unwrap_or(0.0);
                let post = io.output.value(x, y, z).unwrap_or(0.0);
                io.output
                    .set_glyph_scale(io.sink, x, y, z, lerp(pre, post, t))?;
            }
        }
    }
    io.input.set_shown(io.sink, !show_output)?;
    io.output.set_shown(io.sink, show_output)
}

//! One tensor laid out as a grid of glyphs.
//!
//! A glyph is drawn only when the grid is shown, its depth slice is visible and the
//! glyph itself is revealed. Layers own the reveal flags of their output grid;
//! slice visibility belongs to whichever layer reads the grid.

use core::ops::RangeInclusive;

use crate::cell::{Cell, CellProps, DiSet};
use crate::config::VizConfig;
use crate::error::{Result, VizError};
use crate::math::Vec3;
use crate::render::InstanceSink;
use crate::tensor::Tensor;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type GridId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GlyphStyle {
    #[default]
    Cube,
    /// Three bars, one per axis. Used for flat dense activations.
    Axes,
}

/// World placement of a grid.
///
/// Grid `x` runs along world x, grid `y` along world z and depth stacks along
/// world y.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridLayout {
    pub origin: Vec3,
    pub spacing: f32,
    pub layer_spacing: f32,
    pub style: GlyphStyle,
}

impl GridLayout {
    pub fn new(origin: Vec3) -> Self {
        Self {
            origin,
            spacing: 1.5,
            layer_spacing: 3.0,
            style: GlyphStyle::Cube,
        }
    }

    pub fn axes(mut self) -> Self {
        self.style = GlyphStyle::Axes;
        self
    }

    pub fn position(&self, x: usize, y: usize, z: usize) -> Vec3 {
        self.origin
            + Vec3::new(
                x as f32 * self.spacing,
                z as f32 * self.layer_spacing,
                y as f32 * self.spacing,
            )
    }
}

#[derive(Debug, Clone)]
pub enum Glyph {
    Cube(Cell),
    Axes(DiSet),
}

impl Glyph {
    pub fn value(&self) -> f32 {
        self.primary().value()
    }

    pub fn scale(&self) -> f32 {
        self.primary().scale()
    }

    pub fn position(&self) -> Vec3 {
        self.primary().position()
    }

    /// The cell standing for the whole glyph in geometric queries.
    pub fn primary(&self) -> &Cell {
        match self {
            Glyph::Cube(c) => c,
            Glyph::Axes(set) => &set.cells()[0],
        }
    }

    pub fn is_hidden(&self) -> bool {
        match self {
            Glyph::Cube(c) => c.is_hidden(),
            Glyph::Axes(set) => set.cells().iter().all(Cell::is_hidden),
        }
    }

    pub fn move_to(&mut self, sink: &mut dyn InstanceSink, position: Vec3, hidden: bool) -> Result<()> {
        match self {
            Glyph::Cube(c) => c.move_to(sink, position, hidden),
            Glyph::Axes(set) => set.move_to(sink, position, hidden),
        }
    }

    pub fn set_scale(&mut self, sink: &mut dyn InstanceSink, scale: f32) -> Result<()> {
        match self {
            Glyph::Cube(c) => c.set_scale(sink, scale, None),
            Glyph::Axes(set) => set.set_scale(sink, scale, None),
        }
    }
}

#[derive(Debug)]
pub struct Grid {
    name: String,
    width: usize,
    height: usize,
    depth: usize,
    layout: GridLayout,
    glyphs: Vec<Glyph>,
    revealed: Vec<bool>,
    depth_visible: Vec<bool>,
    shown: bool,
}

impl Grid {
    pub fn from_tensor(
        sink: &mut dyn InstanceSink,
        name: impl Into<String>,
        tensor: &Tensor,
        layout: GridLayout,
        cfg: &VizConfig,
    ) -> Result<Self> {
        let (width, height, depth) = tensor.dims3();
        let mut glyphs = Vec::with_capacity(tensor.len());
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    let props = CellProps::new(tensor.at(x, y, z), layout.position(x, y, z));
                    glyphs.push(match layout.style {
                        GlyphStyle::Cube => Glyph::Cube(Cell::new(sink, props, cfg)?),
                        GlyphStyle::Axes => Glyph::Axes(DiSet::new(sink, props, cfg)?),
                    });
                }
            }
        }
        let name = name.into();
        tracing::debug!("Grid '{}' {}x{}x{}", name, width, height, depth);
        Ok(Self {
            name,
            width,
            height,
            depth,
            layout,
            revealed: vec![true; glyphs.len()],
            glyphs,
            depth_visible: vec![true; depth],
            shown: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(width, height, depth)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    fn index(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        (x < self.width && y < self.height && z < self.depth)
            .then(|| (z * self.height + y) * self.width + x)
    }

    pub fn glyph(&self, x: usize, y: usize, z: usize) -> Option<&Glyph> {
        self.index(x, y, z).map(|i| &self.glyphs[i])
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn value(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.glyph(x, y, z).map(Glyph::value)
    }

    /// Every glyph with `x` in `xs` and `y` in `ys`, across all depths: depth-major,
    /// then rows, then columns. Coordinates outside the grid are skipped.
    pub fn range(&self, xs: RangeInclusive<usize>, ys: RangeInclusive<usize>) -> Vec<&Glyph> {
        let mut out = Vec::new();
        for z in 0..self.depth {
            for y in ys.clone() {
                for x in xs.clone() {
                    if let Some(i) = self.index(x, y, z) {
                        out.push(&self.glyphs[i]);
                    }
                }
            }
        }
        out
    }

    fn drawn(&self, i: usize) -> bool {
        let z = i / (self.width * self.height);
        self.shown && self.depth_visible[z] && self.revealed[i]
    }

    pub fn is_drawn(&self, x: usize, y: usize, z: usize) -> bool {
        self.index(x, y, z).is_some_and(|i| self.drawn(i))
    }

    fn redraw(&mut self, sink: &mut dyn InstanceSink, i: usize) -> Result<()> {
        let hidden = !self.drawn(i);
        let glyph = &mut self.glyphs[i];
        let position = glyph.position();
        glyph.move_to(sink, position, hidden)
    }

    /// Redraw every glyph, e.g. after the acceleration structure is first built.
    pub fn refresh(&mut self, sink: &mut dyn InstanceSink) -> Result<()> {
        for i in 0..self.glyphs.len() {
            self.redraw(sink, i)?;
        }
        Ok(())
    }

    pub fn is_revealed(&self, x: usize, y: usize, z: usize) -> bool {
        self.index(x, y, z).is_some_and(|i| self.revealed[i])
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed.iter().filter(|r| **r).count()
    }

    pub fn set_revealed(
        &mut self,
        sink: &mut dyn InstanceSink,
        x: usize,
        y: usize,
        z: usize,
        revealed: bool,
    ) -> Result<()> {
        let Some(i) = self.index(x, y, z) else {
            return Ok(());
        };
        if self.revealed[i] != revealed {
            self.revealed[i] = revealed;
            self.redraw(sink, i)?;
        }
        Ok(())
    }

    /// Set every reveal flag from `pred(x, y, z)`, redrawing only what changed.
    pub fn reveal_where(
        &mut self,
        sink: &mut dyn InstanceSink,
        pred: impl Fn(usize, usize, usize) -> bool,
    ) -> Result<()> {
        for z in 0..self.depth {
            for y in 0..self.height {
                for x in 0..self.width {
                    self.set_revealed(sink, x, y, z, pred(x, y, z))?;
                }
            }
        }
        Ok(())
    }

    pub fn is_depth_visible(&self, z: usize) -> bool {
        self.depth_visible.get(z).copied().unwrap_or(false)
    }

    pub fn set_depth_visible(
        &mut self,
        sink: &mut dyn InstanceSink,
        z: usize,
        visible: bool,
    ) -> Result<()> {
        if z >= self.depth || self.depth_visible[z] == visible {
            return Ok(());
        }
        self.depth_visible[z] = visible;
        let per = self.width * self.height;
        for i in z * per..(z + 1) * per {
            self.redraw(sink, i)?;
        }
        Ok(())
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    pub fn set_shown(&mut self, sink: &mut dyn InstanceSink, shown: bool) -> Result<()> {
        if self.shown == shown {
            return Ok(());
        }
        self.shown = shown;
        self.refresh(sink)
    }

    /// Visual scale of one glyph; its value is untouched.
    pub fn set_glyph_scale(
        &mut self,
        sink: &mut dyn InstanceSink,
        x: usize,
        y: usize,
        z: usize,
        scale: f32,
    ) -> Result<()> {
        match self.index(x, y, z) {
            Some(i) => self.glyphs[i].set_scale(sink, scale),
            None => Ok(()),
        }
    }
}

/// Borrow two distinct grids mutably.
pub fn pair_mut(grids: &mut [Grid], a: GridId, b: GridId) -> Result<(&mut Grid, &mut Grid)> {
    if a == b {
        return Err(VizError::GridAliasing(a));
    }
    for id in [a, b] {
        if id >= grids.len() {
            return Err(VizError::UnknownGrid(id));
        }
    }
    if a < b {
        let (lo, hi) = grids.split_at_mut(b);
        Ok((&mut lo[a], &mut hi[0]))
    } else {
        let (lo, hi) = grids.split_at_mut(a);
        Ok((&mut hi[0], &mut lo[b]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InstanceBuffer;

    fn ramp(sink: &mut InstanceBuffer) -> Grid {
        let t = Tensor::from_fn(vec![2, 3, 4], |i| i as f32 * 0.01);
        Grid::from_tensor(
            sink,
            "ramp",
            &t,
            GridLayout::new(Vec3::ZERO),
            &VizConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn tensor_layout_maps_to_world_axes() {
        let mut sink = InstanceBuffer::new();
        let g = ramp(&mut sink);
        assert_eq!(g.dims(), (4, 3, 2));
        assert_eq!(g.value(1, 2, 1), Some((12 + 8 + 1) as f32 * 0.01));
        let p = g.glyph(1, 2, 1).unwrap().position();
        assert_eq!(p, Vec3::new(1.5, 3.0, 3.0));
        assert_eq!(sink.len(), 24 * 2);
    }

    #[test]
    fn range_is_depth_major_then_rows_then_columns() {
        let mut sink = InstanceBuffer::new();
        let g = ramp(&mut sink);
        let got: Vec<f32> = g.range(1..=2, 0..=1).iter().map(|c| c.value()).collect();
        let want: Vec<f32> = [1, 2, 5, 6, 13, 14, 17, 18]
            .iter()
            .map(|i| *i as f32 * 0.01)
            .collect();
        assert_eq!(got, want);
        // Clipped at the border.
        assert_eq!(g.range(3..=5, 0..=0).len(), 2);
    }

    #[test]
    fn a_glyph_needs_every_flag_to_be_drawn() {
        let mut sink = InstanceBuffer::new();
        let mut g = ramp(&mut sink);
        sink.build();

        g.set_revealed(&mut sink, 0, 0, 1, false).unwrap();
        assert!(!g.is_drawn(0, 0, 1));
        assert!(g.glyph(0, 0, 1).unwrap().is_hidden());

        g.set_depth_visible(&mut sink, 0, false).unwrap();
        assert!(!g.is_drawn(3, 2, 0));
        assert!(g.is_drawn(3, 2, 1));

        g.set_shown(&mut sink, false).unwrap();
        assert!(g.glyphs().iter().all(Glyph::is_hidden));

        g.set_shown(&mut sink, true).unwrap();
        g.set_depth_visible(&mut sink, 0, true).unwrap();
        assert!(g.glyph(3, 2, 0).is_some_and(|c| !c.is_hidden()));
        assert!(g.glyph(0, 0, 1).unwrap().is_hidden());
    }

    #[test]
    fn pair_mut_rejects_aliasing_and_unknown_ids() {
        let mut sink = InstanceBuffer::new();
        let mut grids = vec![ramp(&mut sink), ramp(&mut sink)];
        assert!(matches!(pair_mut(&mut grids, 1, 1), Err(VizError::GridAliasing(1))));
        assert!(matches!(pair_mut(&mut grids, 0, 5), Err(VizError::UnknownGrid(5))));
        let (a, b) = pair_mut(&mut grids, 1, 0).unwrap();
        assert_eq!(a.dims(), b.dims());
    }

    #[test]
    fn axes_glyphs_are_three_cells() {
        let mut sink = InstanceBuffer::new();
        let t = Tensor::new(vec![3], vec![0.1, -0.2, 0.3]).unwrap();
        let g = Grid::from_tensor(
            &mut sink,
            "dense",
            &t,
            GridLayout::new(Vec3::ZERO).axes(),
            &VizConfig::default(),
        )
        .unwrap();
        assert_eq!(g.dims(), (1, 1, 3));
        assert_eq!(sink.len(), 3 * 3 * 2);
        assert_eq!(g.value(0, 0, 1), Some(-0.2));
    }
}

//! Visual cubes for single scalars.

use core::f32::consts::FRAC_PI_2;

use crate::config::VizConfig;
use crate::error::{Result, VizError};
use crate::math::{Transform, Vec3};
use crate::prng::Prng;
use crate::render::{InstanceId, InstanceSink, ModelKind};

/// Construction-time description of a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellProps {
    pub value: f32,
    pub position: Vec3,
    /// Rotation about x, then about z (radians).
    pub rotation: [f32; 2],
    pub height: f32,
    /// Show a glass reference cube around the cell.
    pub with_reference: bool,
    /// Built out of particles: uses the partial models.
    pub construction: bool,
}

impl CellProps {
    pub fn new(value: f32, position: Vec3) -> Self {
        Self {
            value,
            position,
            rotation: [0.0, 0.0],
            height: 1.0,
            with_reference: false,
            construction: false,
        }
    }

    pub fn with_reference(mut self) -> Self {
        self.with_reference = true;
        self
    }

    pub fn construction(mut self) -> Self {
        self.construction = true;
        self
    }

    pub fn rotated(mut self, about_x: f32, about_z: f32) -> Self {
        self.rotation = [about_x, about_z];
        self
    }
}

/// Result of [`Cell::split`]: `points` in the local unit cube plus the local extent
/// of each grid point's own sub-cube.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub points: Vec<Vec3>,
    pub width: f32,
    pub height: f32,
    pub layers: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Split {
    pub fn grid_points(&self) -> usize {
        self.layers * self.rows * self.cols
    }

    pub fn residual(&self) -> usize {
        self.points.len() - self.grid_points()
    }
}

/// One scalar as a cube: width tracks |scale|, colour tracks the sign.
///
/// A cell always owns a positive and a negative cube instance; the one matching the
/// sign is drawn and the other sits at zero scale, so values can cross zero while
/// animating.
#[derive(Debug, Clone)]
pub struct Cell {
    value: f32,
    scale: f32,
    ref_scale: Option<f32>,
    position: Vec3,
    rotation: [f32; 2],
    height: f32,
    construction: bool,
    marker: bool,
    hidden: bool,

    max_size: f32,
    max_position: f32,

    positive: InstanceId,
    negative: InstanceId,
    glass: Option<InstanceId>,
}

impl Cell {
    pub fn new(sink: &mut dyn InstanceSink, props: CellProps, cfg: &VizConfig) -> Result<Self> {
        check_position(props.position, cfg.max_position)?;
        let (pos_model, neg_model) = if props.construction {
            (ModelKind::CubePositivePartial, ModelKind::CubeNegativePartial)
        } else {
            (ModelKind::CubePositive, ModelKind::CubeNegative)
        };

        let mut cell = Self {
            value: props.value,
            scale: props.value.clamp(-cfg.max_size, cfg.max_size),
            ref_scale: None,
            position: props.position,
            rotation: props.rotation,
            height: props.height.max(0.0),
            construction: props.construction,
            marker: false,
            hidden: false,
            max_size: cfg.max_size,
            max_position: cfg.max_position,
            positive: 0,
            negative: 0,
            glass: None,
        };

        let (p, n, g) = cell.transforms(cell.position, false);
        cell.positive = sink.add_instance(pos_model, p);
        cell.negative = sink.add_instance(neg_model, n);
        if props.with_reference || props.construction {
            cell.glass = Some(sink.add_instance(ModelKind::Glass, g));
        }
        Ok(cell)
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn ref_scale(&self) -> Option<f32> {
        self.ref_scale
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_construction(&self) -> bool {
        self.construction
    }

    pub fn has_marker(&self) -> bool {
        self.marker
    }

    pub fn instances(&self) -> (InstanceId, InstanceId, Option<InstanceId>) {
        (self.positive, self.negative, self.glass)
    }

    /// World-space size of the drawn cube.
    pub fn extents(&self) -> Vec3 {
        self.extents_at(self.scale)
    }

    /// Size the cube would have at `scale`, clamped the way [`Cell::place`] clamps.
    pub fn extents_at(&self, scale: f32) -> Vec3 {
        let w = scale.clamp(-self.max_size, self.max_size).abs();
        Vec3::new(w, self.height, w)
    }

    fn base(&self, position: Vec3) -> Transform {
        Transform::translation(position)
            .then(&Transform::rotation_z(self.rotation[1]))
            .then(&Transform::rotation_x(self.rotation[0]))
    }

    /// Maps the local unit cube `[-0.5, 0.5]³` onto the drawn cube.
    pub fn body(&self) -> Transform {
        self.body_at(self.position, self.scale)
    }

    /// [`Cell::body`] as it will be once placed at `position` with `scale`.
    pub fn body_at(&self, position: Vec3, scale: f32) -> Transform {
        self.base(position)
            .then(&Transform::translation(Vec3::new(0.0, self.height * 0.5, 0.0)))
            .then(&Transform::scale(self.extents_at(scale)))
    }

    pub fn world_point(&self, local: Vec3) -> Vec3 {
        self.body().transform_point(local)
    }

    fn transforms(&self, position: Vec3, hidden: bool) -> (Transform, Transform, Transform) {
        if hidden {
            return (Transform::HIDDEN, Transform::HIDDEN, Transform::HIDDEN);
        }
        let body = self.body_at(position, self.scale);
        let (p, n) = if self.scale >= 0.0 {
            (body, Transform::HIDDEN)
        } else {
            (Transform::HIDDEN, body)
        };

        let glass_width = match self.ref_scale {
            Some(r) => r.abs().min(self.max_size),
            None if self.marker => self.max_size,
            None => 0.0,
        };
        let glass = if glass_width > 0.0 {
            self.base(position)
                .then(&Transform::translation(Vec3::new(0.0, self.height * 0.5, 0.0)))
                .then(&Transform::scale(Vec3::new(
                    glass_width,
                    self.height,
                    glass_width,
                )))
        } else {
            Transform::HIDDEN
        };
        (p, n, glass)
    }

    /// Recompute every owned instance at `position`. Hidden cells are collapsed to
    /// zero scale, never removed.
    pub fn move_to(
        &mut self,
        sink: &mut dyn InstanceSink,
        position: Vec3,
        hidden: bool,
    ) -> Result<()> {
        check_position(position, self.max_position)?;
        self.position = position;
        self.hidden = hidden;

        let (p, n, g) = self.transforms(position, hidden);
        sink.set_transform(self.positive, p)?;
        sink.set_transform(self.negative, n)?;
        if let Some(glass) = self.glass {
            sink.set_transform(glass, g)?;
        }
        sink.request_rebuild();
        Ok(())
    }

    /// Visual scale only; the logical value is untouched.
    pub fn set_scale(
        &mut self,
        sink: &mut dyn InstanceSink,
        scale: f32,
        ref_scale: Option<f32>,
    ) -> Result<()> {
        self.scale = scale.clamp(-self.max_size, self.max_size);
        self.ref_scale = ref_scale.map(|r| r.clamp(-self.max_size, self.max_size));
        self.move_to(sink, self.position, self.hidden)
    }

    /// Position, scale and reference in a single transform update.
    pub fn place(
        &mut self,
        sink: &mut dyn InstanceSink,
        position: Vec3,
        scale: f32,
        ref_scale: Option<f32>,
        hidden: bool,
    ) -> Result<()> {
        self.scale = scale.clamp(-self.max_size, self.max_size);
        self.ref_scale = ref_scale.map(|r| r.clamp(-self.max_size, self.max_size));
        self.move_to(sink, position, hidden)
    }

    pub fn set_marker(&mut self, sink: &mut dyn InstanceSink, marker: bool) -> Result<()> {
        if self.marker == marker {
            return Ok(());
        }
        self.marker = marker;
        self.move_to(sink, self.position, self.hidden)
    }

    pub fn set_hidden(&mut self, sink: &mut dyn InstanceSink, hidden: bool) -> Result<()> {
        self.move_to(sink, self.position, hidden)
    }

    /// Decompose the cube's volume into exactly `n` points (`n` clamped to ≥1).
    ///
    /// Packs a `layers × rows × cols` grid of sub-cubes sized so each holds about
    /// `volume / n`, truncating at every step, then scatters the leftover points
    /// uniformly at random inside the cube.
    pub fn split(&self, n: usize, rng: &mut Prng) -> Split {
        split_volume(self.scale.abs(), self.height, n, rng)
    }
}

pub fn split_volume(width: f32, height: f32, n: usize, rng: &mut Prng) -> Split {
    let n = n.max(1);
    let nf = n as f64;
    let height = f64::from(height);
    let volume = f64::from(width) * f64::from(width) * height;

    let point_volume = volume / nf;
    let thickness = point_volume.cbrt();
    // The epsilon only absorbs cbrt rounding on exact cubes (8 points → 2 layers).
    let layers = if thickness > 0.0 {
        (height / thickness + 1e-9).floor()
    } else {
        nf
    };
    let layers = (layers.clamp(1.0, nf)) as usize;

    let per_layer = nf / layers as f64;
    let rows = (per_layer.sqrt().floor() as usize).max(1);
    let cols = rows;

    let w = 1.0 / rows as f32;
    let h = 1.0 / layers as f32;

    let mut points = Vec::with_capacity(n);
    for layer in 0..layers {
        for row in 0..rows {
            for col in 0..cols {
                points.push(Vec3::new(
                    row as f32 * w + w * 0.5 - 0.5,
                    layer as f32 * h + h * 0.5 - 0.5,
                    col as f32 * w + w * 0.5 - 0.5,
                ));
            }
        }
    }

    while points.len() < n {
        points.push(Vec3::new(rng.centered(), rng.centered(), rng.centered()));
    }

    Split {
        points,
        width: w,
        height: h,
        layers,
        rows,
        cols,
    }
}

fn check_position(position: Vec3, bound: f32) -> Result<()> {
    let magnitude = position.length();
    if !position.is_finite() || magnitude > bound {
        return Err(VizError::PositionOutOfBounds { magnitude, bound });
    }
    Ok(())
}

/// Three cells, one bar per axis, acting as one scalar.
///
/// Keeps its own hidden flag: a DiSet hidden with [`DiSet::hide`] stays hidden
/// whatever individual `move_to` calls request, until [`DiSet::show`].
#[derive(Debug, Clone)]
pub struct DiSet {
    cells: [Cell; 3],
    hidden: bool,
}

impl DiSet {
    pub fn new(sink: &mut dyn InstanceSink, props: CellProps, cfg: &VizConfig) -> Result<Self> {
        Ok(Self {
            cells: [
                Cell::new(sink, props.rotated(0.0, 0.0), cfg)?,
                Cell::new(sink, props.rotated(0.0, -FRAC_PI_2), cfg)?,
                Cell::new(sink, props.rotated(FRAC_PI_2, 0.0), cfg)?,
            ],
            hidden: false,
        })
    }

    pub fn cells(&self) -> &[Cell; 3] {
        &self.cells
    }

    pub fn value(&self) -> f32 {
        self.cells[0].value()
    }

    pub fn scale(&self) -> f32 {
        self.cells[0].scale()
    }

    pub fn position(&self) -> Vec3 {
        self.cells[0].position()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn move_to(
        &mut self,
        sink: &mut dyn InstanceSink,
        position: Vec3,
        hidden: bool,
    ) -> Result<()> {
        let hidden = hidden || self.hidden;
        for c in &mut self.cells {
            c.move_to(sink, position, hidden)?;
        }
        Ok(())
    }

    pub fn set_scale(
        &mut self,
        sink: &mut dyn InstanceSink,
        scale: f32,
        ref_scale: Option<f32>,
    ) -> Result<()> {
        for c in &mut self.cells {
            c.set_scale(sink, scale, ref_scale)?;
        }
        Ok(())
    }

    pub fn hide(&mut self, sink: &mut dyn InstanceSink) -> Result<()> {
        self.hidden = true;
        self.move_to(sink, self.position(), true)
    }

    pub fn show(&mut self, sink: &mut dyn InstanceSink) -> Result<()> {
        self.hidden = false;
        self.move_to(sink, self.position(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InstanceBuffer;

    fn in_unit_cube(p: Vec3) -> bool {
        [p.x, p.y, p.z].iter().all(|v| (-0.5..=0.5).contains(v))
    }

    #[test]
    fn split_eight_on_unit_cube_is_two_by_two_by_two() {
        let mut rng = Prng::new(1);
        let s = split_volume(1.0, 1.0, 8, &mut rng);
        assert_eq!((s.layers, s.rows, s.cols), (2, 2, 2));
        assert_eq!(s.points.len(), 8);
        assert_eq!(s.residual(), 0);
        assert_eq!(s.points[0], Vec3::new(-0.25, -0.25, -0.25));
        assert_eq!((s.width, s.height), (0.5, 0.5));
    }

    #[test]
    fn split_always_returns_n_points_inside_the_cube() {
        let mut rng = Prng::new(99);
        for &(w, h) in &[(1.0, 1.0), (0.3, 1.0), (0.05, 2.0), (0.0, 1.0), (1.0, 0.1)] {
            for n in 1..=150 {
                let s = split_volume(w, h, n, &mut rng);
                assert_eq!(s.points.len(), n, "w={w} h={h} n={n}");
                assert!(s.points.iter().copied().all(in_unit_cube));
                assert!(s.grid_points() <= n);
            }
        }
    }

    #[test]
    fn split_of_zero_requests_one_point() {
        let mut rng = Prng::new(3);
        assert_eq!(split_volume(1.0, 1.0, 0, &mut rng).points.len(), 1);
    }

    #[test]
    fn scale_is_clamped_and_sign_selects_the_instance() {
        let cfg = VizConfig::default();
        let mut sink = InstanceBuffer::new();
        let mut cell = Cell::new(&mut sink, CellProps::new(-3.0, Vec3::ZERO), &cfg).unwrap();
        sink.build();
        assert_eq!(cell.scale(), -cfg.max_size);
        assert_eq!(cell.value(), -3.0);

        cell.set_scale(&mut sink, 0.5, None).unwrap();
        let (p, n, _) = cell.instances();
        assert!(!sink.transform(p).unwrap().is_hidden());
        assert!(sink.transform(n).unwrap().is_hidden());
        assert!(sink.take_rebuild());
    }

    #[test]
    fn hidden_cells_collapse_to_zero_scale() {
        let cfg = VizConfig::default();
        let mut sink = InstanceBuffer::new();
        let mut cell = Cell::new(
            &mut sink,
            CellProps::new(0.7, Vec3::ZERO).with_reference(),
            &cfg,
        )
        .unwrap();
        sink.build();
        cell.set_scale(&mut sink, 0.7, Some(0.4)).unwrap();
        cell.move_to(&mut sink, Vec3::new(1.0, 0.0, 0.0), true).unwrap();
        let (p, n, g) = cell.instances();
        for id in [p, n, g.unwrap()] {
            assert!(sink.transform(id).unwrap().is_hidden());
        }
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn positions_beyond_the_bound_are_rejected() {
        let cfg = VizConfig::default();
        let mut sink = InstanceBuffer::new();
        let mut cell = Cell::new(&mut sink, CellProps::new(1.0, Vec3::ZERO), &cfg).unwrap();
        sink.build();
        let far = Vec3::new(cfg.max_position * 2.0, 0.0, 0.0);
        assert!(matches!(
            cell.move_to(&mut sink, far, false),
            Err(VizError::PositionOutOfBounds { .. })
        ));
    }

    #[test]
    fn world_points_land_inside_the_drawn_cube() {
        let cfg = VizConfig::default();
        let mut sink = InstanceBuffer::new();
        let cell = Cell::new(
            &mut sink,
            CellProps::new(0.5, Vec3::new(2.0, 3.0, 4.0)),
            &cfg,
        )
        .unwrap();
        let top = cell.world_point(Vec3::new(0.5, 0.5, 0.5));
        assert!((top.x - 2.25).abs() < 1e-6);
        assert!((top.y - 4.0).abs() < 1e-6);
        let bottom = cell.world_point(Vec3::new(-0.5, -0.5, -0.5));
        assert!((bottom.y - 3.0).abs() < 1e-6);
    }

    #[test]
    fn diset_permanent_hide_overrides_move_requests() {
        let cfg = VizConfig::default();
        let mut sink = InstanceBuffer::new();
        let mut set = DiSet::new(&mut sink, CellProps::new(0.5, Vec3::ZERO), &cfg).unwrap();
        sink.build();

        set.hide(&mut sink).unwrap();
        set.move_to(&mut sink, Vec3::Y, false).unwrap();
        assert!(set.cells().iter().all(|c| c.is_hidden()));

        set.show(&mut sink).unwrap();
        assert!(set.cells().iter().all(|c| !c.is_hidden()));
        assert_eq!(set.position(), Vec3::Y);
    }
}

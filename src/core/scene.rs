//! The scene aggregate: grids, layers, the shared particle pool and the camera.
//!
//! All mutation of layer state goes through [`Scene::update`], which enforces that
//! at most one layer is `Active` at a time.

use crate::config::VizConfig;
use crate::error::{Result, VizError};
use crate::grid::{Grid, GridId, GridLayout};
use crate::layer::{ConvParams, Layer, LayerState, LayerTrack, Phase};
use crate::math::Vec3;
use crate::pool::ParticlePool;
use crate::render::InstanceSink;
use crate::tensor::Tensor;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type LayerId = usize;

pub const CAMERA_POS: &str = "Camera pos";
pub const CAMERA_TGT: &str = "Camera tgt";

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::splat(2.0),
            target: Vec3::ZERO,
        }
    }
}

/// Outcome of one [`Scene::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Layer that held focus, `None` when nothing was pending.
    pub focus: Option<LayerId>,
    /// Layers in the order they were updated.
    pub order: Vec<LayerId>,
    /// Layers whose applied state actually changed.
    pub changed: Vec<LayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackRef {
    Layer(LayerId, LayerTrack),
    Camera { target: bool, axis: usize },
}

#[derive(Debug)]
pub struct Scene {
    cfg: VizConfig,
    grids: Vec<Grid>,
    layers: Vec<Layer>,
    pool: ParticlePool,
    camera: Camera,
    focus: Option<LayerId>,
}

impl Scene {
    /// Empty scene with `cfg.particle_reserve` particles per polarity registered in `sink`.
    pub fn new(sink: &mut dyn InstanceSink, cfg: VizConfig) -> Self {
        let pool = ParticlePool::reserve(sink, cfg.particle_reserve);
        Self {
            cfg,
            grids: Vec::new(),
            layers: Vec::new(),
            pool,
            camera: Camera::default(),
            focus: None,
        }
    }

    pub fn config(&self) -> &VizConfig {
        &self.cfg
    }

    pub fn add_grid(
        &mut self,
        sink: &mut dyn InstanceSink,
        name: impl Into<String>,
        tensor: &Tensor,
        layout: GridLayout,
    ) -> Result<GridId> {
        let grid = Grid::from_tensor(sink, name, tensor, layout, &self.cfg)?;
        self.grids.push(grid);
        Ok(self.grids.len() - 1)
    }

    pub fn add_conv(
        &mut self,
        sink: &mut dyn InstanceSink,
        name: &str,
        input: GridId,
        output: GridId,
        params: &ConvParams,
    ) -> Result<LayerId> {
        self.check_name(name)?;
        let layer = Layer::conv(sink, name, &self.grids, input, output, params, &self.cfg)?;
        Ok(self.push_layer(layer))
    }

    pub fn add_avg_pool(
        &mut self,
        sink: &mut dyn InstanceSink,
        name: &str,
        input: GridId,
        output: GridId,
        stride: usize,
    ) -> Result<LayerId> {
        self.check_name(name)?;
        let layer = Layer::avg_pool(sink, name, &self.grids, input, output, stride, &self.cfg)?;
        Ok(self.push_layer(layer))
    }

    pub fn add_transition(&mut self, name: &str, input: GridId, output: GridId) -> Result<LayerId> {
        self.check_name(name)?;
        let layer = Layer::transition(name, &self.grids, input, output)?;
        Ok(self.push_layer(layer))
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.layer_by_name(name).is_some() {
            return Err(VizError::DuplicateLayer(name.to_string()));
        }
        Ok(())
    }

    fn push_layer(&mut self, layer: Layer) -> LayerId {
        tracing::debug!(
            "Layer '{}' ({}) added: grid {} -> grid {}",
            layer.name(),
            layer.kind().label(),
            layer.input(),
            layer.output()
        );
        self.layers.push(layer);
        self.layers.len() - 1
    }

    pub fn grid(&self, id: GridId) -> Option<&Grid> {
        self.grids.get(id)
    }

    pub fn grids(&self) -> &[Grid] {
        &self.grids
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_by_name(&self, name: &str) -> Option<LayerId> {
        self.layers.iter().position(|l| l.name() == name)
    }

    pub fn desired_mut(&mut self, id: LayerId) -> Option<&mut LayerState> {
        self.layers.get_mut(id).map(Layer::desired_mut)
    }

    pub fn pool(&self) -> &ParticlePool {
        &self.pool
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn focus(&self) -> Option<LayerId> {
        self.focus
    }

    /// Push every layer's applied state to the sink. Call once the sink accepts
    /// transform updates.
    pub fn init(&mut self, sink: &mut dyn InstanceSink) -> Result<()> {
        for layer in &mut self.layers {
            layer.init(sink, &mut self.pool, &mut self.grids)?;
        }
        Ok(())
    }

    /// Apply pending desired states.
    ///
    /// The first layer with a pending change takes focus. Layers before it are
    /// driven to `Done`, layers after it to `Pending`, each updated in order, and
    /// the focused layer is updated last as `Active`. Nothing happens when no layer
    /// has a pending change.
    pub fn update(&mut self, sink: &mut dyn InstanceSink) -> Result<UpdateReport> {
        let Some(focus) = self.layers.iter().position(Layer::is_dirty) else {
            return Ok(UpdateReport::default());
        };
        if self.focus != Some(focus) {
            tracing::info!("Focus on layer '{}'", self.layers[focus].name());
            self.focus = Some(focus);
        }

        let n = self.layers.len();
        let mut report = UpdateReport {
            focus: Some(focus),
            order: Vec::with_capacity(n),
            changed: Vec::new(),
        };
        for id in (0..focus).chain(focus + 1..n).chain([focus]) {
            let phase = match id.cmp(&focus) {
                core::cmp::Ordering::Less => Phase::Done,
                core::cmp::Ordering::Greater => Phase::Pending,
                core::cmp::Ordering::Equal => Phase::Active,
            };
            let layer = &mut self.layers[id];
            layer.drive(phase);
            if layer.update(sink, &mut self.pool, &mut self.grids)? {
                report.changed.push(id);
            }
            report.order.push(id);
        }
        Ok(report)
    }

    /// Every track label, layer tracks first in layer order, then the camera
    /// components.
    pub fn track_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .layers
            .iter()
            .flat_map(|l| {
                l.controls()
                    .into_iter()
                    .map(move |c| format!("{}: {}", l.name(), c.track.suffix()))
            })
            .collect();
        for base in [CAMERA_POS, CAMERA_TGT] {
            for axis in ["x", "y", "z"] {
                labels.push(format!("{base}.{axis}"));
            }
        }
        labels
    }

    fn resolve(&self, label: &str) -> Result<TrackRef> {
        let unknown = || VizError::UnknownTrack(label.to_string());
        if let Some((base, axis)) = label.rsplit_once('.') {
            let target = match base {
                CAMERA_POS => Some(false),
                CAMERA_TGT => Some(true),
                _ => None,
            };
            if let Some(target) = target {
                let axis = ["x", "y", "z"]
                    .iter()
                    .position(|a| *a == axis)
                    .ok_or_else(unknown)?;
                return Ok(TrackRef::Camera { target, axis });
            }
        }
        let (name, suffix) = label.rsplit_once(": ").ok_or_else(unknown)?;
        let id = self.layer_by_name(name).ok_or_else(unknown)?;
        let track = LayerTrack::parse(suffix).ok_or_else(unknown)?;
        Ok(TrackRef::Layer(id, track))
    }

    /// Desired value behind `label`.
    pub fn track(&self, label: &str) -> Result<f32> {
        Ok(match self.resolve(label)? {
            TrackRef::Layer(id, track) => self.layers[id].track(track),
            TrackRef::Camera { target, axis } => {
                let v = if target {
                    self.camera.target
                } else {
                    self.camera.position
                };
                [v.x, v.y, v.z][axis]
            }
        })
    }

    /// Write `value` into the desired state behind `label`. Takes effect on the next
    /// [`Scene::update`]; camera writes apply immediately.
    pub fn set_track(&mut self, label: &str, value: f32) -> Result<()> {
        match self.resolve(label)? {
            TrackRef::Layer(id, track) => self.layers[id].set_track(track, value),
            TrackRef::Camera { target, axis } => {
                let v = if target {
                    &mut self.camera.target
                } else {
                    &mut self.camera.position
                };
                match axis {
                    0 => v.x = value,
                    1 => v.y = value,
                    _ => v.z = value,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InstanceBuffer;
    use crate::tensor::conv2d;

    /// `in -conv-> a -relu-> b -halve-> c`
    fn chain(sink: &mut InstanceBuffer) -> Scene {
        let cfg = VizConfig::default()
            .with_particles_per_size(4.0)
            .with_particle_reserve(256);
        let mut scene = Scene::new(sink, cfg);
        let input = Tensor::from_fn(vec![1, 4, 4], |i| (i as f32 * 0.37).sin() * 0.5);
        let weights = Tensor::from_fn(vec![1, 1, 3, 3], |i| (i as f32 - 4.0) * 0.05);
        let bias = [0.02];
        let a = conv2d(&input, &weights, &bias, 1).unwrap();
        let b = a.map(|v| v.max(0.0));
        let c = b.map(|v| v * 0.5);

        let layout = |y: f32| GridLayout::new(Vec3::new(0.0, y, 0.0));
        let g0 = scene.add_grid(sink, "in", &input, layout(0.0)).unwrap();
        let g1 = scene.add_grid(sink, "a", &a, layout(6.0)).unwrap();
        let g2 = scene.add_grid(sink, "b", &b, layout(12.0)).unwrap();
        let g3 = scene.add_grid(sink, "c", &c, layout(18.0)).unwrap();
        scene
            .add_conv(sink, "A", g0, g1, &ConvParams::new(weights, bias.to_vec(), 1))
            .unwrap();
        scene.add_transition("B", g1, g2).unwrap();
        scene.add_transition("C", g2, g3).unwrap();
        sink.build();
        scene.init(sink).unwrap();
        scene
    }

    #[test]
    fn focused_layer_updates_last() {
        let mut sink = InstanceBuffer::new();
        let mut scene = chain(&mut sink);

        scene.set_track("B: Time", 0.5).unwrap();
        let report = scene.update(&mut sink).unwrap();
        assert_eq!(report.focus, Some(1));
        assert_eq!(report.order, vec![0, 2, 1]);
        assert_eq!(scene.layers()[0].state().phase, Phase::Done);
        assert_eq!(scene.layers()[1].state().phase, Phase::Active);
        assert_eq!(scene.layers()[2].state().phase, Phase::Pending);
        assert_eq!(scene.layers()[0].state().stage, 5.0);
        assert_eq!(scene.layers()[2].state().stage, 0.0);
        assert_eq!(scene.grids()[1].revealed_count(), scene.grids()[1].len());

        let idle = scene.update(&mut sink).unwrap();
        assert_eq!(idle, UpdateReport::default());
    }

    #[test]
    fn later_focus_finishes_earlier_layers() {
        let mut sink = InstanceBuffer::new();
        let mut scene = chain(&mut sink);

        scene.set_track("C: Time", 1.0).unwrap();
        let report = scene.update(&mut sink).unwrap();
        assert_eq!(report.order, vec![0, 1, 2]);
        assert_eq!(scene.layers()[1].state().stage, 1.0);
        assert!(!scene.grids()[1].is_shown());
        assert!(scene.grids()[3].is_shown());
    }

    #[test]
    fn track_labels_resolve() {
        let mut sink = InstanceBuffer::new();
        let mut scene = chain(&mut sink);
        let labels = scene.track_labels();
        assert_eq!(labels[0], "A: Time");
        assert!(labels.contains(&"A: Filter".to_string()));
        assert!(labels.contains(&"B: Time".to_string()));
        assert!(!labels.contains(&"B: X".to_string()));
        assert_eq!(labels.last().map(String::as_str), Some("Camera tgt.z"));
        for label in &labels {
            scene.track(label).unwrap();
        }

        scene.set_track("Camera pos.y", 7.0).unwrap();
        assert_eq!(scene.camera().position, Vec3::new(2.0, 7.0, 2.0));
        scene.set_track("A: X", 1.0).unwrap();
        assert_eq!(scene.track("A: X").unwrap(), 1.0);
        assert!(matches!(
            scene.set_track("Z: Time", 0.0),
            Err(VizError::UnknownTrack(_))
        ));
        assert!(matches!(
            scene.track("Camera pos.w"),
            Err(VizError::UnknownTrack(_))
        ));
    }

    #[test]
    fn layer_names_are_unique() {
        let mut sink = InstanceBuffer::new();
        let mut scene = chain(&mut sink);
        assert!(matches!(
            scene.add_transition("B", 1, 2),
            Err(VizError::DuplicateLayer(_))
        ));
    }
}

//! Seam towards the rendering collaborator.
//!
//! The core never talks to a graphics API. It registers instances of a handful of
//! models, updates their transforms, and raises a coalescing "rebuild needed" flag.
//! [`InstanceBuffer`] is the host-side mirror of what the renderer uploads.

use crate::error::{Result, VizError};
use crate::math::Transform;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Models the scene instantiates. Each maps to one mesh/material pair renderer-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModelKind {
    CubePositive,
    CubeNegative,
    /// Translucent variants for cells being built out of particles.
    CubePositivePartial,
    CubeNegativePartial,
    Filler,
    Glass,
    ParticlePositive,
    ParticlePositiveShell,
    ParticleNegative,
    ParticleNegativeShell,
    ParticleNeutral,
}

pub type InstanceId = u32;

pub trait InstanceSink {
    fn add_instance(&mut self, model: ModelKind, transform: Transform) -> InstanceId;

    fn set_transform(&mut self, id: InstanceId, transform: Transform) -> Result<()>;

    /// Mark the acceleration structure stale. Cheap and idempotent.
    fn request_rebuild(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub model: ModelKind,
    pub transform: Transform,
}

/// Host mirror of the instance list plus the TLAS-side copy of the transforms.
///
/// Instances are registered while the scene is assembled; `build()` creates the
/// acceleration-structure copy, after which transforms can be updated. Instances are
/// never removed: hiding collapses them to zero scale.
#[derive(Debug, Default)]
pub struct InstanceBuffer {
    instances: Vec<Instance>,
    tlas: Option<Vec<Transform>>,
    rebuild: bool,
    rebuilds: u64,
}

impl InstanceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn is_built(&self) -> bool {
        self.tlas.is_some()
    }

    pub fn build(&mut self) {
        self.tlas = Some(self.instances.iter().map(|i| i.transform).collect());
        self.rebuild = false;
        tracing::debug!("Acceleration structure built over {} instances", self.len());
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id as usize)
    }

    pub fn transform(&self, id: InstanceId) -> Option<Transform> {
        self.instance(id).map(|i| i.transform)
    }

    pub fn tlas(&self) -> Result<&[Transform]> {
        self.tlas.as_deref().ok_or(VizError::AccelerationNotBuilt)
    }

    /// Packed 3×4 matrices ready for upload.
    pub fn tlas_bytes(&self) -> Result<&[u8]> {
        Ok(bytemuck::cast_slice(self.tlas()?))
    }

    pub fn needs_rebuild(&self) -> bool {
        self.rebuild
    }

    /// Called once per submitted frame. Returns whether a rebuild was pending.
    pub fn take_rebuild(&mut self) -> bool {
        let pending = core::mem::take(&mut self.rebuild);
        if pending {
            self.rebuilds = self.rebuilds.wrapping_add(1);
        }
        pending
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Instances currently drawn with a non-zero scale.
    pub fn visible_count(&self, model: ModelKind) -> usize {
        self.instances
            .iter()
            .filter(|i| i.model == model && !i.transform.is_hidden())
            .count()
    }
}

impl InstanceSink for InstanceBuffer {
    fn add_instance(&mut self, model: ModelKind, transform: Transform) -> InstanceId {
        self.instances.push(Instance { model, transform });
        if let Some(tlas) = self.tlas.as_mut() {
            tlas.push(transform);
            self.rebuild = true;
        }
        (self.instances.len() - 1) as InstanceId
    }

    fn set_transform(&mut self, id: InstanceId, transform: Transform) -> Result<()> {
        let tlas = self.tlas.as_mut().ok_or(VizError::AccelerationNotBuilt)?;
        let slot = self
            .instances
            .get_mut(id as usize)
            .ok_or(VizError::UnknownInstance(id))?;
        slot.transform = transform;
        tlas[id as usize] = transform;
        Ok(())
    }

    fn request_rebuild(&mut self) {
        self.rebuild = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn transform_updates_require_a_built_structure() {
        let mut buf = InstanceBuffer::new();
        let id = buf.add_instance(ModelKind::Glass, Transform::HIDDEN);
        assert!(matches!(
            buf.set_transform(id, Transform::IDENTITY),
            Err(VizError::AccelerationNotBuilt)
        ));
        assert!(buf.tlas().is_err());

        buf.build();
        buf.set_transform(id, Transform::translation(Vec3::Y)).unwrap();
        assert_eq!(buf.tlas().unwrap()[0].translation_part(), Vec3::Y);
        assert_eq!(buf.tlas_bytes().unwrap().len(), 48);
    }

    #[test]
    fn rebuild_flag_coalesces() {
        let mut buf = InstanceBuffer::new();
        buf.build();
        buf.request_rebuild();
        buf.request_rebuild();
        assert!(buf.take_rebuild());
        assert!(!buf.take_rebuild());
        assert_eq!(buf.rebuild_count(), 1);
    }
}

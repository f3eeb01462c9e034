//! Fixed-capacity particle arena.
//!
//! Every particle is four renderer instances (signed core, shell, filler, neutral
//! core) registered once at reservation time. Filters check particles out for the
//! lifetime of one flow and hand them back afterwards; the pool tracks which slots
//! are out, so ownership never depends on anyone holding a pointer.

use std::collections::VecDeque;

use crate::error::{Result, VizError};
use crate::math::Transform;
use crate::render::{InstanceId, InstanceSink, ModelKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    fn index(self) -> usize {
        match self {
            Polarity::Positive => 0,
            Polarity::Negative => 1,
        }
    }
}

/// Renderer instances making up one particle. Always moved and hidden together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleInstances {
    pub signed: InstanceId,
    pub shell: InstanceId,
    pub filler: InstanceId,
    pub neutral: InstanceId,
}

impl ParticleInstances {
    pub fn all(&self) -> [InstanceId; 4] {
        [self.signed, self.shell, self.filler, self.neutral]
    }
}

/// Opaque checked-out particle.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ParticleHandle {
    polarity: Polarity,
    slot: u32,
}

impl ParticleHandle {
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }
}

#[derive(Debug)]
struct Slot {
    instances: ParticleInstances,
    checked_out: bool,
}

#[derive(Debug, Default)]
struct FreeList {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
}

#[derive(Debug, Default)]
pub struct ParticlePool {
    lists: [FreeList; 2],
}

impl ParticlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `per_polarity` positive and as many negative particles with the sink.
    pub fn reserve(sink: &mut dyn InstanceSink, per_polarity: usize) -> Self {
        let mut pool = Self::new();
        for _ in 0..per_polarity {
            pool.push_slot(sink, Polarity::Positive);
            pool.push_slot(sink, Polarity::Negative);
        }
        tracing::debug!("Reserved {} particles per polarity", per_polarity);
        pool
    }

    fn push_slot(&mut self, sink: &mut dyn InstanceSink, polarity: Polarity) {
        let (core, shell) = match polarity {
            Polarity::Positive => (ModelKind::ParticlePositive, ModelKind::ParticlePositiveShell),
            Polarity::Negative => (ModelKind::ParticleNegative, ModelKind::ParticleNegativeShell),
        };
        let instances = ParticleInstances {
            signed: sink.add_instance(core, Transform::HIDDEN),
            shell: sink.add_instance(shell, Transform::HIDDEN),
            filler: sink.add_instance(ModelKind::Filler, Transform::HIDDEN),
            neutral: sink.add_instance(ModelKind::ParticleNeutral, Transform::HIDDEN),
        };
        let list = &mut self.lists[polarity.index()];
        let slot = list.slots.len() as u32;
        list.slots.push(Slot {
            instances,
            checked_out: false,
        });
        list.free.push_back(slot);
    }

    pub fn acquire(&mut self, polarity: Polarity) -> Result<ParticleHandle> {
        let list = &mut self.lists[polarity.index()];
        let slot = list
            .free
            .pop_front()
            .ok_or(VizError::PoolExhausted(polarity))?;
        list.slots[slot as usize].checked_out = true;
        Ok(ParticleHandle { polarity, slot })
    }

    pub fn release(&mut self, handle: ParticleHandle) -> Result<()> {
        let list = &mut self.lists[handle.polarity.index()];
        let entry = list
            .slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.checked_out)
            .ok_or(VizError::ParticleNotCheckedOut {
                polarity: handle.polarity,
                slot: handle.slot,
            })?;
        entry.checked_out = false;
        list.free.push_back(handle.slot);
        Ok(())
    }

    pub fn instances(&self, handle: &ParticleHandle) -> ParticleInstances {
        self.lists[handle.polarity.index()].slots[handle.slot as usize].instances
    }

    pub fn free(&self, polarity: Polarity) -> usize {
        self.lists[polarity.index()].free.len()
    }

    /// Capacity per polarity.
    pub fn reserved(&self, polarity: Polarity) -> usize {
        self.lists[polarity.index()].slots.len()
    }

    pub fn checked_out(&self) -> usize {
        self.lists
            .iter()
            .map(|l| l.slots.len() - l.free.len())
            .sum()
    }
}

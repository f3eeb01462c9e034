use crate::config::VizConfig;
use crate::error::Result;
use crate::math::{Transform, Vec3};
use crate::pool::{ParticleHandle, ParticlePool, Polarity};
use crate::render::InstanceSink;

/// A checked-out particle plus how it should be drawn.
///
/// Splashing particles belong to a merging pair and flash the neutral core as they
/// meet; the others grow a filler block at their destination.
#[derive(Debug)]
pub struct Particle {
    handle: ParticleHandle,
    pub splashing: bool,
}

impl Particle {
    pub fn acquire(pool: &mut ParticlePool, polarity: Polarity, splashing: bool) -> Result<Self> {
        Ok(Self {
            handle: pool.acquire(polarity)?,
            splashing,
        })
    }

    pub fn polarity(&self) -> Polarity {
        self.handle.polarity()
    }

    /// Draw the particle at `position`.
    ///
    /// `filler` in `[0,1]` trades the glowing core for the arrival visual; `show`
    /// in `[0,1]` fades the whole particle in. Both are clamped.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &self,
        pool: &ParticlePool,
        sink: &mut dyn InstanceSink,
        cfg: &VizConfig,
        position: Vec3,
        filler: f32,
        filler_scale: Vec3,
        show: f32,
    ) -> Result<()> {
        let filler = filler.clamp(0.0, 1.0);
        let show = show.clamp(0.0, 1.0);
        let ids = pool.instances(&self.handle);

        let core = (1.0 - filler) * show;
        sink.set_transform(
            ids.signed,
            Transform::translate_scale(position, Vec3::splat(core * cfg.particle_scale)),
        )?;
        sink.set_transform(
            ids.shell,
            Transform::translate_scale(position, Vec3::splat(core * cfg.shell_scale)),
        )?;

        if self.splashing {
            let splash = if filler >= 1.0 {
                0.0
            } else {
                filler * cfg.particle_scale * show
            };
            sink.set_transform(
                ids.neutral,
                Transform::translate_scale(position, Vec3::splat(splash)),
            )?;
            sink.set_transform(ids.filler, Transform::HIDDEN)?;
        } else {
            sink.set_transform(
                ids.filler,
                Transform::translate_scale(position, filler_scale * (filler * show)),
            )?;
            sink.set_transform(ids.neutral, Transform::HIDDEN)?;
        }

        sink.request_rebuild();
        Ok(())
    }

    pub fn hide(&self, pool: &ParticlePool, sink: &mut dyn InstanceSink) -> Result<()> {
        for id in pool.instances(&self.handle).all() {
            sink.set_transform(id, Transform::HIDDEN)?;
        }
        sink.request_rebuild();
        Ok(())
    }

    /// Hide and give the slot back.
    pub fn retire(self, pool: &mut ParticlePool, sink: &mut dyn InstanceSink) -> Result<()> {
        let hidden = self.hide(pool, sink);
        pool.release(self.handle)?;
        hidden
    }
}

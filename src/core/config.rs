#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunables shared by every cell, filter and layer in a scene.
///
/// Everything here is visual policy; none of it changes the numbers being shown.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VizConfig {
    /// Particles emitted per unit of |contribution|.
    pub particles_per_size: f32,
    /// Particles reserved per polarity. Flows needing more fail with `PoolExhausted`.
    pub particle_reserve: usize,

    /// Amplitude of the per-particle start jitter, in flow-range units.
    pub time_offset: f32,
    /// Share of the flow range a single particle spends travelling.
    pub flight_fraction: f32,

    /// Largest visual cube width. Values beyond are clamped.
    pub max_size: f32,
    /// Positions farther from the origin than this are a wiring bug.
    pub max_position: f32,

    pub particle_scale: f32,
    pub shell_scale: f32,

    /// Height of filter weight cells above the input cells they cover.
    pub weight_lift: f32,
    /// Height of the lift/drop hop while a filter moves to its next window.
    pub move_lift: f32,
    /// Height above the higher partner where merging pairs meet.
    pub merge_height: f32,

    /// Allowed |recomputed − ground truth| before recompute fails.
    pub divergence_tolerance: f32,

    /// Frames per window in generated sweep sequences.
    pub frames_per_step: u32,

    pub seed: u64,
}

impl Default for VizConfig {
    fn default() -> Self {
        Self {
            particles_per_size: 64.0,
            particle_reserve: 4096,
            time_offset: 0.1,
            flight_fraction: 0.5,
            max_size: 1.0,
            max_position: 10_000.0,
            particle_scale: 0.01,
            shell_scale: 0.03,
            weight_lift: 1.2,
            move_lift: 0.6,
            merge_height: 0.5,
            divergence_tolerance: 1.0e-6,
            frames_per_step: 30,
            seed: 0x5EED,
        }
    }
}

impl VizConfig {
    pub fn with_particle_reserve(mut self, reserve: usize) -> Self {
        self.particle_reserve = reserve;
        self
    }

    pub fn with_particles_per_size(mut self, n: f32) -> Self {
        self.particles_per_size = n.max(0.0);
        self
    }

    /// `CONVVIZ_*` environment overrides on top of `self`.
    pub fn apply_env(mut self) -> Self {
        // CONVVIZ_PARTICLES_PER_SIZE=64
        if let Some(v) = env_parse::<f32>("CONVVIZ_PARTICLES_PER_SIZE") {
            self.particles_per_size = v.max(0.0);
        }
        // CONVVIZ_PARTICLE_RESERVE=4096
        if let Some(v) = env_parse::<usize>("CONVVIZ_PARTICLE_RESERVE") {
            self.particle_reserve = v;
        }
        // CONVVIZ_FRAMES_PER_STEP=30
        if let Some(v) = env_parse::<u32>("CONVVIZ_FRAMES_PER_STEP") {
            self.frames_per_step = v.max(1);
        }
        // CONVVIZ_SEED=24301
        if let Some(v) = env_parse::<u64>("CONVVIZ_SEED") {
            self.seed = v;
        }
        self
    }
}

fn env_parse<T: core::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

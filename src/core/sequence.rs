//! Keyframed tracks replayed against a [`Scene`].

use crate::error::{Result, VizError};
use crate::layer::LayerTrack;
use crate::scene::Scene;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_FPS: u32 = 30;

/// Keyframes of one track, sorted by frame, at most one per frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackKeys {
    pub label: String,
    pub keyframes: Vec<(u32, f32)>,
}

impl TrackKeys {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            keyframes: Vec::new(),
        }
    }

    /// Insert, replacing any key already at `frame`.
    pub fn insert(&mut self, frame: u32, value: f32) {
        match self.keyframes.binary_search_by_key(&frame, |(f, _)| *f) {
            Ok(i) => self.keyframes[i].1 = value,
            Err(i) => self.keyframes.insert(i, (frame, value)),
        }
    }

    /// Linear between neighbouring keys, held flat before the first and after the last.
    pub fn value_at(&self, frame: u32) -> Option<f32> {
        let (first, last) = (self.keyframes.first()?, self.keyframes.last()?);
        if frame <= first.0 {
            return Some(first.1);
        }
        if frame >= last.0 {
            return Some(last.1);
        }
        let i = self.keyframes.partition_point(|(f, _)| *f <= frame);
        let (f0, v0) = self.keyframes[i - 1];
        let (f1, v1) = self.keyframes[i];
        let t = (frame - f0) as f32 / (f1 - f0) as f32;
        Some(v0 + (v1 - v0) * t)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sequence {
    pub fps: u32,
    /// Frame count; playable frames are `0..frames`.
    pub frames: u32,
    pub tracks: Vec<TrackKeys>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(DEFAULT_FPS)
    }
}

impl Sequence {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            frames: 0,
            tracks: Vec::new(),
        }
    }

    pub fn track(&self, label: &str) -> Option<&TrackKeys> {
        self.tracks.iter().find(|t| t.label == label)
    }

    pub fn add_keyframe(&mut self, label: &str, frame: u32, value: f32) {
        let i = match self.tracks.iter().position(|t| t.label == label) {
            Some(i) => i,
            None => {
                self.tracks.push(TrackKeys::new(label));
                self.tracks.len() - 1
            }
        };
        self.tracks[i].insert(frame, value);
        self.frames = self.frames.max(frame.saturating_add(1));
    }

    pub fn value_at(&self, label: &str, frame: u32) -> Option<f32> {
        self.track(label)?.value_at(frame)
    }

    /// Write every track's value at `frame` into the scene's desired state. The
    /// caller runs [`Scene::update`] afterwards.
    pub fn apply(&self, frame: u32, scene: &mut Scene) -> Result<()> {
        for track in &self.tracks {
            if let Some(v) = track.value_at(frame) {
                scene.set_track(&track.label, v)?;
            }
        }
        Ok(())
    }

    /// Walk `layer` through every window in enumeration order.
    ///
    /// Each window gets `frames_per_step + 1` frames: the first jumps the window
    /// tracks and resets the stage, the last reaches the maximum stage.
    pub fn full_sweep(scene: &Scene, layer: &str, frames_per_step: u32) -> Result<Self> {
        let id = scene
            .layer_by_name(layer)
            .ok_or_else(|| VizError::UnknownTrack(format!("{layer}: Time")))?;
        let windowed = scene.layers()[id].kind().conv().is_some();
        let bounds = scene.layers()[id].bounds();
        let step = frames_per_step.max(1);
        let label = |t: LayerTrack| format!("{layer}: {}", t.suffix());

        let mut seq = Sequence::new(DEFAULT_FPS);
        if windowed {
            seq.add_keyframe(&label(LayerTrack::Visible), 0, 1.0);
        }
        for (k, w) in bounds.windows.iter().enumerate() {
            let start = k as u32 * (step + 1);
            let end = start + step;
            if windowed {
                for frame in [start, end] {
                    seq.add_keyframe(&label(LayerTrack::X), frame, w.x as f32);
                    seq.add_keyframe(&label(LayerTrack::Y), frame, w.y as f32);
                    seq.add_keyframe(&label(LayerTrack::Filter), frame, w.z as f32);
                }
            }
            seq.add_keyframe(&label(LayerTrack::Time), start, bounds.stage_min);
            seq.add_keyframe(&label(LayerTrack::Time), end, bounds.stage_max);
        }
        tracing::debug!(
            "Sweep over '{}': {} windows, {} frames",
            layer,
            bounds.windows.count(),
            seq.frames
        );
        Ok(seq)
    }

    /// Splice `other` in after the last frame of `self`.
    pub fn append(&mut self, other: &Sequence) {
        let offset = self.frames;
        for track in &other.tracks {
            for &(frame, value) in &track.keyframes {
                self.add_keyframe(&track.label, offset + frame, value);
            }
        }
        self.frames = self.frames.max(offset + other.frames);
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "serde")]
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VizConfig;
    use crate::grid::GridLayout;
    use crate::layer::{ConvParams, Phase};
    use crate::math::Vec3;
    use crate::render::InstanceBuffer;
    use crate::tensor::{conv2d, Tensor};

    fn conv_scene(sink: &mut InstanceBuffer) -> Scene {
        let cfg = VizConfig::default()
            .with_particles_per_size(6.0)
            .with_particle_reserve(512);
        let mut scene = Scene::new(sink, cfg);
        let input = Tensor::from_fn(vec![2, 4, 4], |i| ((i * 5) % 9) as f32 * 0.1 - 0.4);
        let weights = Tensor::from_fn(vec![2, 2, 2, 2], |i| ((i * 3) % 7) as f32 * 0.05 - 0.15);
        let bias = vec![0.1, -0.1];
        let output = conv2d(&input, &weights, &bias, 2).unwrap();
        let g0 = scene
            .add_grid(sink, "in", &input, GridLayout::new(Vec3::ZERO))
            .unwrap();
        let g1 = scene
            .add_grid(sink, "out", &output, GridLayout::new(Vec3::new(0.0, 8.0, 0.0)))
            .unwrap();
        scene
            .add_conv(sink, "conv", g0, g1, &ConvParams::new(weights, bias, 2))
            .unwrap();
        sink.build();
        scene.init(sink).unwrap();
        scene
    }

    #[test]
    fn value_at_interpolates_and_holds() {
        let mut t = TrackKeys::new("a");
        assert_eq!(t.value_at(3), None);
        t.insert(10, 1.0);
        t.insert(0, 0.0);
        t.insert(20, 1.0);
        t.insert(20, 3.0);
        assert_eq!(t.keyframes.len(), 3);
        assert_eq!(t.value_at(0), Some(0.0));
        assert_eq!(t.value_at(5), Some(0.5));
        assert_eq!(t.value_at(15), Some(2.0));
        assert_eq!(t.value_at(99), Some(3.0));
    }

    #[test]
    fn sweep_spans_every_window() {
        let mut sink = InstanceBuffer::new();
        let scene = conv_scene(&mut sink);
        let seq = Sequence::full_sweep(&scene, "conv", 10).unwrap();
        // 2×2 positions × 2 filters.
        assert_eq!(seq.frames, 8 * 11);
        assert_eq!(seq.value_at("conv: Time", 0), Some(0.0));
        assert_eq!(seq.value_at("conv: Time", 10), Some(5.0));
        assert_eq!(seq.value_at("conv: Time", 11), Some(0.0));
        assert_eq!(seq.value_at("conv: Filter", 11), Some(1.0));
        assert_eq!(seq.value_at("conv: X", 87), Some(1.0));
        assert!(matches!(
            Sequence::full_sweep(&scene, "nope", 10),
            Err(VizError::UnknownTrack(_))
        ));
    }

    #[test]
    fn replay_finishes_on_the_last_window() {
        let mut sink = InstanceBuffer::new();
        let mut scene = conv_scene(&mut sink);
        let seq = Sequence::full_sweep(&scene, "conv", 4).unwrap();
        for frame in 0..seq.frames {
            seq.apply(frame, &mut scene).unwrap();
            scene.update(&mut sink).unwrap();
        }
        let layer = &scene.layers()[0];
        assert_eq!(layer.state().window, crate::window::Window::new(1, 1, 1));
        assert_eq!(layer.state().phase, Phase::Active);
        assert_eq!(layer.state().stage, 5.0);
        let out = &scene.grids()[1];
        assert_eq!(out.revealed_count(), out.len());
        assert_eq!(scene.pool().checked_out(), 0);
    }

    #[test]
    fn append_shifts_frames() {
        let mut a = Sequence::default();
        a.add_keyframe("x: Time", 0, 0.0);
        a.add_keyframe("x: Time", 9, 5.0);
        let mut b = Sequence::default();
        b.add_keyframe("y: Time", 0, 0.0);
        b.add_keyframe("y: Time", 4, 1.0);
        a.append(&b);
        assert_eq!(a.frames, 15);
        assert_eq!(a.value_at("y: Time", 14), Some(1.0));
        assert_eq!(a.value_at("y: Time", 3), Some(0.0));
        assert_eq!(a.value_at("x: Time", 14), Some(5.0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_document_shape() {
        let mut seq = Sequence::default();
        seq.add_keyframe("Camera pos.x", 4, 2.5);
        let json = seq.to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["fps"], 30);
        assert_eq!(v["frames"], 5);
        assert_eq!(v["tracks"][0]["label"], "Camera pos.x");
        assert_eq!(v["tracks"][0]["keyframes"][0][0], 4);
        assert_eq!(Sequence::from_json(&json).unwrap(), seq);
    }
}

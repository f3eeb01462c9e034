use crate::math::Vec3;

/// Cubic Bézier over four control points.
///
/// `time_offset` is where the curve's flight starts on the owning filter's flow
/// clock; [`Curve::local_time`] maps that clock onto the curve parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub time_offset: f32,
    pub p1: Vec3,
    pub p2: Vec3,
    pub p3: Vec3,
    pub p4: Vec3,
}

impl Curve {
    pub fn new(p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3) -> Self {
        Self {
            time_offset: 0.0,
            p1,
            p2,
            p3,
            p4,
        }
    }

    /// Straight segment with zero velocity at both ends.
    pub fn eased(from: Vec3, to: Vec3) -> Self {
        Self::new(from, from, to, to)
    }

    pub fn with_time_offset(mut self, offset: f32) -> Self {
        self.time_offset = offset;
        self
    }

    /// Curve parameter at flow time `u` for a flight lasting `duration`. Not clamped.
    pub fn local_time(&self, u: f32, duration: f32) -> f32 {
        (u - self.time_offset) / duration
    }

    pub fn evaluate(&self, t: f32) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        // Exact endpoints, independent of float noise in the blend.
        if t == 0.0 {
            return self.p1;
        }
        if t == 1.0 {
            return self.p4;
        }
        let u = 1.0 - t;
        let b1 = u * u * u;
        let b2 = 3.0 * u * u * t;
        let b3 = 3.0 * u * t * t;
        let b4 = t * t * t;
        self.p1 * b1 + self.p2 * b2 + self.p3 * b3 + self.p4 * b4
    }
}

/// Piecewise path made of consecutive curves, each owning a share of `[0,1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    segments: Vec<(f32, Curve)>,
}

impl Path {
    /// `segments` pairs a relative length with its curve; lengths are normalized.
    pub fn new(segments: Vec<(f32, Curve)>) -> Self {
        let total: f32 = segments.iter().map(|(w, _)| w.max(0.0)).sum();
        let segments = if total > 0.0 {
            segments
                .into_iter()
                .map(|(w, c)| (w.max(0.0) / total, c))
                .collect()
        } else {
            segments
        };
        Self { segments }
    }

    pub fn evaluate(&self, t: f32) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        let mut start = 0.0;
        for (i, (len, curve)) in self.segments.iter().enumerate() {
            let last = i + 1 == self.segments.len();
            if t < start + len || last {
                let local = if *len > 0.0 { (t - start) / len } else { 1.0 };
                return curve.evaluate(local);
            }
            start += len;
        }
        Vec3::ZERO
    }
}

use core::ops::{Add, Mul, Sub};

use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const Y: Vec3 = Vec3::new(0.0, 1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    #[inline]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    #[inline]
    pub fn mul_elem(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x * o.x, self.y * o.y, self.z * o.z)
    }

    #[inline]
    pub fn with_y(self, y: f32) -> Vec3 {
        Vec3::new(self.x, y, self.z)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    #[inline]
    fn add(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    #[inline]
    fn sub(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    #[inline]
    fn mul(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Mul<Vec3> for f32 {
    type Output = Vec3;
    #[inline]
    fn mul(self, v: Vec3) -> Vec3 {
        v * self
    }
}

/// Linear interpolation on scalars. `t` is not clamped.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Affine instance transform, 3 rows × 4 columns, row-major.
///
/// Same layout as the acceleration-structure instance matrix the renderer uploads,
/// so a slice of these can be handed over with `bytemuck::cast_slice`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Transform {
    pub rows: [[f32; 4]; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// All-zero transform: the instance collapses to a point at the origin.
    pub const HIDDEN: Transform = Transform {
        rows: [[0.0; 4]; 3],
    };

    pub fn translation(t: Vec3) -> Self {
        let mut m = Self::IDENTITY;
        m.rows[0][3] = t.x;
        m.rows[1][3] = t.y;
        m.rows[2][3] = t.z;
        m
    }

    pub fn scale(s: Vec3) -> Self {
        Transform {
            rows: [
                [s.x, 0.0, 0.0, 0.0],
                [0.0, s.y, 0.0, 0.0],
                [0.0, 0.0, s.z, 0.0],
            ],
        }
    }

    pub fn rotation_x(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Transform {
            rows: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, c, -s, 0.0],
                [0.0, s, c, 0.0],
            ],
        }
    }

    pub fn rotation_z(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Transform {
            rows: [
                [c, -s, 0.0, 0.0],
                [s, c, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }

    /// Translation followed by uniform scale, the common particle case.
    pub fn translate_scale(t: Vec3, s: Vec3) -> Self {
        Transform {
            rows: [
                [s.x, 0.0, 0.0, t.x],
                [0.0, s.y, 0.0, t.y],
                [0.0, 0.0, s.z, t.z],
            ],
        }
    }

    /// `self * rhs` with both treated as 4×4 matrices with an implicit `[0 0 0 1]` row.
    pub fn then(&self, rhs: &Transform) -> Transform {
        let a = &self.rows;
        let b = &rhs.rows;
        let mut out = [[0.0f32; 4]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                let mut acc = a[r][0] * b[0][c] + a[r][1] * b[1][c] + a[r][2] * b[2][c];
                if c == 3 {
                    acc += a[r][3];
                }
                *v = acc;
            }
        }
        Transform { rows: out }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.rows;
        Vec3::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
            m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
        )
    }

    pub fn translation_part(&self) -> Vec3 {
        Vec3::new(self.rows[0][3], self.rows[1][3], self.rows[2][3])
    }

    pub fn is_hidden(&self) -> bool {
        (0..3).all(|r| (0..3).all(|c| self.rows[r][c] == 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_translation_and_scale() {
        let t = Transform::translation(Vec3::new(1.0, 2.0, 3.0))
            .then(&Transform::scale(Vec3::new(2.0, 3.0, 4.0)));
        let p = t.transform_point(Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Vec3::new(3.0, 5.0, 7.0));
        assert_eq!(
            t,
            Transform::translate_scale(Vec3::new(1.0, 2.0, 3.0), Vec3::new(2.0, 3.0, 4.0))
        );
    }

    #[test]
    fn quarter_turn_about_z_maps_y_onto_minus_x() {
        let r = Transform::rotation_z(core::f32::consts::FRAC_PI_2);
        let p = r.transform_point(Vec3::Y);
        assert!((p.x + 1.0).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
    }

    #[test]
    fn hidden_transform_is_zero_scale() {
        assert!(Transform::HIDDEN.is_hidden());
        assert!(!Transform::IDENTITY.is_hidden());
    }
}

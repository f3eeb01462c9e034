//! Dense numeric inputs and the reference forward ops used to produce ground truth.
//!
//! Layout is channel-major, row-major: shape `[depth, height, width]`, value index
//! `(z * height + y) * width + x`. Conv weights are `[out, in, kh, kw]`.

use crate::error::{Result, VizError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if expected != values.len() {
            return Err(VizError::ShapeMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            values: vec![0.0; n],
        }
    }

    pub fn from_fn(shape: Vec<usize>, mut f: impl FnMut(usize) -> f32) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            values: (0..n).map(&mut f).collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(width, height, depth)`. A flat vector of `n` reads as `1 × 1 × n`.
    pub fn dims3(&self) -> (usize, usize, usize) {
        match self.shape.as_slice() {
            [] => (1, 1, 1),
            [n] => (1, 1, *n),
            [h, w] => (*w, *h, 1),
            [d, h, w] => (*w, *h, *d),
            [lead @ .., h, w] => (*w, *h, lead.iter().product()),
        }
    }

    pub fn at(&self, x: usize, y: usize, z: usize) -> f32 {
        let (w, h, _) = self.dims3();
        self.values[(z * h + y) * w + x]
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            values: self.values.iter().map(|v| f(*v)).collect(),
        }
    }
}

/// `Σ sources[i] · weights[i]` accumulated in f64, in the given order.
///
/// Filters and the reference ops share this so ground truth and recomputation agree
/// to the last bit.
pub fn weighted_sum(sources: &[f32], weights: &[f32]) -> f64 {
    sources
        .iter()
        .zip(weights)
        .map(|(s, w)| f64::from(*s) * f64::from(*w))
        .sum()
}

/// Kernel geometry of a conv weight tensor `[out, in, kh, kw]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelShape {
    pub out_depth: usize,
    pub in_depth: usize,
    pub height: usize,
    pub width: usize,
}

impl KernelShape {
    pub fn of(weights: &Tensor) -> Result<Self> {
        match weights.shape() {
            [o, i, h, w] => Ok(Self {
                out_depth: *o,
                in_depth: *i,
                height: *h,
                width: *w,
            }),
            other => Err(VizError::ShapeMismatch {
                shape: other.to_vec(),
                expected: 4,
                actual: other.len(),
            }),
        }
    }

    pub fn per_filter(&self) -> usize {
        self.in_depth * self.height * self.width
    }
}

/// Input values under a kernel placed at `(x0, y0)`, ordered like the weights.
pub fn window_values(input: &Tensor, k: &KernelShape, x0: usize, y0: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(k.per_filter());
    for z in 0..k.in_depth {
        for j in 0..k.height {
            for i in 0..k.width {
                out.push(input.at(x0 + i, y0 + j, z));
            }
        }
    }
    out
}

pub fn conv2d(input: &Tensor, weights: &Tensor, bias: &[f32], stride: usize) -> Result<Tensor> {
    let k = KernelShape::of(weights)?;
    let (w, h, d) = input.dims3();
    let stride = stride.max(1);
    if d != k.in_depth || k.width > w || k.height > h || bias.len() != k.out_depth {
        return Err(VizError::WeightCountMismatch {
            sources: d * k.height * k.width,
            weights: k.per_filter(),
        });
    }
    let ow = (w - k.width) / stride + 1;
    let oh = (h - k.height) / stride + 1;

    let per = k.per_filter();
    let mut values = Vec::with_capacity(k.out_depth * oh * ow);
    for o in 0..k.out_depth {
        let filter = &weights.values()[o * per..(o + 1) * per];
        for y in 0..oh {
            for x in 0..ow {
                let src = window_values(input, &k, x * stride, y * stride);
                let v = weighted_sum(&src, filter) + f64::from(bias[o]);
                values.push(v as f32);
            }
        }
    }
    Tensor::new(vec![k.out_depth, oh, ow], values)
}

/// Average pooling as a convolution: only matching input/output channels
/// contribute, each with weight `1 / stride²`.
pub fn avg_pool_weights(depth: usize, stride: usize) -> Tensor {
    let stride = stride.max(1);
    let w = 1.0 / (stride * stride) as f32;
    let per = depth * stride * stride;
    Tensor::from_fn(vec![depth, depth, stride, stride], |idx| {
        let out = idx / per;
        let inp = (idx % per) / (stride * stride);
        if out == inp {
            w
        } else {
            0.0
        }
    })
}

pub fn avg_pool(input: &Tensor, stride: usize) -> Result<Tensor> {
    let (_, _, d) = input.dims3();
    conv2d(input, &avg_pool_weights(d, stride), &vec![0.0; d], stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_value_count_that_does_not_match_shape() {
        assert!(matches!(
            Tensor::new(vec![2, 3], vec![0.0; 5]),
            Err(VizError::ShapeMismatch { expected: 6, .. })
        ));
    }

    #[test]
    fn conv_matches_hand_computed_values() {
        // 4×5 ramp with a 2×3 kernel, as produced by the reference script.
        let data = Tensor::new(
            vec![4, 5],
            vec![
                -1., -0.9, -0.8, -0.7, -0.6, -0.5, -0.4, -0.3, -0.2, -0.1, 0.1, 0.2, 0.3, 0.4,
                0.5, 0.6, 0.7, 0.8, 0.9, 1.,
            ],
        )
        .unwrap();
        let weights =
            Tensor::new(vec![1, 1, 2, 3], vec![0.1, 0.2, 0.3, -0.2, 0.2, -0.3]).unwrap();
        let out = conv2d(&data, &weights, &[0.0], 1).unwrap();
        assert_eq!(out.shape(), &[1, 3, 3]);
        // -1*0.1 - 0.9*0.2 - 0.8*0.3 - 0.5*-0.2 - 0.4*0.2 - 0.3*-0.3
        assert!((out.at(0, 0, 0) - (-0.41)).abs() < 1e-6);
    }

    #[test]
    fn avg_pool_weights_are_diagonal_ninths() {
        let w = avg_pool_weights(9, 3);
        assert_eq!(w.shape(), &[9, 9, 3, 3]);
        for o in 0..9 {
            for i in 0..9 {
                for k in 0..9 {
                    let v = w.values()[(o * 9 + i) * 9 + k];
                    if o == i {
                        assert_eq!(v, 1.0 / 9.0);
                    } else {
                        assert_eq!(v, 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn avg_pool_averages_each_channel() {
        let t = Tensor::from_fn(vec![2, 2, 2], |i| i as f32);
        let p = avg_pool(&t, 2).unwrap();
        assert_eq!(p.shape(), &[2, 1, 1]);
        assert!((p.at(0, 0, 0) - 1.5).abs() < 1e-6);
        assert!((p.at(0, 0, 1) - 5.5).abs() < 1e-6);
    }

    #[test]
    fn flat_vectors_read_as_depth() {
        let t = Tensor::zeros(vec![10]);
        assert_eq!(t.dims3(), (1, 1, 10));
    }
}

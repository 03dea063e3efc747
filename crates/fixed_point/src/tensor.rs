//! Float and quantized tensors of rank 0, 1 or 2

use crate::error::{FixedPointError, Result};
use crate::fixed::{IntWidth, Quantizer};

/// Highest tensor rank any exported layer uses
pub const MAX_RANK: usize = 2;

fn check_shape(shape: &[usize], len: usize) -> Result<()> {
    if shape.len() > MAX_RANK {
        return Err(FixedPointError::InvalidRank(shape.len()));
    }
    let expected: usize = shape.iter().product();
    if expected != len {
        return Err(FixedPointError::DimensionMismatch { expected, got: len });
    }
    Ok(())
}

/// Row-major f32 tensor; a rank-0 tensor is a scalar
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create from a shape and row-major data
    pub fn from_shape(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        check_shape(&shape, data.len())?;
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Create a `rows × cols` matrix from row-major data
    pub fn matrix(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        Self::from_shape(vec![rows, cols], data)
    }

    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let len = shape.iter().product();
        Self::from_shape(shape, vec![0.0; len])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `index` of a matrix, or `None` if out of bounds or not rank 2
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if self.rank() != 2 || index >= self.shape[0] {
            return None;
        }
        let cols = self.shape[1];
        Some(&self.data[index * cols..(index + 1) * cols])
    }

    /// Element-wise map keeping the shape
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Clamp every element into `[-limit, limit]`
    pub fn clamp(&self, limit: f32) -> Self {
        self.map(|x| x.clamp(-limit, limit))
    }

    /// Count of elements with magnitude above `limit`
    pub fn count_outside(&self, limit: f32) -> usize {
        self.data.iter().filter(|x| x.abs() > limit).count()
    }

    /// First NaN or infinite element as `(flat_index, value)`
    pub fn first_non_finite(&self) -> Option<(usize, f32)> {
        self.data
            .iter()
            .copied()
            .enumerate()
            .find(|(_, x)| !x.is_finite())
    }

    /// Smallest and largest element, `None` when empty
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), x| (lo.min(x), hi.max(x))))
    }
}

/// Row-major integer tensor produced by a [`Quantizer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedTensor {
    shape: Vec<usize>,
    data: Vec<i32>,
    width: IntWidth,
}

impl QuantizedTensor {
    /// Create from raw integers, checking shape and width
    pub fn from_raw(shape: Vec<usize>, data: Vec<i32>, width: IntWidth) -> Result<Self> {
        check_shape(&shape, data.len())?;
        let limit = width.limit();
        if let Some(&bad) = data.iter().find(|&&x| (x as i64).abs() > limit) {
            return Err(FixedPointError::Overflow {
                value: bad as f64,
                limit,
            });
        }
        Ok(Self { shape, data, width })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[i32] {
        &self.data
    }

    pub fn width(&self) -> IntWidth {
        self.width
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `index` of a matrix, or `None` if out of bounds or not rank 2
    pub fn row(&self, index: usize) -> Option<&[i32]> {
        if self.rank() != 2 || index >= self.shape[0] {
            return None;
        }
        let cols = self.shape[1];
        Some(&self.data[index * cols..(index + 1) * cols])
    }
}

impl Quantizer {
    /// Quantize every element, keeping the source shape and order
    pub fn quantize_tensor(&self, tensor: &Tensor) -> Result<QuantizedTensor> {
        let data = tensor
            .data()
            .iter()
            .map(|&x| self.quantize(x))
            .collect::<Result<Vec<i32>>>()?;

        Ok(QuantizedTensor {
            shape: tensor.shape().to_vec(),
            data,
            width: self.width(),
        })
    }

    /// Map every element back to real values
    pub fn dequantize_tensor(&self, tensor: &QuantizedTensor) -> Tensor {
        Tensor {
            shape: tensor.shape.clone(),
            data: tensor.data.iter().map(|&x| self.dequantize(x)).collect(),
        }
    }
}

// ============================================================
// Layer 3 — Host Tensor
// ============================================================
// A framework-free tensor living in host memory: a shape plus
// typed values. This is what travels between the encoder pass,
// the shard files on disk and the collate functions.
//
// Only three element types are ever stored:
//   F32 — encoder outputs, multi-hot labels, raw frame pixels
//   U8  — quantized frame stacks (captioning cache)
//   I64 — token ids and attention masks
//
// Reference: Rust Book §6 (Enums), §8 (Vectors)

use thiserror::Error;

/// Shape / dtype violations found while building or combining host tensors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TensorShapeError {
    #[error("shape {shape:?} needs {expected} values but {actual} were given")]
    ElementCount {
        shape:    Vec<usize>,
        expected: usize,
        actual:   usize,
    },

    #[error("cannot concatenate {left} with {right}")]
    DtypeMismatch { left: &'static str, right: &'static str },

    #[error("trailing dims {left:?} and {right:?} differ")]
    TrailingDims { left: Vec<usize>, right: Vec<usize> },

    #[error("nothing to concatenate")]
    Empty,

    #[error("expected rank {expected}, got shape {shape:?}")]
    Rank { expected: usize, shape: Vec<usize> },
}

/// Typed storage behind a [`HostTensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    F32(Vec<f32>),
    U8(Vec<u8>),
    I64(Vec<i64>),
}

impl TensorValues {
    pub fn len(&self) -> usize {
        match self {
            TensorValues::F32(v) => v.len(),
            TensorValues::U8(v)  => v.len(),
            TensorValues::I64(v) => v.len(),
        }
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            TensorValues::F32(_) => "f32",
            TensorValues::U8(_)  => "u8",
            TensorValues::I64(_) => "i64",
        }
    }
}

/// Row-major tensor in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape:  Vec<usize>,
    values: TensorValues,
}

impl HostTensor {
    pub fn new(shape: Vec<usize>, values: TensorValues) -> Result<Self, TensorShapeError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(TensorShapeError::ElementCount {
                shape,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    pub fn f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self, TensorShapeError> {
        Self::new(shape, TensorValues::F32(values))
    }

    pub fn u8(shape: Vec<usize>, values: Vec<u8>) -> Result<Self, TensorShapeError> {
        Self::new(shape, TensorValues::U8(values))
    }

    pub fn i64(shape: Vec<usize>, values: Vec<i64>) -> Result<Self, TensorShapeError> {
        Self::new(shape, TensorValues::I64(values))
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &TensorValues {
        &self.values
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }

    pub fn dtype_name(&self) -> &'static str {
        self.values.dtype_name()
    }

    /// Size of the batch dimension. A rank-0 tensor counts as one item.
    pub fn leading_dim(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.values {
            TensorValues::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.values {
            TensorValues::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.values {
            TensorValues::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Values widened to f32, whatever the stored type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.values {
            TensorValues::F32(v) => v.clone(),
            TensorValues::U8(v)  => v.iter().map(|&x| x as f32).collect(),
            TensorValues::I64(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Saturating cast to u8: negatives and NaN become 0, values above 255
    /// become 255, fractions are truncated. Lossy for anything that is not
    /// already an integer pixel value.
    pub fn quantize_u8(&self) -> HostTensor {
        let values = match &self.values {
            TensorValues::F32(v) => v.iter().map(|&x| x as u8).collect(),
            TensorValues::U8(v)  => v.clone(),
            TensorValues::I64(v) => v.iter().map(|&x| x.clamp(0, 255) as u8).collect(),
        };
        HostTensor {
            shape:  self.shape.clone(),
            values: TensorValues::U8(values),
        }
    }

    /// Drops a singleton leading dimension; anything else is returned as is.
    pub fn squeeze_leading(mut self) -> HostTensor {
        if self.shape.len() > 1 && self.shape[0] == 1 {
            self.shape.remove(0);
        }
        self
    }

    pub fn unsqueeze_leading(mut self) -> HostTensor {
        self.shape.insert(0, 1);
        self
    }

    /// Ensures the tensor has exactly `rank` dims.
    pub fn expect_rank(&self, rank: usize) -> Result<(), TensorShapeError> {
        if self.shape.len() != rank {
            return Err(TensorShapeError::Rank {
                expected: rank,
                shape:    self.shape.clone(),
            });
        }
        Ok(())
    }

    /// Splits along dim 0 into tensors with a leading dim of 1.
    pub fn split_leading(&self) -> Vec<HostTensor> {
        let rows = self.leading_dim();
        if self.shape.is_empty() || rows == 0 {
            return Vec::new();
        }
        let stride = self.numel() / rows;
        let mut shape = self.shape.clone();
        shape[0] = 1;

        (0..rows)
            .map(|r| {
                let range = r * stride..(r + 1) * stride;
                let values = match &self.values {
                    TensorValues::F32(v) => TensorValues::F32(v[range].to_vec()),
                    TensorValues::U8(v)  => TensorValues::U8(v[range].to_vec()),
                    TensorValues::I64(v) => TensorValues::I64(v[range].to_vec()),
                };
                HostTensor { shape: shape.clone(), values }
            })
            .collect()
    }

    /// Keeps the first `n` entries along dim 0.
    pub fn truncate_leading(mut self, n: usize) -> HostTensor {
        let rows = self.leading_dim();
        if self.shape.is_empty() || n >= rows {
            return self;
        }
        let keep = n * (self.numel() / rows.max(1));
        match &mut self.values {
            TensorValues::F32(v) => v.truncate(keep),
            TensorValues::U8(v)  => v.truncate(keep),
            TensorValues::I64(v) => v.truncate(keep),
        }
        self.shape[0] = n;
        self
    }

    /// Appends zero entries along dim 0 until it has `n`.
    pub fn zero_pad_leading(mut self, n: usize) -> HostTensor {
        let rows = self.leading_dim();
        if self.shape.is_empty() || n <= rows {
            return self;
        }
        let stride = if rows == 0 {
            self.shape[1..].iter().product()
        } else {
            self.numel() / rows
        };
        let total = n * stride;
        match &mut self.values {
            TensorValues::F32(v) => v.resize(total, 0.0),
            TensorValues::U8(v)  => v.resize(total, 0),
            TensorValues::I64(v) => v.resize(total, 0),
        }
        self.shape[0] = n;
        self
    }

    /// Concatenates along dim 0. All parts must share dtype and trailing dims.
    pub fn concat_leading(parts: &[HostTensor]) -> Result<HostTensor, TensorShapeError> {
        let first = parts.first().ok_or(TensorShapeError::Empty)?;
        let trailing = first.shape.get(1..).unwrap_or(&[]).to_vec();

        let mut leading = 0usize;
        for part in parts {
            if part.dtype_name() != first.dtype_name() {
                return Err(TensorShapeError::DtypeMismatch {
                    left:  first.dtype_name(),
                    right: part.dtype_name(),
                });
            }
            let part_trailing = part.shape.get(1..).unwrap_or(&[]);
            if part_trailing != trailing.as_slice() {
                return Err(TensorShapeError::TrailingDims {
                    left:  trailing.clone(),
                    right: part_trailing.to_vec(),
                });
            }
            leading += part.leading_dim();
        }

        let values = match &first.values {
            TensorValues::F32(_) => TensorValues::F32(
                parts.iter().filter_map(|p| p.as_f32()).flatten().copied().collect(),
            ),
            TensorValues::U8(_) => TensorValues::U8(
                parts.iter().filter_map(|p| p.as_u8()).flatten().copied().collect(),
            ),
            TensorValues::I64(_) => TensorValues::I64(
                parts.iter().filter_map(|p| p.as_i64()).flatten().copied().collect(),
            ),
        };

        let mut shape = vec![leading];
        shape.extend(trailing);
        HostTensor::new(shape, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_element_count() {
        let err = HostTensor::f32(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, TensorShapeError::ElementCount { expected: 6, actual: 5, .. }));
    }

    #[test]
    fn test_concat_stacks_batches() {
        let a = HostTensor::f32(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = HostTensor::f32(vec![1, 2], vec![5.0, 6.0]).unwrap();
        let c = HostTensor::concat_leading(&[a, b]).unwrap();
        assert_eq!(c.shape(), &[3, 2]);
        assert_eq!(c.as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_concat_rejects_mixed_feature_dims() {
        let a = HostTensor::f32(vec![1, 2], vec![0.0; 2]).unwrap();
        let b = HostTensor::f32(vec![1, 3], vec![0.0; 3]).unwrap();
        assert!(matches!(
            HostTensor::concat_leading(&[a, b]),
            Err(TensorShapeError::TrailingDims { .. })
        ));
    }

    #[test]
    fn test_quantize_saturates() {
        let t = HostTensor::f32(vec![4], vec![-3.0, 12.7, 255.0, 300.0]).unwrap();
        assert_eq!(t.quantize_u8().as_u8().unwrap(), &[0, 12, 255, 255]);
    }

    #[test]
    fn test_split_pad_and_truncate() {
        let t = HostTensor::i64(vec![3, 2], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let rows = t.split_leading();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].shape(), &[1, 2]);
        assert_eq!(rows[1].as_i64().unwrap(), &[3, 4]);

        let padded = t.clone().zero_pad_leading(4);
        assert_eq!(padded.shape(), &[4, 2]);
        assert_eq!(padded.as_i64().unwrap(), &[1, 2, 3, 4, 5, 6, 0, 0]);
        assert_eq!(padded.truncate_leading(3), t);
    }

    #[test]
    fn test_squeeze_only_singleton() {
        let t = HostTensor::u8(vec![1, 2, 2], vec![0; 4]).unwrap().squeeze_leading();
        assert_eq!(t.shape(), &[2, 2]);
        let t = t.squeeze_leading();
        assert_eq!(t.shape(), &[2, 2]);
    }
}

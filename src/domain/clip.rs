// ============================================================
// Layer 3 — Clip and Sample Types
// ============================================================
// The item types that flow through the pipeline:
//
//   RawClip      — one decoded clip straight from a clip source
//                  (frames + both kinds of annotation)
//   ClsSample    — classification item: features X and multi-hot y
//                  sharing the same leading batch dimension
//   CaptionClip  — captioning item before tokenization
//   CapSample    — captioning item after tokenization, the form
//                  stored in (and read back from) the shard cache
//
// Frame stacks are always laid out as [T, C, H, W].

use crate::domain::error::PipelineError;
use crate::domain::tensor::HostTensor;

/// Rank of one clip's frame stack, [T, C, H, W].
pub const FRAME_STACK_RANK: usize = 4;

/// A decoded clip with every annotation the sources know about.
#[derive(Debug, Clone)]
pub struct RawClip {
    /// Video id (file stem / annotation id)
    pub id: String,

    /// F32 pixel values in [0, 255], shape [T, C, H, W]
    pub frames: HostTensor,

    /// Multi-hot class vector of length num_classes
    pub labels: Vec<f32>,

    /// Free-text description of the clip
    pub caption: String,
}

// ─── ClsSample ────────────────────────────────────────────────────────────────
/// Classification item. `x` and `y` always agree on the leading dimension,
/// so one sample may hold a whole cached batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ClsSample {
    pub x: HostTensor,
    pub y: HostTensor,
}

impl ClsSample {
    pub fn new(x: HostTensor, y: HostTensor) -> Result<Self, PipelineError> {
        if x.leading_dim() != y.leading_dim() {
            return Err(PipelineError::LabelMisaligned {
                x: x.leading_dim(),
                y: y.leading_dim(),
            });
        }
        Ok(Self { x, y })
    }

    /// Number of clips in the batch.
    pub fn len(&self) -> usize {
        self.x.leading_dim()
    }
}

/// Captioning item before tokenization.
#[derive(Debug, Clone)]
pub struct CaptionClip {
    pub frames:  HostTensor,
    pub caption: String,
}

// ─── CapSample ────────────────────────────────────────────────────────────────
/// Tokenized captioning item: one clip, one caption.
#[derive(Debug, Clone, PartialEq)]
pub struct CapSample {
    /// [T, C, H, W], U8 when read from the cache
    pub frames: HostTensor,

    /// I64 [1, L]
    pub input_ids: HostTensor,

    /// I64 [1, L], 1 for real tokens and 0 for padding
    pub attention_mask: HostTensor,
}

impl CapSample {
    /// Token ids with padding positions removed.
    pub fn token_ids(&self) -> Vec<i64> {
        let ids = self.input_ids.as_i64().unwrap_or(&[]);
        match self.attention_mask.as_i64() {
            Some(mask) if mask.len() == ids.len() => ids
                .iter()
                .zip(mask)
                .filter(|(_, &m)| m != 0)
                .map(|(&id, _)| id)
                .collect(),
            _ => ids.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cls_sample_rejects_misaligned_labels() {
        let x = HostTensor::f32(vec![2, 4], vec![0.0; 8]).unwrap();
        let y = HostTensor::f32(vec![3, 2], vec![0.0; 6]).unwrap();
        assert!(matches!(
            ClsSample::new(x, y),
            Err(PipelineError::LabelMisaligned { x: 2, y: 3 })
        ));
    }

    #[test]
    fn test_token_ids_drop_padding() {
        let sample = CapSample {
            frames:         HostTensor::u8(vec![1, 1, 1, 1], vec![0]).unwrap(),
            input_ids:      HostTensor::i64(vec![1, 4], vec![101, 7, 102, 0]).unwrap(),
            attention_mask: HostTensor::i64(vec![1, 4], vec![1, 1, 1, 0]).unwrap(),
        };
        assert_eq!(sample.token_ids(), vec![101, 7, 102]);
    }
}

// ============================================================
// Layer 4 — Collate Functions and Batchers
// ============================================================
// Two kinds of batch assembly live here.
//
// Host collation, used by the encoder pass before anything is
// written to the cache. It is fallible and stays in HostTensor:
//
//   collate_classification   Vec<ClsSample>   → ClsSample  (dim-0 concat)
//   CaptionCollate::collate  Vec<CaptionClip> → CaptionHostBatch
//
// Device batchers, used by training and evaluation. They implement
// Burn's Batcher trait and build tensors on the target device:
//
//   ClassificationBatcher  ClsSample → features [N, D], labels [N, K]
//   CaptioningBatcher      CapSample → frames [N, T, F] (F = C·H·W),
//                                      frame_pad [N, T], input_ids [N, L],
//                                      token_pad [N, L]
//
// Padding masks follow Burn's transformer convention: `true`
// marks a padded position.
//
// Reference: Burn Book §4 (Batcher)

use anyhow::{anyhow, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};
use std::sync::Arc;

use crate::domain::{
    clip::{CapSample, CaptionClip, ClsSample, FRAME_STACK_RANK},
    error::PipelineError,
    tensor::{HostTensor, TensorShapeError},
};
use crate::infra::tokenizer_store::CaptionTokenizer;

// ─── Classification ───────────────────────────────────────────────────────────
/// Stack classification items along dim 0. Labels are never altered.
pub fn collate_classification(items: Vec<ClsSample>) -> Result<ClsSample, PipelineError> {
    if items.is_empty() {
        return Err(PipelineError::EmptyBatch);
    }
    let (xs, ys): (Vec<HostTensor>, Vec<HostTensor>) =
        items.into_iter().map(|s| (s.x, s.y)).unzip();

    let x = HostTensor::concat_leading(&xs)?;
    let y = HostTensor::concat_leading(&ys)?;
    ClsSample::new(x, y)
}

// ─── Captioning ───────────────────────────────────────────────────────────────
/// Tokenized and padded captioning batch, still on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionHostBatch {
    /// F32 [N, T_max, C, H, W], zero frames after each clip's end
    pub frames: HostTensor,

    /// Real frame count per clip
    pub frame_lengths: Vec<usize>,

    /// I64 [N, L_max], PAD after each caption's end
    pub input_ids: HostTensor,

    /// I64 [N, L_max]
    pub attention_mask: HostTensor,
}

impl CaptionHostBatch {
    /// One cacheable sample per clip: frames trimmed back to their real
    /// length and quantized to u8, tokens kept padded to the batch width.
    pub fn into_cap_samples(self) -> Vec<CapSample> {
        let frames = self.frames.split_leading();
        let ids = self.input_ids.split_leading();
        let masks = self.attention_mask.split_leading();

        frames
            .into_iter()
            .zip(ids)
            .zip(masks)
            .zip(self.frame_lengths)
            .map(|(((frames, input_ids), attention_mask), len)| CapSample {
                frames: frames.squeeze_leading().truncate_leading(len).quantize_u8(),
                input_ids,
                attention_mask,
            })
            .collect()
    }
}

/// Tokenizes captions and pads frames and tokens to the batch maximum.
#[derive(Clone)]
pub struct CaptionCollate {
    tokenizer: Arc<CaptionTokenizer>,
    max_len:   usize,
}

impl CaptionCollate {
    pub fn new(tokenizer: Arc<CaptionTokenizer>, max_len: usize) -> Self {
        Self { tokenizer, max_len }
    }

    pub fn collate(&self, items: Vec<CaptionClip>) -> Result<CaptionHostBatch> {
        if items.is_empty() {
            return Err(PipelineError::EmptyBatch.into());
        }

        let mut token_rows = Vec::with_capacity(items.len());
        for item in &items {
            let ids = self.tokenizer.encode_caption(&item.caption, self.max_len)?;
            token_rows.push(ids.into_iter().map(i64::from).collect::<Vec<i64>>());
        }
        let (input_ids, attention_mask) =
            pad_token_rows(&token_rows, i64::from(self.tokenizer.pad_id()))?;

        let frame_lengths: Vec<usize> = items.iter().map(|c| c.frames.leading_dim()).collect();
        let t_max = frame_lengths.iter().copied().max().unwrap_or(0);
        let stacks = items
            .into_iter()
            .map(|c| {
                c.frames.expect_rank(FRAME_STACK_RANK)?;
                Ok(HostTensor::f32(c.frames.shape().to_vec(), c.frames.to_f32_vec())?
                    .zero_pad_leading(t_max)
                    .unsqueeze_leading())
            })
            .collect::<Result<Vec<HostTensor>, TensorShapeError>>()?;
        let frames = HostTensor::concat_leading(&stacks)?;

        Ok(CaptionHostBatch { frames, frame_lengths, input_ids, attention_mask })
    }
}

/// Right-pads token rows with `pad`. Returns (ids, mask) as I64 [N, L_max].
pub fn pad_token_rows(rows: &[Vec<i64>], pad: i64) -> Result<(HostTensor, HostTensor), TensorShapeError> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut ids = Vec::with_capacity(rows.len() * width);
    let mut mask = Vec::with_capacity(rows.len() * width);
    for row in rows {
        ids.extend(row.iter().copied());
        ids.extend(std::iter::repeat(pad).take(width - row.len()));
        mask.extend(std::iter::repeat(1i64).take(row.len()));
        mask.extend(std::iter::repeat(0i64).take(width - row.len()));
    }
    Ok((
        HostTensor::i64(vec![rows.len(), width], ids)?,
        HostTensor::i64(vec![rows.len(), width], mask)?,
    ))
}

// ─── Host ↔ Device ────────────────────────────────────────────────────────────
/// Upload a host tensor as f32. The rank must match `D`.
pub fn to_device<B: Backend, const D: usize>(
    host:   &HostTensor,
    device: &B::Device,
) -> Result<Tensor<B, D>, TensorShapeError> {
    host.expect_rank(D)?;
    let data = TensorData::new(host.to_f32_vec(), host.shape().to_vec());
    Ok(Tensor::from_data(data, device))
}

/// Download a float tensor into an F32 host tensor.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<HostTensor> {
    let shape = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read tensor data: {e:?}"))?;
    Ok(HostTensor::f32(shape, values)?)
}

/// 0/1 rows → Bool mask where `true` means padding.
fn padding_mask<B: Backend>(
    pad_flags: Vec<i64>,
    shape:     [usize; 2],
    device:    &B::Device,
) -> Tensor<B, 2, Bool> {
    Tensor::<B, 2, Int>::from_data(TensorData::new(pad_flags, shape), device).equal_elem(1)
}

// ─── ClassificationBatch ──────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// [N, D]
    pub features: Tensor<B, 2>,

    /// Multi-hot targets [N, K]
    pub labels: Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// [rows, everything else] view of a host tensor.
    fn rows_tensor(&self, host: &HostTensor) -> Tensor<B, 2> {
        let rows = host.leading_dim();
        let cols = host.numel() / rows.max(1);
        Tensor::from_data(TensorData::new(host.to_f32_vec(), [rows, cols]), &self.device)
    }
}

impl<B: Backend> Batcher<ClsSample, ClassificationBatch<B>> for ClassificationBatcher<B> {
    /// Each cached item may already hold several rows, so the batch is a
    /// dim-0 concatenation rather than a stack.
    fn batch(&self, items: Vec<ClsSample>) -> ClassificationBatch<B> {
        let features = items.iter().map(|s| self.rows_tensor(&s.x)).collect();
        let labels = items.iter().map(|s| self.rows_tensor(&s.y)).collect();

        ClassificationBatch {
            features: Tensor::cat(features, 0),
            labels:   Tensor::cat(labels, 0),
        }
    }
}

// ─── CaptioningBatch ──────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct CaptioningBatch<B: Backend> {
    /// Raw pixel values, one flattened frame per row: [N, T_max, C·H·W]
    pub frames: Tensor<B, 3>,

    /// [N, T_max], true after each clip's last frame
    pub frame_pad: Tensor<B, 2, Bool>,

    /// [CLS] caption [SEP] PAD..., shape [N, L_max]
    pub input_ids: Tensor<B, 2, Int>,

    /// [N, L_max], true on PAD positions
    pub token_pad: Tensor<B, 2, Bool>,
}

#[derive(Clone, Debug)]
pub struct CaptioningBatcher<B: Backend> {
    pub device: B::Device,
    pub pad_id: i64,
}

impl<B: Backend> CaptioningBatcher<B> {
    pub fn new(device: B::Device, pad_id: u32) -> Self {
        Self { device, pad_id: i64::from(pad_id) }
    }
}

impl<B: Backend> Batcher<CapSample, CaptioningBatch<B>> for CaptioningBatcher<B> {
    fn batch(&self, items: Vec<CapSample>) -> CaptioningBatch<B> {
        let batch_size = items.len();

        // ── Frames: pad every clip to the longest one ─────────────────────────
        let lengths: Vec<usize> = items.iter().map(|s| s.frames.leading_dim()).collect();
        let t_max = lengths.iter().copied().max().unwrap_or(0);

        let stacks = items
            .iter()
            .zip(&lengths)
            .map(|(item, &t)| {
                let per_frame = item.frames.numel() / t.max(1);
                let frames = Tensor::<B, 3>::from_data(
                    TensorData::new(item.frames.to_f32_vec(), [1, t, per_frame]),
                    &self.device,
                );
                if t < t_max {
                    let zeros = Tensor::zeros([1, t_max - t, per_frame], &self.device);
                    Tensor::cat(vec![frames, zeros], 1)
                } else {
                    frames
                }
            })
            .collect();
        let frames = Tensor::cat(stacks, 0);

        let frame_flags: Vec<i64> = lengths
            .iter()
            .flat_map(|&t| (0..t_max).map(move |i| i64::from(i >= t)))
            .collect();
        let frame_pad = padding_mask::<B>(frame_flags, [batch_size, t_max], &self.device);

        // ── Tokens: drop cached padding, re-pad to this batch ─────────────────
        let rows: Vec<Vec<i64>> = items.iter().map(CapSample::token_ids).collect();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);

        let mut ids = Vec::with_capacity(batch_size * width);
        let mut token_flags = Vec::with_capacity(batch_size * width);
        for row in &rows {
            ids.extend(row.iter().copied());
            ids.extend(std::iter::repeat(self.pad_id).take(width - row.len()));
            token_flags.extend(std::iter::repeat(0i64).take(row.len()));
            token_flags.extend(std::iter::repeat(1i64).take(width - row.len()));
        }

        let input_ids = Tensor::<B, 2, Int>::from_data(
            TensorData::new(ids, [batch_size, width]),
            &self.device,
        );
        let token_pad = padding_mask::<B>(token_flags, [batch_size, width], &self.device);

        CaptioningBatch { frames, frame_pad, input_ids, token_pad }
    }
}

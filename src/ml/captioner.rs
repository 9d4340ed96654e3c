// ============================================================
// Layer 5 — Captioner
// ============================================================
use anyhow::{anyhow, Result};
use burn::{prelude::*, tensor::TensorData};
use std::sync::Arc;

use crate::domain::{clip::CapSample, traits::CaptionGenerator};
use crate::infra::tokenizer_store::CaptionTokenizer;
use crate::ml::{beam::BeamSearch, cap_head::CaptionModel};

/// Beam-search captioning with a trained head.
pub struct HeadCaptioner<B: Backend> {
    model:     CaptionModel<B>,
    tokenizer: Arc<CaptionTokenizer>,
    device:    B::Device,
}

impl<B: Backend> HeadCaptioner<B> {
    pub fn new(model: CaptionModel<B>, tokenizer: Arc<CaptionTokenizer>, device: B::Device) -> Self {
        Self { model, tokenizer, device }
    }

    /// Token ids of the best caption, [CLS] first.
    pub fn generate_ids(&self, sample: &CapSample, max_len: usize, beam_size: usize) -> Result<Vec<u32>> {
        let t = sample.frames.leading_dim();
        let per_frame = sample.frames.numel() / t.max(1);
        let frames = Tensor::<B, 3>::from_data(
            TensorData::new(sample.frames.to_f32_vec(), [1, t, per_frame]),
            &self.device,
        );

        let memory = self.model.head.memory(self.model.encoder.encode_frames(frames));
        let memory_pad = Tensor::<B, 2, Int>::zeros([1, t], &self.device).equal_elem(1);

        let search = BeamSearch::new(
            beam_size,
            max_len.min(self.model.head.max_len),
            self.tokenizer.cls_id(),
            self.tokenizer.sep_id(),
        );
        search.run(|prefixes| {
            let log_probs = self.model.next_token_log_probs(&memory, &memory_pad, prefixes);
            let [k, vocab] = log_probs.dims();
            let flat = log_probs
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| anyhow!("cannot read log-probabilities: {e:?}"))?;
            Ok((0..k).map(|i| flat[i * vocab..(i + 1) * vocab].to_vec()).collect())
        })
    }
}

impl<B: Backend> CaptionGenerator for HeadCaptioner<B> {
    fn generate(&self, sample: &CapSample, max_len: usize, beam_size: usize) -> Result<String> {
        let ids = self.generate_ids(sample, max_len, beam_size)?;
        let caption = self.tokenizer.decode_ids(&ids)?;
        tracing::debug!("Generated {} tokens: '{}'", ids.len(), caption);
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tensor::HostTensor;
    use crate::infra::tokenizer_store::{TokenizerStore, CLS_ID};
    use crate::ml::{cap_head::CaptioningHeadConfig, encoder::FrameEncoder};
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    #[test]
    fn test_generates_bounded_caption() {
        let dir = tempfile::tempdir().unwrap();
        let texts = vec!["a person opens a door".to_string()];
        let tokenizer = TokenizerStore::new(dir.path()).load_or_build(&texts, 200).unwrap();
        let vocab = tokenizer.vocab_size();

        let device = NdArrayDevice::Cpu;
        let head = CaptioningHeadConfig::new(4, vocab, 6, 8, 2, 1, 16, 0.0).init::<NdArray>(&device);
        let model = CaptionModel::new(head, FrameEncoder::Identity, 0);
        let captioner = HeadCaptioner::new(model, Arc::new(tokenizer), device);

        let sample = CapSample {
            frames:         HostTensor::u8(vec![2, 1, 2, 2], vec![10, 20, 30, 40, 50, 60, 70, 80]).unwrap(),
            input_ids:      HostTensor::i64(vec![1, 2], vec![101, 102]).unwrap(),
            attention_mask: HostTensor::i64(vec![1, 2], vec![1, 1]).unwrap(),
        };

        let ids = captioner.generate_ids(&sample, 32, 2).unwrap();
        assert_eq!(ids[0], CLS_ID);
        assert!(ids.len() <= 6);
        assert!(captioner.generate(&sample, 32, 2).is_ok());
    }
}

// ============================================================
// Layer 5 — Captioning Head
// ============================================================
// Transformer decoder that writes a caption for a frame stack.
//
//   frames [N, T, F] ─► FrameEncoder ─► visual_proj + LayerNorm
//                                         │ memory [N, T, d_model]
//   tokens [N, L] ─► token + position ─► TransformerDecoder ─► vocab logits
//                     embeddings          (causal self-attn,
//                                          cross-attn to memory)
//
// Padded frames are masked out of cross-attention and padded
// tokens out of self-attention. Training shifts the ids by one
// and ignores PAD targets; inference scores one prefix per beam.
//
// Reference: Vaswani et al. (2017) Attention Is All You Need

use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        loss::CrossEntropyLossConfig,
        transformer::{TransformerDecoder, TransformerDecoderConfig, TransformerDecoderInput},
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::log_softmax,
};

use crate::data::collate::CaptioningBatch;
use crate::ml::encoder::FrameEncoder;

#[derive(Config, Debug)]
pub struct CaptioningHeadConfig {
    /// Feature size of one encoded frame
    pub visual_dim: usize,
    pub vocab_size: usize,
    pub max_len:    usize,
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    pub dropout:    f64,
}

impl CaptioningHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CaptioningHead<B> {
        let decoder = TransformerDecoderConfig::new(self.d_model, self.d_ff, self.num_heads, self.num_layers)
            .with_dropout(self.dropout)
            .init(device);

        CaptioningHead {
            visual_proj:        LinearConfig::new(self.visual_dim, self.d_model).init(device),
            visual_norm:        LayerNormConfig::new(self.d_model).init(device),
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_len, self.d_model).init(device),
            decoder,
            output:             LinearConfig::new(self.d_model, self.vocab_size).init(device),
            max_len:            self.max_len,
        }
    }
}

/// Transformer decoder that attends over a sequence of visual features.
#[derive(Module, Debug)]
pub struct CaptioningHead<B: Backend> {
    pub visual_proj:        Linear<B>,
    pub visual_norm:        LayerNorm<B>,
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub decoder:            TransformerDecoder<B>,
    pub output:             Linear<B>,
    pub max_len:            usize,
}

impl<B: Backend> CaptioningHead<B> {
    /// visual: [batch, frames, visual_dim] → memory: [batch, frames, d_model]
    pub fn memory(&self, visual: Tensor<B, 3>) -> Tensor<B, 3> {
        self.visual_norm.forward(self.visual_proj.forward(visual))
    }

    /// tokens: [batch, len] → logits: [batch, len, vocab]
    pub fn decode(
        &self,
        memory:     Tensor<B, 3>,
        memory_pad: Tensor<B, 2, Bool>,
        tokens:     Tensor<B, 2, Int>,
        token_pad:  Tensor<B, 2, Bool>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = tokens.dims();
        let device = tokens.device();

        let tok_emb = self.token_embedding.forward(tokens);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let causal = generate_autoregressive_mask::<B>(batch_size, seq_len, &device);
        let input = TransformerDecoderInput::new(tok_emb + pos_emb, memory)
            .target_mask_pad(token_pad)
            .target_mask_attn(causal)
            .memory_mask_pad(memory_pad);

        self.output.forward(self.decoder.forward(input))
    }

    /// Teacher-forced cross entropy: predict token t+1 from tokens ..=t.
    /// Positions whose target is PAD do not count.
    pub fn forward_loss(
        &self,
        visual:     Tensor<B, 3>,
        visual_pad: Tensor<B, 2, Bool>,
        input_ids:  Tensor<B, 2, Int>,
        token_pad:  Tensor<B, 2, Bool>,
        pad_id:     usize,
    ) -> Tensor<B, 1> {
        let [batch_size, seq_len] = input_ids.dims();
        let steps = seq_len.saturating_sub(1).min(self.max_len);
        let device = input_ids.device();

        let inputs = input_ids.clone().slice([0..batch_size, 0..steps]);
        let targets = input_ids.slice([0..batch_size, 1..steps + 1]);
        let input_pad = token_pad.slice([0..batch_size, 0..steps]);

        let logits = self.decode(self.memory(visual), visual_pad, inputs, input_pad);
        let [_, _, vocab] = logits.dims();

        CrossEntropyLossConfig::new()
            .with_pad_tokens(Some(vec![pad_id]))
            .init(&device)
            .forward(
                logits.reshape([batch_size * steps, vocab]),
                targets.reshape([batch_size * steps]),
            )
    }
}

// ─── CaptionModel ─────────────────────────────────────────────────────────────
/// A captioning head plus the visual stage that feeds it. The stage is
/// passed in at construction, so evaluation on cached frames and training
/// share one type.
#[derive(Debug, Clone)]
pub struct CaptionModel<B: Backend> {
    pub head:    CaptioningHead<B>,
    pub encoder: FrameEncoder,
    pub pad_id:  usize,
}

impl<B: Backend> CaptionModel<B> {
    pub fn new(head: CaptioningHead<B>, encoder: FrameEncoder, pad_id: u32) -> Self {
        Self { head, encoder, pad_id: pad_id as usize }
    }

    pub fn forward_loss(&self, batch: CaptioningBatch<B>) -> Tensor<B, 1> {
        let visual = self.encoder.encode_frames(batch.frames);
        self.head.forward_loss(visual, batch.frame_pad, batch.input_ids, batch.token_pad, self.pad_id)
    }

    /// Log-probabilities of the next token after each prefix.
    ///
    /// memory: [1, frames, d_model]; prefixes must share one length.
    pub fn next_token_log_probs(
        &self,
        memory:     &Tensor<B, 3>,
        memory_pad: &Tensor<B, 2, Bool>,
        prefixes:   &[Vec<u32>],
    ) -> Tensor<B, 2> {
        let k = prefixes.len();
        let len = prefixes.first().map(Vec::len).unwrap_or(0);
        let device = memory.device();

        let flat: Vec<i64> = prefixes.iter().flatten().map(|&t| i64::from(t)).collect();
        let tokens = Tensor::<B, 2, Int>::from_data(burn::tensor::TensorData::new(flat, [k, len]), &device);
        let token_pad = Tensor::<B, 2, Int>::zeros([k, len], &device).equal_elem(1);

        let memory = Tensor::cat(vec![memory.clone(); k], 0);
        let memory_pad = Tensor::cat(vec![memory_pad.clone(); k], 0);

        let logits = self.head.decode(memory, memory_pad, tokens, token_pad);
        let [_, _, vocab] = logits.dims();
        let last = logits.slice([0..k, len - 1..len, 0..vocab]).reshape([k, vocab]);
        log_softmax(last, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    type B = NdArray;

    fn config() -> CaptioningHeadConfig {
        CaptioningHeadConfig::new(12, 20, 8, 16, 2, 1, 32, 0.0)
    }

    fn no_pad(batch: usize, len: usize) -> Tensor<B, 2, Bool> {
        Tensor::<B, 2, Int>::zeros([batch, len], &NdArrayDevice::Cpu).equal_elem(1)
    }

    #[test]
    fn test_decode_shapes() {
        let device = NdArrayDevice::Cpu;
        let head = config().init::<B>(&device);
        let memory = head.memory(Tensor::zeros([2, 3, 12], &device));
        assert_eq!(memory.dims(), [2, 3, 16]);

        let tokens = Tensor::<B, 2, Int>::zeros([2, 5], &device);
        let logits = head.decode(memory, no_pad(2, 3), tokens, no_pad(2, 5));
        assert_eq!(logits.dims(), [2, 5, 20]);
    }

    #[test]
    fn test_loss_is_finite() {
        let device = NdArrayDevice::Cpu;
        let model = CaptionModel::new(config().init::<B>(&device), FrameEncoder::Identity, 0);
        let ids = Tensor::<B, 2, Int>::from_data(
            burn::tensor::TensorData::new(vec![3i64, 5, 4, 3, 4, 0], [2, 3]),
            &device,
        );
        let token_pad = Tensor::<B, 2, Int>::from_data(
            burn::tensor::TensorData::new(vec![0i64, 0, 0, 0, 0, 1], [2, 3]),
            &device,
        )
        .equal_elem(1);
        let batch = CaptioningBatch {
            frames:    Tensor::ones([2, 4, 12], &device),
            frame_pad: no_pad(2, 4),
            input_ids: ids,
            token_pad,
        };

        let loss = model.forward_loss(batch).into_data().to_vec::<f32>().unwrap()[0];
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn test_next_token_log_probs_normalized() {
        let device = NdArrayDevice::Cpu;
        let model = CaptionModel::new(config().init::<B>(&device), FrameEncoder::Identity, 0);
        let memory = model.head.memory(Tensor::ones([1, 2, 12], &device));

        let out = model.next_token_log_probs(&memory, &no_pad(1, 2), &[vec![3, 4], vec![3, 5], vec![3, 6]]);
        assert_eq!(out.dims(), [3, 20]);

        let probs = out.exp().sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(probs.iter().all(|p| (p - 1.0).abs() < 1e-4));
    }
}

// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds, runs or trains a Burn module.
//
// What's in this layer:
//
//   encoder.rs      — The frozen frame encoder
//                     Identity (captioning) or fixed patch
//                     projection (classification cache)
//
//   cls_head.rs     — MLP classification head + weighted BCE
//
//   cap_head.rs     — Transformer decoder captioning head
//                     CaptionModel pairs it with an injected
//                     encoder stage
//
//   beam.rs         — Beam search over a step function
//   captioner.rs    — Beam-search captioning with a trained head
//
//   ranking.rs      — mAP for multi-label validation
//   text_metrics.rs — Corpus BLEU and ROUGE
//   schedule.rs     — MultiStep learning rate
//
//   backend.rs      — ACCELERATOR → Autodiff<NdArray | Wgpu>
//   trainer.rs      — Train + validation loops, checkpoints
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Backend selection by TRAIN.ACCELERATOR
pub mod backend;

/// Beam search decoding
pub mod beam;

/// Captioning head and CaptionModel
pub mod cap_head;

/// HeadCaptioner, the CaptionGenerator used for evaluation
pub mod captioner;

/// Classification head and loss
pub mod cls_head;

/// Frozen frame encoder
pub mod encoder;

/// Mean average precision
pub mod ranking;

/// Learning-rate schedule
pub mod schedule;

/// BLEU and ROUGE
pub mod text_metrics;

/// Training loops for both heads
pub mod trainer;

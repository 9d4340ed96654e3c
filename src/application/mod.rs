// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// One use case per command. Each one loads what it needs from
// the other layers, picks the backend once and runs a workflow.
//
// Rules for this layer:
//   - No ML math or model code here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//   - Only workflow coordination
//
// Typical order of a full experiment:
//
//   encode         → shard cache under DATA.ENCODING_DIR
//   class-weights  → class_weights.json (classification only)
//   train-cls      → classification head checkpoints
//   train-cap      → captioning head checkpoints
//   eval-cap       → BLEU / ROUGE report for a captioning head
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// Inverse-frequency class weights from cached labels
pub mod class_weights;

/// Encoder-cache writer
pub mod encode_use_case;

/// Captioning evaluation
pub mod eval_cap_use_case;

/// Captioning head training
pub mod train_cap_use_case;

/// Classification head training + overrides
pub mod train_cls_use_case;

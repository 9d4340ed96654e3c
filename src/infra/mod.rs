// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong in any specific
// business layer:
//
//   config.rs          — Typed YAML experiment configuration
//                        with `_BASE_` inheritance.
//
//   seed.rs            — One seed per run; backend RNG seeded
//                        once, per-component streams derived
//                        and passed explicitly.
//
//   checkpoint.rs      — Head weights via Burn's CompactRecorder
//                        plus a JSON sidecar with the head config
//                        so evaluation can rebuild the module.
//
//   tokenizer_store.rs — Caption tokenizer persistence. Built
//                        from the training captions once and
//                        reused by training and evaluation.
//
//   metrics.rs         — Epoch-level metrics appended to CSV.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Experiment configuration loading
pub mod config;

/// Deterministic seeding
pub mod seed;

/// Head checkpoint saving and loading
pub mod checkpoint;

/// Caption tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;

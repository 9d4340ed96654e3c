// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The evaluation loop only needs two capabilities: turn a
// cached sample into a caption, and turn token ids back into
// text. Programming against these traits lets the loop run
// with a real burn head or with a stub in tests.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::clip::CapSample;

// ─── CaptionGenerator ─────────────────────────────────────────────────────────
/// Anything that can caption a cached clip.
///
/// Implementations:
///   - HeadCaptioner → beam search over a trained captioning head
pub trait CaptionGenerator {
    /// Decode a caption for `sample`, generating at most `max_len` tokens
    /// with `beam_size` beams.
    fn generate(&self, sample: &CapSample, max_len: usize, beam_size: usize) -> Result<String>;
}

// ─── TextDecoder ──────────────────────────────────────────────────────────────
/// Anything that can turn token ids back into text, skipping special tokens.
pub trait TextDecoder {
    fn decode(&self, ids: &[i64]) -> Result<String>;
}

// ============================================================
// Layer 5 — Beam Search
// ============================================================
// Model-agnostic beam search over token ids.
//
// The caller supplies a step function: given the live prefixes it
// returns, for each prefix, log-probabilities over the whole
// vocabulary for the next token. At every step all
// (prefix, token) extensions are ranked by cumulative score and
// the best `beam_size` are kept. A prefix that emits EOS is
// finished and leaves the beam.
//
// Search stops at the length limit, when no prefix is left, or
// once `beam_size` hypotheses have finished. The best hypothesis
// by length-normalized score wins.
//
// Reference: Graves (2012) Sequence Transduction with RNNs
//            Rust Book §13 (Closures)

use anyhow::{ensure, Result};

#[derive(Debug, Clone, Copy)]
pub struct BeamSearch {
    pub beam_size: usize,
    /// Maximum sequence length, BOS and EOS included
    pub max_len:   usize,
    pub bos:       u32,
    pub eos:       u32,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score:  f32,
}

impl Hypothesis {
    /// Score divided by the number of generated tokens.
    fn normalized(&self) -> f32 {
        self.score / (self.tokens.len().saturating_sub(1).max(1)) as f32
    }
}

impl BeamSearch {
    pub fn new(beam_size: usize, max_len: usize, bos: u32, eos: u32) -> Self {
        Self { beam_size, max_len, bos, eos }
    }

    /// Returns the best sequence, starting with BOS and ending with EOS
    /// unless the length limit cut it short.
    pub fn run<F>(&self, mut step: F) -> Result<Vec<u32>>
    where
        F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
    {
        ensure!(self.beam_size > 0, "beam size must be positive");
        ensure!(self.max_len >= 2, "max length must leave room for one token");

        let mut live = vec![Hypothesis { tokens: vec![self.bos], score: 0.0 }];
        let mut finished: Vec<Hypothesis> = Vec::new();

        while !live.is_empty() && live[0].tokens.len() < self.max_len {
            let prefixes: Vec<Vec<u32>> = live.iter().map(|h| h.tokens.clone()).collect();
            let log_probs = step(&prefixes)?;
            ensure!(
                log_probs.len() == live.len(),
                "step returned {} rows for {} prefixes",
                log_probs.len(),
                live.len()
            );

            // ── Rank every extension ──────────────────────────────────────────
            let mut candidates: Vec<(usize, u32, f32)> = Vec::new();
            for (beam, row) in log_probs.iter().enumerate() {
                for (token, &lp) in row.iter().enumerate() {
                    candidates.push((beam, token as u32, live[beam].score + lp));
                }
            }
            candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

            let mut next = Vec::with_capacity(self.beam_size);
            for (beam, token, score) in candidates {
                if next.len() >= self.beam_size {
                    break;
                }
                if !score.is_finite() {
                    continue;
                }
                let mut tokens = live[beam].tokens.clone();
                tokens.push(token);
                let hyp = Hypothesis { tokens, score };
                if token == self.eos {
                    finished.push(hyp);
                } else {
                    next.push(hyp);
                }
            }

            if finished.len() >= self.beam_size {
                break;
            }
            live = next;
        }

        finished.extend(live);
        let best = finished
            .into_iter()
            .max_by(|a, b| a.normalized().total_cmp(&b.normalized()))
            .map(|h| h.tokens)
            .unwrap_or_else(|| vec![self.bos]);
        Ok(best)
    }
}

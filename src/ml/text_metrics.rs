// ============================================================
// Layer 5 — Caption Metrics (BLEU, ROUGE)
// ============================================================
// Corpus BLEU
//   Tokens are whitespace-separated words. Clipped n-gram matches
//   and candidate n-gram counts are summed over the whole corpus
//   before the precisions are formed, then combined with a
//   uniform geometric mean and the brevity penalty
//
//     BP = 1               if c > r
//        = exp(1 − r / c)  otherwise
//
//   with c / r the total candidate / reference lengths. Any order
//   with zero matches makes the score 0.
//
// ROUGE-1 / ROUGE-2 / ROUGE-L / ROUGE-Lsum
//   Text is lower-cased and every non-alphanumeric character is
//   treated as a separator. Precision, recall and F1 are computed
//   per (candidate, reference) pair and averaged over the corpus.
//   ROUGE-Lsum splits both texts into sentences on newlines and
//   counts, per reference sentence, the union of its LCS matches
//   against every candidate sentence. Single-line captions score
//   the same as ROUGE-L.
//
// Reference: Papineni et al. (2002) BLEU
//            Lin (2004) ROUGE

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

// ─── BLEU ─────────────────────────────────────────────────────────────────────
fn ngram_counts<'a>(tokens: &'a [&'a str], n: usize) -> HashMap<&'a [&'a str], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for window in tokens.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

/// Corpus BLEU with n-gram orders 1..=`max_order`, one reference per candidate.
pub fn corpus_bleu(candidates: &[String], references: &[String], max_order: usize) -> f64 {
    if max_order == 0 || candidates.is_empty() || candidates.len() != references.len() {
        return 0.0;
    }

    let mut matches = vec![0usize; max_order];
    let mut totals = vec![0usize; max_order];
    let mut candidate_len = 0usize;
    let mut reference_len = 0usize;

    for (candidate, reference) in candidates.iter().zip(references) {
        let cand: Vec<&str> = candidate.split_whitespace().collect();
        let refs: Vec<&str> = reference.split_whitespace().collect();
        candidate_len += cand.len();
        reference_len += refs.len();

        for n in 1..=max_order {
            let cand_counts = ngram_counts(&cand, n);
            let ref_counts = ngram_counts(&refs, n);
            for (gram, &count) in &cand_counts {
                let clip = ref_counts.get(gram).copied().unwrap_or(0);
                matches[n - 1] += count.min(clip);
            }
            totals[n - 1] += cand.len().saturating_sub(n - 1);
        }
    }

    if matches.iter().any(|&m| m == 0) {
        return 0.0;
    }

    let log_precision: f64 = matches
        .iter()
        .zip(&totals)
        .map(|(&m, &t)| (m as f64 / t as f64).ln())
        .sum::<f64>()
        / max_order as f64;

    let brevity = if candidate_len > reference_len {
        1.0
    } else {
        (1.0 - reference_len as f64 / candidate_len as f64).exp()
    };
    brevity * log_precision.exp()
}

// ─── ROUGE ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RougeTriple {
    pub precision: f64,
    pub recall:    f64,
    pub fmeasure:  f64,
}

impl RougeTriple {
    fn from_counts(hits: usize, candidate: usize, reference: usize) -> Self {
        let precision = if candidate == 0 { 0.0 } else { hits as f64 / candidate as f64 };
        let recall = if reference == 0 { 0.0 } else { hits as f64 / reference as f64 };
        let fmeasure = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self { precision, recall, fmeasure }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RougeScores {
    pub rouge1: RougeTriple,
    pub rouge2: RougeTriple,
    #[serde(rename = "rougeL")]
    pub rouge_l: RougeTriple,
    #[serde(rename = "rougeLsum")]
    pub rouge_lsum: RougeTriple,
}

fn rouge_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn rouge_n(cand: &[&str], refs: &[&str], n: usize) -> RougeTriple {
    let cand_counts = ngram_counts(cand, n);
    let ref_counts = ngram_counts(refs, n);
    let hits: usize = cand_counts
        .iter()
        .map(|(gram, &count)| count.min(ref_counts.get(gram).copied().unwrap_or(0)))
        .sum();
    RougeTriple::from_counts(
        hits,
        cand_counts.values().sum(),
        ref_counts.values().sum(),
    )
}

fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y { prev[j] + 1 } else { prev[j + 1].max(curr[j]) };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Positions in `a` of one longest common subsequence of `a` and `b`.
fn lcs_positions(a: &[&str], b: &[&str]) -> Vec<usize> {
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            table[i + 1][j + 1] = if x == y {
                table[i][j] + 1
            } else {
                table[i][j + 1].max(table[i + 1][j])
            };
        }
    }

    let (mut i, mut j) = (a.len(), b.len());
    let mut positions = Vec::with_capacity(table[i][j]);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            positions.push(i - 1);
            i -= 1;
            j -= 1;
        } else if table[i - 1][j] >= table[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    positions.reverse();
    positions
}

fn rouge_lsum(candidate: &str, reference: &str) -> RougeTriple {
    let sentences = |text: &str| -> Vec<Vec<String>> {
        text.lines().map(rouge_tokens).filter(|s| !s.is_empty()).collect()
    };
    let cand_owned = sentences(candidate);
    let refs_owned = sentences(reference);
    let cand: Vec<Vec<&str>> =
        cand_owned.iter().map(|s| s.iter().map(String::as_str).collect()).collect();
    let refs: Vec<Vec<&str>> =
        refs_owned.iter().map(|s| s.iter().map(String::as_str).collect()).collect();

    // each token may be matched at most as often as it occurs on both sides
    let mut cand_left: HashMap<&str, usize> = HashMap::new();
    for &token in cand.iter().flatten() {
        *cand_left.entry(token).or_default() += 1;
    }
    let mut ref_left: HashMap<&str, usize> = HashMap::new();
    for &token in refs.iter().flatten() {
        *ref_left.entry(token).or_default() += 1;
    }

    let mut hits = 0;
    for sentence in &refs {
        let union: BTreeSet<usize> =
            cand.iter().flat_map(|c| lcs_positions(sentence, c)).collect();
        for position in union {
            let token = sentence[position];
            match (cand_left.get_mut(token), ref_left.get_mut(token)) {
                (Some(c), Some(r)) if *c > 0 && *r > 0 => {
                    *c -= 1;
                    *r -= 1;
                    hits += 1;
                }
                _ => {}
            }
        }
    }

    RougeTriple::from_counts(
        hits,
        cand.iter().map(Vec::len).sum(),
        refs.iter().map(Vec::len).sum(),
    )
}

/// Corpus average of per-pair ROUGE-1, ROUGE-2, ROUGE-L and ROUGE-Lsum.
pub fn rouge(candidates: &[String], references: &[String]) -> RougeScores {
    let pairs = candidates.len().min(references.len());
    if pairs == 0 {
        return RougeScores::default();
    }

    let mut sum = [RougeTriple::default(); 4];
    for (candidate, reference) in candidates.iter().zip(references) {
        let cand_owned = rouge_tokens(candidate);
        let refs_owned = rouge_tokens(reference);
        let cand: Vec<&str> = cand_owned.iter().map(String::as_str).collect();
        let refs: Vec<&str> = refs_owned.iter().map(String::as_str).collect();

        let scores = [
            rouge_n(&cand, &refs, 1),
            rouge_n(&cand, &refs, 2),
            RougeTriple::from_counts(lcs_len(&cand, &refs), cand.len(), refs.len()),
            rouge_lsum(candidate, reference),
        ];
        for (acc, s) in sum.iter_mut().zip(scores) {
            acc.precision += s.precision;
            acc.recall += s.recall;
            acc.fmeasure += s.fmeasure;
        }
    }

    let mean = |t: RougeTriple| RougeTriple {
        precision: t.precision / pairs as f64,
        recall:    t.recall / pairs as f64,
        fmeasure:  t.fmeasure / pairs as f64,
    };
    RougeScores {
        rouge1:     mean(sum[0]),
        rouge2:     mean(sum[1]),
        rouge_l:    mean(sum[2]),
        rouge_lsum: mean(sum[3]),
    }
}

// ─── Report ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionScores {
    pub bleu_1: f64,
    pub bleu_2: f64,
    pub bleu_3: f64,
    pub bleu_4: f64,
    pub rouge:  RougeScores,
}

impl CaptionScores {
    pub fn compute(candidates: &[String], references: &[String]) -> Self {
        Self {
            bleu_1: corpus_bleu(candidates, references, 1),
            bleu_2: corpus_bleu(candidates, references, 2),
            bleu_3: corpus_bleu(candidates, references, 3),
            bleu_4: corpus_bleu(candidates, references, 4),
            rouge:  rouge(candidates, references),
        }
    }
}

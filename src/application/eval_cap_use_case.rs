// ============================================================
// Layer 2 — EvalCapUseCase
// ============================================================
// Scores a trained captioning head on the cached validation set.
//
//   Step 1: Read checkpoint.json next to --weight, rebuild the
//           head with an Identity visual stage, load the weights
//   Step 2: One validation shard at a time, in index order:
//             prediction = beam search (EVAL.BEAM_SIZE, EVAL.MAX_LEN)
//             reference  = ground-truth ids → text, specials skipped
//   Step 3: Corpus BLEU-1..4 + ROUGE-1/2/L over the two lists
//   Step 4: Log, print and write eval_captions.json beside the weights
//
// A shard that cannot be read stops the evaluation.
//
// Reference: Papineni et al. (2002) BLEU
//            Lin (2004) ROUGE

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::data::{
    loader::{EpochLoader, LoaderConfig},
    shard_dataset::ShardDataset,
};
use crate::domain::{
    clip::CapSample,
    model_type::{ModelType, Split},
    traits::{CaptionGenerator, TextDecoder},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    config::{EvalSettings, ExperimentConfig},
    seed::set_deterministic,
    tokenizer_store::{CaptionTokenizer, TokenizerStore},
};
use crate::ml::{
    backend::{dispatch, BackendJob},
    cap_head::{CaptionModel, CaptioningHeadConfig},
    captioner::HeadCaptioner,
    encoder::FrameEncoder,
    text_metrics::CaptionScores,
};

pub const REPORT_FILE: &str = "eval_captions.json";

/// Predictions and references in loader order, plus their scores.
#[derive(Debug, Clone, Serialize)]
pub struct CaptionEvaluation {
    pub scores:      CaptionScores,
    pub predictions: Vec<String>,
    pub references:  Vec<String>,
}

impl CaptionEvaluation {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

// ─── Evaluation loop ──────────────────────────────────────────────────────────
/// Caption every item of `loader` and score the results.
pub fn evaluate_captions<G: CaptionGenerator, D: TextDecoder>(
    loader:    &EpochLoader<CapSample>,
    generator: &G,
    decoder:   &D,
    settings:  &EvalSettings,
) -> Result<CaptionEvaluation> {
    let bar = ProgressBar::new(loader.dataset_len() as u64);
    bar.set_style(
        ProgressStyle::with_template("eval [{bar:40}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut predictions = Vec::with_capacity(loader.dataset_len());
    let mut references = Vec::with_capacity(loader.dataset_len());

    for items in loader.iter(0) {
        for sample in items? {
            let prediction = generator.generate(&sample, settings.max_len, settings.beam_size)?;
            let reference = decoder.decode(&sample.token_ids())?;
            tracing::debug!("true: '{}' | generated: '{}'", reference, prediction);

            predictions.push(prediction);
            references.push(reference);
            bar.inc(1);
        }
    }
    bar.finish_and_clear();

    let scores = CaptionScores::compute(&predictions, &references);
    Ok(CaptionEvaluation { scores, predictions, references })
}

// ─── EvalCapUseCase ───────────────────────────────────────────────────────────
pub struct EvalCapUseCase {
    config: ExperimentConfig,
    weight: PathBuf,
}

impl EvalCapUseCase {
    pub fn new(config: ExperimentConfig, weight: impl Into<PathBuf>) -> Result<Self> {
        anyhow::ensure!(
            config.model.kind == ModelType::Captioning,
            "eval-cap needs MODEL.TYPE captioning, got {}",
            config.model.kind
        );
        Ok(Self { config, weight: weight.into() })
    }

    pub fn execute(self) -> Result<CaptionEvaluation> {
        let accelerator = self.config.train.accelerator;
        let job = EvalCapJob { config: self.config, weight: self.weight.clone() };
        let evaluation = dispatch(accelerator, job)?;
        anyhow::ensure!(!evaluation.is_empty(), "No validation clips were captioned");

        let path = write_report(&self.weight, &evaluation)?;
        let s = &evaluation.scores;
        tracing::info!(
            "Evaluated {} captions: BLEU-4 {:.4}, ROUGE-L F {:.4} (report '{}')",
            evaluation.len(),
            s.bleu_4,
            s.rouge.rouge_l.fmeasure,
            path.display()
        );
        Ok(evaluation)
    }
}

struct EvalCapJob {
    config: ExperimentConfig,
    weight: PathBuf,
}

impl BackendJob for EvalCapJob {
    type Output = CaptionEvaluation;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<CaptionEvaluation> {
        set_deterministic::<B>(self.config.seed);
        evaluate_checkpoint::<B::InnerBackend>(&self.config, &self.weight, &device)
    }
}

/// Rebuild the head saved at `weight` and evaluate it on the val shards.
pub fn evaluate_checkpoint<B: Backend>(
    config: &ExperimentConfig,
    weight: &Path,
    device: &B::Device,
) -> Result<CaptionEvaluation> {
    let meta = CheckpointManager::load_meta::<CaptioningHeadConfig>(weight)?;
    anyhow::ensure!(
        meta.model_type == ModelType::Captioning,
        "'{}' holds a {} head, not a captioning head",
        weight.display(),
        meta.model_type
    );

    let tokenizer_path = meta
        .tokenizer
        .clone()
        .unwrap_or_else(|| TokenizerStore::new(&config.data.encoding_dir).path());
    let tokenizer = Arc::new(CaptionTokenizer::from_file(&tokenizer_path)?);

    let head = CheckpointManager::load_module::<B, _>(weight, meta.head.init::<B>(device), device)?;
    let model = CaptionModel::new(head, FrameEncoder::Identity, tokenizer.pad_id());
    let captioner = HeadCaptioner::new(model, Arc::clone(&tokenizer), device.clone());

    let val_set = ShardDataset::<CapSample>::new(&config.data.encoding_dir, Split::Val)?;
    let loader = EpochLoader::new(
        Arc::new(val_set),
        LoaderConfig::ordered(1)
            .num_workers(config.data.num_workers)
            .prefetch_factor(config.data.prefetch_factor),
    )?;
    tracing::info!(
        "Evaluating '{}' (epoch {}) on {} validation clips",
        weight.display(),
        meta.epoch,
        loader.dataset_len()
    );

    evaluate_captions(&loader, &captioner, &*tokenizer, &config.eval)
}

// ─── Report ───────────────────────────────────────────────────────────────────
fn write_report(weight: &Path, evaluation: &CaptionEvaluation) -> Result<PathBuf> {
    let s = &evaluation.scores;
    println!("BLEU_1: {:.4}", s.bleu_1);
    println!("BLEU_2: {:.4}", s.bleu_2);
    println!("BLEU_3: {:.4}", s.bleu_3);
    println!("BLEU_4: {:.4}", s.bleu_4);
    println!("ROUGE: {}", serde_json::to_string_pretty(&s.rouge)?);

    let dir = weight.parent().unwrap_or_else(|| Path::new("."));
    let path = dir.join(REPORT_FILE);
    fs::write(&path, serde_json::to_string_pretty(evaluation)?)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tensor::HostTensor;
    use burn::data::dataset::InMemDataset;
    use std::cell::RefCell;

    /// Returns canned captions and remembers the arguments it was called with.
    struct StubGenerator {
        captions: Vec<&'static str>,
        calls:    RefCell<Vec<(usize, usize)>>,
    }

    impl CaptionGenerator for StubGenerator {
        fn generate(&self, _sample: &CapSample, max_len: usize, beam_size: usize) -> Result<String> {
            let mut calls = self.calls.borrow_mut();
            let caption = self.captions[calls.len()].to_string();
            calls.push((max_len, beam_size));
            Ok(caption)
        }
    }

    /// Maps id n to the word "wn".
    struct StubDecoder;

    impl TextDecoder for StubDecoder {
        fn decode(&self, ids: &[i64]) -> Result<String> {
            Ok(ids.iter().map(|id| format!("w{id}")).collect::<Vec<_>>().join(" "))
        }
    }

    fn sample(ids: Vec<i64>, mask: Vec<i64>) -> CapSample {
        let n = ids.len();
        CapSample {
            frames:         HostTensor::u8(vec![1, 1, 1, 2], vec![0, 255]).unwrap(),
            input_ids:      HostTensor::i64(vec![1, n], ids).unwrap(),
            attention_mask: HostTensor::i64(vec![1, n], mask).unwrap(),
        }
    }

    #[test]
    fn test_two_items_give_two_pairs() {
        let items = vec![sample(vec![1, 2, 0], vec![1, 1, 0]), sample(vec![3, 4, 5], vec![1, 1, 1])];
        let loader =
            EpochLoader::new(Arc::new(InMemDataset::new(items)), LoaderConfig::ordered(1)).unwrap();
        let generator = StubGenerator {
            captions: vec!["w1 w2", "w3 w9 w5"],
            calls:    RefCell::new(Vec::new()),
        };

        let settings = EvalSettings { beam_size: 3, max_len: 128 };
        let eval = evaluate_captions(&loader, &generator, &StubDecoder, &settings).unwrap();

        assert_eq!(eval.len(), 2);
        assert_eq!(eval.references, vec!["w1 w2".to_string(), "w3 w4 w5".to_string()]);
        assert_eq!(eval.predictions, vec!["w1 w2".to_string(), "w3 w9 w5".to_string()]);
        assert_eq!(*generator.calls.borrow(), vec![(128, 3), (128, 3)]);
        assert!((eval.scores.bleu_1 - 4.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_report_written_beside_weights() {
        let dir = tempfile::tempdir().unwrap();
        let eval = CaptionEvaluation {
            scores:      CaptionScores::compute(&["a b".to_string()], &["a b".to_string()]),
            predictions: vec!["a b".to_string()],
            references:  vec!["a b".to_string()],
        };
        let path = write_report(&dir.path().join("last"), &eval).unwrap();
        assert_eq!(path, dir.path().join(REPORT_FILE));

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["scores"]["bleu_1"], 1.0);
        assert_eq!(json["scores"]["rouge"]["rougeL"]["fmeasure"], 1.0);
        assert_eq!(json["scores"]["rouge"]["rougeLsum"]["fmeasure"], 1.0);
        assert_eq!(json["predictions"][0], "a b");
    }
}

// ============================================================
// Layer 2 — EncodeUseCase (encoder-cache writer)
// ============================================================
// Streams every clip of both splits through the frozen encoder
// once and writes the results as shard pairs:
//
//   {ENCODING_DIR}/train_x_0.safetensors  train_y_0.safetensors
//                  train_x_1.safetensors  train_y_1.safetensors
//                  ...
//                  val_x_0.safetensors    val_y_0.safetensors
//
// Batch i of the loader becomes pair i. Loader order is clip
// order, so the cache is reproducible.
//
// Classification
//   Step 1: Refuse to run if ENCODING_DIR exists  (nothing written)
//   Step 2: Seed, build clip sources and encoder
//   Step 3: Batches of CACHE_BATCH_SIZE clips → patch projection
//           → F32 [N, HIDDEN_SIZE] features + unmodified labels
//
// Captioning
//   Step 1: Create or reuse ENCODING_DIR
//   Step 2: Load or build the tokenizer from train captions
//   Step 3: One clip per batch → U8 frame stack [T, C, H, W] +
//           input_ids / attention_mask
//
// Reference: Burn Book §4 (Datasets), safetensors format

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use crate::data::{
    collate::{collate_classification, to_device, to_host, CaptionCollate},
    dataset::{create_clip_sources, CaptioningClips, ClassificationClips},
    loader::{EpochLoader, LoaderConfig},
    shard::ShardStore,
};
use crate::domain::{
    clip::ClsSample,
    error::PipelineError,
    model_type::{ModelType, Split},
};
use crate::infra::{
    config::ExperimentConfig,
    seed::{set_deterministic, RunSeed, SeedStream},
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    backend::{dispatch, BackendJob},
    encoder::{FrameEncoder, FrameGeometry, PatchProjection},
};

/// Clips per classification shard. Independent of TRAIN.BATCH_SIZE.
pub const CACHE_BATCH_SIZE: usize = 16;

const FRAME_CHANNELS: usize = 3;

/// What one encoding pass wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheReport {
    pub train_shards: usize,
    pub val_shards:   usize,
    pub clips:        usize,
}

impl CacheReport {
    fn record(&mut self, split: Split, shards: usize, clips: usize) {
        match split {
            Split::Train => self.train_shards = shards,
            Split::Val   => self.val_shards = shards,
        }
        self.clips += clips;
    }
}

fn progress_bar(split: Split, batches: usize) -> ProgressBar {
    let bar = ProgressBar::new(batches as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg:>6} [{bar:40}] {pos}/{len} shards ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(split.to_string());
    bar
}

fn loader_config(config: &ExperimentConfig, batch_size: usize) -> LoaderConfig {
    LoaderConfig::ordered(batch_size)
        .num_workers(config.data.num_workers)
        .prefetch_factor(config.data.prefetch_factor)
}

// ─── EncodeUseCase ────────────────────────────────────────────────────────────
pub struct EncodeUseCase {
    config: ExperimentConfig,
}

impl EncodeUseCase {
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    pub fn execute(self) -> Result<CacheReport> {
        let dir = self.config.data.encoding_dir.clone();
        let store = match self.config.model.kind {
            ModelType::Classification => ShardStore::create_fresh(&dir)?,
            ModelType::Captioning => ShardStore::create_or_reuse(&dir)?,
        };
        tracing::info!("Writing {} encodings to '{}'", self.config.model.kind, dir.display());

        let accelerator = self.config.train.accelerator;
        let report = dispatch(accelerator, EncodeJob { config: self.config, store })?;

        tracing::info!(
            "Encoding cache complete: {} clips, {} train shards, {} val shards",
            report.clips,
            report.train_shards,
            report.val_shards
        );
        Ok(report)
    }
}

struct EncodeJob {
    config: ExperimentConfig,
    store:  ShardStore,
}

impl BackendJob for EncodeJob {
    type Output = CacheReport;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<CacheReport> {
        let seed = set_deterministic::<B>(self.config.seed);
        match self.config.model.kind {
            ModelType::Classification => {
                encode_classification::<B::InnerBackend>(&self.config, &self.store, &seed, &device)
            }
            ModelType::Captioning => encode_captioning(&self.config, &self.store, &seed),
        }
    }
}

// ─── Classification ───────────────────────────────────────────────────────────
/// Encode both splits into `store`, CACHE_BATCH_SIZE clips per shard.
pub fn encode_classification<B: Backend>(
    config: &ExperimentConfig,
    store:  &ShardStore,
    seed:   &RunSeed,
    device: &B::Device,
) -> Result<CacheReport> {
    let sources = create_clip_sources(config, seed)?;

    let geometry = FrameGeometry {
        channels: FRAME_CHANNELS,
        height:   config.data.crop_size,
        width:    config.data.crop_size,
    };
    let mut rng = seed.rng(SeedStream::Encoder);
    let encoder = FrameEncoder::PatchProjection(PatchProjection::new(
        geometry,
        config.model.encoder.patch_grid,
        config.model.encoder.hidden_size,
        &mut rng,
    )?);

    let mut report = CacheReport::default();
    for split in Split::ALL {
        let dataset = ClassificationClips::new(sources.get(split));
        let loader = EpochLoader::new(Arc::new(dataset), loader_config(config, CACHE_BATCH_SIZE))?;
        let bar = progress_bar(split, loader.num_batches());

        let mut shards = 0usize;
        for (index, items) in loader.iter(0).enumerate() {
            let batch = collate_classification(items?)?;
            let clips = to_device::<B, 5>(&batch.x, device)?;
            let features = to_host(encoder.encode_clips(clips))?;

            let sample = ClsSample::new(features, batch.y)?;
            store
                .write(split, index, sample)
                .with_context(|| format!("Cannot write {split} shard {index}"))?;
            shards += 1;
            bar.inc(1);
        }
        bar.finish_and_clear();

        tracing::info!("{}: {} clips → {} shard pairs", split, loader.dataset_len(), shards);
        report.record(split, shards, loader.dataset_len());
    }
    Ok(report)
}

// ─── Captioning ───────────────────────────────────────────────────────────────
/// Store each clip's frame stack, quantized to u8, with its tokenized caption.
pub fn encode_captioning(
    config: &ExperimentConfig,
    store:  &ShardStore,
    seed:   &RunSeed,
) -> Result<CacheReport> {
    let sources = create_clip_sources(config, seed)?;

    let tokenizer = TokenizerStore::new(store.dir())
        .load_or_build(&sources.train_captions()?, config.model.caption.vocab_size)?;
    let collate = CaptionCollate::new(Arc::new(tokenizer), config.model.caption.max_len);

    let mut report = CacheReport::default();
    for split in Split::ALL {
        let dataset = CaptioningClips::new(sources.get(split));
        let loader = EpochLoader::new(Arc::new(dataset), loader_config(config, 1))?;
        let bar = progress_bar(split, loader.num_batches());

        let mut shards = 0usize;
        for (index, items) in loader.iter(0).enumerate() {
            let sample = collate
                .collate(items?)?
                .into_cap_samples()
                .into_iter()
                .next()
                .ok_or(PipelineError::EmptyBatch)?;
            store
                .write(split, index, sample)
                .with_context(|| format!("Cannot write {split} shard {index}"))?;
            shards += 1;
            bar.inc(1);
        }
        bar.finish_and_clear();

        tracing::info!("{}: {} clips → {} shard pairs", split, loader.dataset_len(), shards);
        report.record(split, shards, loader.dataset_len());
    }
    Ok(report)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard_dataset::ShardDataset;
    use crate::domain::clip::CapSample;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};
    use burn::data::dataset::Dataset;
    use std::path::Path;

    fn config(kind: &str, encoding_dir: &Path) -> ExperimentConfig {
        let yaml = format!(
            "
SEED: 11
EXPERIMENT: encode_test
MODEL:
  TYPE: {kind}
  NUM_CLASSES: 5
  ENCODER:
    HIDDEN_SIZE: 6
    PATCH_GRID: 2
  CAPTION:
    MAX_LEN: 12
    VOCAB_SIZE: 300
DATA:
  DATASET: synthetic
  NUM_WORKERS: 2
  ENCODING_DIR: {}
  NUM_SAMPLED_FRAMES: 2
  CROP_SIZE: 4
  SYNTHETIC:
    NUM_TRAIN: 34
    NUM_VAL: 3
TRAIN:
  BATCH_SIZE: 4
  NUM_EPOCHS: 1
  ACCELERATOR: cpu
",
            encoding_dir.display()
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_classification_cache_layout() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("enc");
        let cfg = config("classification", &dir);

        let store = ShardStore::create_fresh(&dir).unwrap();
        let report =
            encode_classification::<NdArray>(&cfg, &store, &RunSeed::new(cfg.seed), &NdArrayDevice::Cpu)
                .unwrap();
        assert_eq!(report, CacheReport { train_shards: 3, val_shards: 1, clips: 37 });
        assert_eq!(count_files(&dir), 8);

        let train = ShardDataset::<ClsSample>::new(&dir, Split::Train).unwrap();
        let sizes: Vec<usize> = (0..train.len()).map(|i| train.get(i).unwrap().len()).collect();
        assert_eq!(sizes, vec![16, 16, 2]);

        for i in 0..train.len() {
            let item = train.get(i).unwrap();
            assert_eq!(item.x.shape()[0], item.y.shape()[0]);
            assert_eq!(item.x.shape()[1], 6);
            assert_eq!(item.y.shape()[1], 5);
        }
        assert!(dir.join("train_x_2.safetensors").exists());
        assert!(dir.join("train_y_2.safetensors").exists());
    }

    #[test]
    fn test_classification_rerun_fails_without_writing() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("enc");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("keep.txt"), "x").unwrap();

        let err = EncodeUseCase::new(config("classification", &dir)).execute().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::OutputDirExists(_))
        ));
        assert_eq!(count_files(&dir), 1);
    }

    #[test]
    fn test_same_seed_same_features() {
        let root = tempfile::tempdir().unwrap();
        let encode = |name: &str| {
            let dir = root.path().join(name);
            let cfg = config("classification", &dir);
            let store = ShardStore::create_fresh(&dir).unwrap();
            encode_classification::<NdArray>(&cfg, &store, &RunSeed::new(cfg.seed), &NdArrayDevice::Cpu)
                .unwrap();
            ShardDataset::<ClsSample>::new(&dir, Split::Val).unwrap().get(0).unwrap()
        };
        assert_eq!(encode("a"), encode("b"));
    }

    #[test]
    fn test_captioning_cache_holds_one_clip_per_shard() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("enc");
        let cfg = config("captioning", &dir);
        let store = ShardStore::create_or_reuse(&dir).unwrap();

        let report = encode_captioning(&cfg, &store, &RunSeed::new(cfg.seed)).unwrap();
        assert_eq!(report, CacheReport { train_shards: 34, val_shards: 3, clips: 37 });
        assert!(dir.join("tokenizer.json").exists());

        let val = ShardDataset::<CapSample>::new(&dir, Split::Val).unwrap();
        assert_eq!(val.len(), 3);
        let item = val.get(2).unwrap();
        assert_eq!(item.frames.shape(), &[2, 3, 4, 4]);
        assert!(item.frames.as_u8().is_some());
        assert_eq!(item.input_ids.shape()[0], 1);
        assert_eq!(item.token_ids().first(), Some(&101));
        assert_eq!(item.token_ids().last(), Some(&102));

        // rerun reuses the directory and overwrites the same indices
        let again = encode_captioning(&cfg, &store, &RunSeed::new(cfg.seed)).unwrap();
        assert_eq!(again, report);
        assert_eq!(count_files(&dir), 2 * 37 + 1);
    }
}

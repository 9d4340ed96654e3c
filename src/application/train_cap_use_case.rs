// ============================================================
// Layer 2 — TrainCapUseCase
// ============================================================
// Trains the captioning head on cached frame stacks.
//
//   Step 1: Seed the backend
//   Step 2: Open train/val shards, load the tokenizer the cache
//           was written with
//   Step 3: Build the head; frames are cached raw, so the
//           injected visual stage is Identity (scale to [0, 1])
//   Step 4: Train, checkpoint every SAVE_EVERY_N_EPOCHS + last
//
// checkpoint.json records the head config and the tokenizer
// path, which is all eval-cap needs to rebuild the model.

use anyhow::{Context, Result};
use burn::{data::dataset::Dataset, tensor::backend::AutodiffBackend};
use std::sync::Arc;

use crate::data::{
    loader::{EpochLoader, LoaderConfig},
    shard_dataset::ShardDataset,
};
use crate::domain::{clip::CapSample, model_type::{ModelType, Split}};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    config::ExperimentConfig,
    metrics::MetricsLogger,
    seed::{set_deterministic, SeedStream},
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    backend::{dispatch, warn_unsupported, BackendJob},
    cap_head::{CaptionModel, CaptioningHeadConfig},
    encoder::{FrameEncoder, FrameGeometry},
    trainer::{train_captioning, TrainRun, TrainSummary},
};

pub struct TrainCapUseCase {
    config: ExperimentConfig,
}

impl TrainCapUseCase {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        anyhow::ensure!(
            config.model.kind == ModelType::Captioning,
            "train-cap needs MODEL.TYPE captioning, got {}",
            config.model.kind
        );
        Ok(Self { config })
    }

    pub fn execute(self) -> Result<TrainSummary> {
        warn_unsupported(&self.config.train);
        let accelerator = self.config.train.accelerator;
        dispatch(accelerator, TrainCapJob { config: self.config })
    }
}

struct TrainCapJob {
    config: ExperimentConfig,
}

impl BackendJob for TrainCapJob {
    type Output = TrainSummary;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<TrainSummary> {
        train_captions_from_cache::<B>(&self.config, &device)
    }
}

pub fn train_captions_from_cache<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<TrainSummary> {
    let seed = set_deterministic::<B>(config.seed);
    let data = &config.data;

    // ── Step 1: Cached datasets + tokenizer ───────────────────────────────────
    let train_set = ShardDataset::<CapSample>::new(&data.encoding_dir, Split::Train)?;
    let val_set = ShardDataset::<CapSample>::new(&data.encoding_dir, Split::Val)?;
    anyhow::ensure!(
        !train_set.is_empty(),
        "no training shards under '{}'. Run `encode` first",
        data.encoding_dir.display()
    );

    let first = train_set.load(0).context("Cannot read the first training shard")?;
    let geometry = FrameGeometry::from_shape(first.frames.shape()).with_context(|| {
        format!("cached frames should be [T, C, H, W], got {:?}", first.frames.shape())
    })?;

    let tokenizer_store = TokenizerStore::new(&data.encoding_dir);
    let tokenizer = tokenizer_store
        .load()
        .context("The encoding cache has no tokenizer. Run `encode` with MODEL.TYPE captioning")?;

    // ── Step 2: Model ─────────────────────────────────────────────────────────
    let encoder = FrameEncoder::Identity;
    let caption = &config.model.caption;
    let head_config = CaptioningHeadConfig::new(
        encoder.output_dim(geometry.frame_dim()),
        tokenizer.vocab_size(),
        caption.max_len,
        caption.d_model,
        caption.num_heads,
        caption.num_layers,
        caption.d_ff,
        caption.dropout,
    );
    let model = CaptionModel::new(head_config.init::<B>(device), encoder, tokenizer.pad_id());
    tracing::info!(
        "Captioning head ready: visual_dim={}, vocab={}, d_model={}, layers={}",
        head_config.visual_dim,
        head_config.vocab_size,
        head_config.d_model,
        head_config.num_layers
    );

    // ── Step 3: Loaders ───────────────────────────────────────────────────────
    let batch_size = config.train.batch_size;
    let train_loader = EpochLoader::new(
        Arc::new(train_set),
        LoaderConfig::ordered(batch_size)
            .shuffle(seed.derive(SeedStream::Shuffle))
            .num_workers(data.num_workers)
            .prefetch_factor(data.prefetch_factor),
    )?;
    let val_loader = EpochLoader::new(
        Arc::new(val_set),
        LoaderConfig::ordered(batch_size)
            .num_workers(data.num_workers)
            .prefetch_factor(data.prefetch_factor),
    )?;

    // ── Step 4: Train ─────────────────────────────────────────────────────────
    let run_dir = config.run_dir();
    let mut run = TrainRun {
        checkpoints: CheckpointManager::new(&run_dir)?,
        metrics:     MetricsLogger::new(&run_dir)?,
        meta:        CheckpointMeta {
            model_type: ModelType::Captioning,
            experiment: config.experiment.clone(),
            epoch:      0,
            head:       head_config,
            tokenizer:  Some(tokenizer.path().to_path_buf()),
        },
    };
    tracing::info!("Run directory: '{}'", run_dir.display());

    train_captioning::<B, _>(device, model, &train_loader, &val_loader, &config.train, &mut run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard::ShardStore;
    use crate::domain::tensor::HostTensor;
    use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};

    #[test]
    fn test_trains_and_records_tokenizer() {
        let root = tempfile::tempdir().unwrap();
        let yaml = format!(
            "
SEED: 5
EXPERIMENT: cap
OUTPUT_DIR: {root}/runs
MODEL:
  TYPE: captioning
  CAPTION:
    D_MODEL: 8
    NUM_HEADS: 2
    NUM_LAYERS: 1
    D_FF: 16
    DROPOUT: 0.0
    MAX_LEN: 8
DATA:
  DATASET: synthetic
  NUM_WORKERS: 1
  ENCODING_DIR: {root}/enc
TRAIN:
  BATCH_SIZE: 2
  NUM_EPOCHS: 1
  ACCELERATOR: cpu
",
            root = root.path().display()
        );
        let cfg: ExperimentConfig = serde_yaml::from_str(&yaml).unwrap();

        let store = ShardStore::create_fresh(&cfg.data.encoding_dir).unwrap();
        let tokenizer = TokenizerStore::new(store.dir())
            .load_or_build(&["a person opens a door".to_string()], 200)
            .unwrap();
        let sample = |caption: &str| {
            let ids: Vec<i64> =
                tokenizer.encode_caption(caption, 8).unwrap().into_iter().map(i64::from).collect();
            let n = ids.len();
            CapSample {
                frames:         HostTensor::u8(vec![2, 1, 2, 2], vec![7; 8]).unwrap(),
                input_ids:      HostTensor::i64(vec![1, n], ids).unwrap(),
                attention_mask: HostTensor::i64(vec![1, n], vec![1; n]).unwrap(),
            }
        };
        store.write(Split::Train, 0, sample("a person opens a door")).unwrap();
        store.write(Split::Train, 1, sample("a door")).unwrap();
        store.write(Split::Val, 0, sample("a person")).unwrap();

        let summary =
            train_captions_from_cache::<Autodiff<NdArray>>(&cfg, &NdArrayDevice::Cpu).unwrap();
        assert!(summary.best_value.is_finite());

        let weight = summary.last.clone().unwrap();
        assert_eq!(weight, cfg.run_dir().join("last.mpk"));
        let meta: CheckpointMeta<CaptioningHeadConfig> = CheckpointManager::load_meta(&weight).unwrap();
        assert_eq!(meta.head.visual_dim, 4);
        assert_eq!(meta.model_type, ModelType::Captioning);
        assert_eq!(meta.tokenizer, Some(store.dir().join("tokenizer.json")));

        let fresh = meta.head.init::<NdArray>(&NdArrayDevice::Cpu);
        assert!(CheckpointManager::load_module::<NdArray, _>(&weight, fresh, &NdArrayDevice::Cpu).is_ok());
    }
}

// ============================================================
// Layer 2 — TrainClsUseCase
// ============================================================
// Trains the classification head on cached encodings.
//
//   Step 1: Apply command-line overrides (each one renames the
//           experiment so runs never overwrite each other)
//   Step 2: Seed the backend, derive the shuffle seed
//   Step 3: Open train/val shard datasets, read the feature width
//   Step 4: Optional inverse-frequency class weights
//   Step 5: Train, checkpoints under {OUTPUT_DIR}/{EXPERIMENT}
//
// Each loader item is one shard, i.e. up to 16 cached clips, so
// TRAIN.BATCH_SIZE counts shards per step. The train loader is
// shuffled and drops its last incomplete batch.

use anyhow::{Context, Result};
use burn::{data::dataset::Dataset, tensor::backend::AutodiffBackend};
use std::sync::Arc;

use crate::application::class_weights::{compute_class_weights, write_class_weights};
use crate::data::{
    loader::{EpochLoader, LoaderConfig},
    shard_dataset::ShardDataset,
};
use crate::domain::{clip::ClsSample, model_type::{ModelType, Split}};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    config::ExperimentConfig,
    metrics::MetricsLogger,
    seed::{set_deterministic, SeedStream},
};
use crate::ml::{
    backend::{dispatch, warn_unsupported, BackendJob},
    cls_head::ClassificationHeadConfig,
    trainer::{train_classification, TrainRun, TrainSummary},
};

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

// ─── Overrides ────────────────────────────────────────────────────────────────
/// Hyper-parameters that may be set from the command line.
#[derive(Debug, Clone, Default)]
pub struct ClsOverrides {
    pub init_lr:           Option<f64>,
    pub layers:            Vec<usize>,
    pub dropout:           Option<f64>,
    pub layer_norm:        bool,
    pub use_class_weights: bool,
    pub lr_milestones:     Vec<usize>,
}

impl ClsOverrides {
    /// Write the overrides into `config`, suffixing the experiment name once
    /// per applied override.
    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(lr) = self.init_lr {
            config.train.optim.init_learning_rate = lr;
            tracing::info!("Setting initial learning rate to {}", lr);
            config.experiment += &format!("_LR{lr}");
        }
        if !self.layers.is_empty() {
            config.model.head.layers = self.layers.clone();
            tracing::info!("Setting MLP layers to {:?}", self.layers);
            config.experiment += &format!("_layers{}", join(&self.layers));
        }
        if let Some(p) = self.dropout {
            config.model.head.dropout = p;
            tracing::info!("Setting MLP dropout to {}", p);
            config.experiment += &format!("_dropout{p}");
        }
        if self.layer_norm {
            config.model.head.layer_norm = true;
            tracing::info!("Setting MLP layer norm to true");
            config.experiment += "_ln";
        }
        if self.use_class_weights {
            config.model.use_class_weights = true;
            tracing::info!("Using class weights");
            config.experiment += "_cw2";
        }
        if !self.lr_milestones.is_empty() {
            config.train.optim.lr_milestones = self.lr_milestones.clone();
            tracing::info!("Setting LR milestones to {:?}", self.lr_milestones);
            config.experiment += &format!("_lrm{}", join(&self.lr_milestones));
        }
    }
}

// ─── TrainClsUseCase ──────────────────────────────────────────────────────────
pub struct TrainClsUseCase {
    config: ExperimentConfig,
}

impl TrainClsUseCase {
    pub fn new(mut config: ExperimentConfig, overrides: &ClsOverrides) -> Result<Self> {
        anyhow::ensure!(
            config.model.kind == ModelType::Classification,
            "train-cls needs MODEL.TYPE classification, got {}",
            config.model.kind
        );
        overrides.apply(&mut config);
        Ok(Self { config })
    }

    pub fn experiment(&self) -> &str {
        &self.config.experiment
    }

    pub fn execute(self) -> Result<TrainSummary> {
        warn_unsupported(&self.config.train);
        let accelerator = self.config.train.accelerator;
        dispatch(accelerator, TrainClsJob { config: self.config })
    }
}

struct TrainClsJob {
    config: ExperimentConfig,
}

impl BackendJob for TrainClsJob {
    type Output = TrainSummary;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<TrainSummary> {
        train_from_cache::<B>(&self.config, &device)
    }
}

/// The whole training run, generic over the autodiff backend.
pub fn train_from_cache<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<TrainSummary> {
    let seed = set_deterministic::<B>(config.seed);
    let data = &config.data;

    // ── Step 1: Cached datasets ───────────────────────────────────────────────
    let train_set = ShardDataset::<ClsSample>::new(&data.encoding_dir, Split::Train)?;
    let val_set = ShardDataset::<ClsSample>::new(&data.encoding_dir, Split::Val)?;
    anyhow::ensure!(
        !train_set.is_empty(),
        "no training shards under '{}'. Run `encode` first",
        data.encoding_dir.display()
    );

    let first = train_set.load(0).context("Cannot read the first training shard")?;
    let input_dim = first.x.shape().get(1).copied().unwrap_or(0);
    let num_classes = first.y.shape().get(1).copied().unwrap_or(0);
    anyhow::ensure!(
        num_classes == config.model.num_classes,
        "cached labels have {} classes but MODEL.NUM_CLASSES is {}",
        num_classes,
        config.model.num_classes
    );
    tracing::info!(
        "Training shards: {}, validation shards: {}, feature width {}",
        train_set.len(),
        val_set.len(),
        input_dim
    );

    // ── Step 2: Loaders ───────────────────────────────────────────────────────
    let batch_size = config.train.batch_size;
    let train_loader = EpochLoader::new(
        Arc::new(train_set),
        LoaderConfig::ordered(batch_size)
            .shuffle(seed.derive(SeedStream::Shuffle))
            .drop_last(true)
            .num_workers(data.num_workers)
            .prefetch_factor(data.prefetch_factor),
    )?;
    let val_loader = EpochLoader::new(
        Arc::new(val_set),
        LoaderConfig::ordered(batch_size)
            .num_workers(data.num_workers)
            .prefetch_factor(data.prefetch_factor),
    )?;

    // ── Step 3: Class weights ─────────────────────────────────────────────────
    let class_weights = if config.model.use_class_weights {
        let weights = compute_class_weights(&data.encoding_dir)?;
        write_class_weights(&data.encoding_dir, &weights)?;
        Some(weights)
    } else {
        None
    };

    // ── Step 4: Train ─────────────────────────────────────────────────────────
    let head = &config.model.head;
    let head_config = ClassificationHeadConfig::new(
        input_dim,
        num_classes,
        head.layers.clone(),
        head.dropout,
        head.layer_norm,
    );

    let run_dir = config.run_dir();
    let mut run = TrainRun {
        checkpoints: CheckpointManager::new(&run_dir)?,
        metrics:     MetricsLogger::new(&run_dir)?,
        meta:        CheckpointMeta {
            model_type: ModelType::Classification,
            experiment: config.experiment.clone(),
            epoch:      0,
            head:       head_config.clone(),
            tokenizer:  None,
        },
    };
    tracing::info!("Run directory: '{}'", run_dir.display());

    train_classification::<B, _>(
        device,
        &head_config,
        &train_loader,
        &val_loader,
        class_weights.as_deref(),
        &config.train,
        &mut run,
    )
}

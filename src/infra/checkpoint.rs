// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores head weights using Burn's CompactRecorder.
//
// What gets saved per run directory:
//   1. Head weights (.mpk files)  — one per saved epoch
//   2. checkpoint.json              — head config + bookkeeping
//
// The sidecar carries the exact head architecture, so the
// evaluation command can rebuild the module from nothing but
// the --weight path before loading the parameters into it.
//
// File naming convention:
//   runs/<experiment>/
//     epoch_0.mpk         ← periodic snapshots (captioning)
//     best.mpk            ← best epoch by the monitored metric
//     last.mpk            ← always the most recent epoch
//     checkpoint.json
//     metrics.csv
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{CompactRecorder, Recorder},
    tensor::backend::Backend,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::model_type::ModelType;

pub const META_FILE: &str = "checkpoint.json";
/// Extension CompactRecorder appends to every record path.
pub const RECORD_EXTENSION: &str = "mpk";

/// Everything needed to rebuild a head before loading its weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta<C> {
    pub model_type: ModelType,
    pub experiment: String,
    /// Last epoch written (0-based)
    pub epoch:      usize,
    pub head:       C,
    /// Tokenizer JSON the head was trained against (captioning only)
    #[serde(default)]
    pub tokenizer:  Option<PathBuf>,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory (and parents) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Save any burn module as `{dir}/{name}.mpk` and return that file.
    pub fn save_module<B: Backend, M: Module<B>>(&self, module: &M, name: &str) -> Result<PathBuf> {
        let stem = self.dir.join(name);
        let recorder = CompactRecorder::new();
        Recorder::<B>::record(&recorder, module.clone().into_record(), stem.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", stem.display()))?;

        let path = stem.with_extension(RECORD_EXTENSION);
        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    pub fn save_meta<C: Serialize>(&self, meta: &CheckpointMeta<C>) -> Result<()> {
        let path = self.dir.join(META_FILE);
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        Ok(())
    }

    /// Read the sidecar that sits next to a weight file.
    pub fn load_meta<C: DeserializeOwned>(weight: &Path) -> Result<CheckpointMeta<C>> {
        let dir = weight.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join(META_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read '{}'. Was '{}' written by train-cap?",
                path.display(),
                weight.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid checkpoint sidecar", path.display()))
    }

    /// Load weights from `weight` (with or without `.mpk`) into `module`.
    /// The module must have the architecture the weights were saved from.
    pub fn load_module<B: Backend, M: Module<B>>(
        weight: &Path,
        module: M,
        device: &B::Device,
    ) -> Result<M> {
        let path = strip_record_extension(weight);
        let recorder = CompactRecorder::new();
        let record: M::Record = Recorder::<B>::load(&recorder, path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", weight.display()))?;

        tracing::info!("Loaded weights from '{}'", weight.display());
        Ok(module.load_record(record))
    }
}

/// The recorder appends its own extension, so user paths are normalised
/// to the bare stem first.
pub fn strip_record_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == RECORD_EXTENSION => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

// ============================================================
// Layer 6 — Experiment Configuration
// ============================================================
// Typed YAML configuration shared by every subcommand.
//
// A config file may start with
//
//   _BASE_: base.yaml
//
// to inherit another file (path relative to the including
// file, resolved recursively). Mappings are merged key by key
// and the including file wins on every leaf.
//
// Key names follow the upper-case convention of the YAML files
// (SEED, MODEL.TYPE, DATA.NUM_WORKERS, TRAIN.OPTIM.LR_GAMMA).
// Unknown keys are rejected so a typo never silently falls
// back to a default.
//
// Reference: serde_yaml documentation
//            Rust Book §9 (Error Handling)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::model_type::ModelType;

const BASE_KEY: &str = "_BASE_";

// ─── Top level ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct ExperimentConfig {
    pub seed:       u64,
    pub experiment: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    pub model: ModelConfig,
    pub data:  DataConfig,
    pub train: TrainSettings,

    #[serde(default)]
    pub eval: EvalSettings,
}

impl ExperimentConfig {
    /// Directory holding checkpoints, metrics and reports of this run.
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.experiment)
    }
}

// ─── MODEL ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(rename = "TYPE")]
    pub kind: ModelType,

    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    #[serde(default)]
    pub use_class_weights: bool,

    #[serde(default)]
    pub encoder: EncoderSettings,

    #[serde(default)]
    pub head: HeadSettings,

    #[serde(default)]
    pub caption: CaptionSettings,
}

/// Frozen frame encoder used by the classification cache pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct EncoderSettings {
    pub hidden_size: usize,
    pub patch_grid:  usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self { hidden_size: 256, patch_grid: 4 }
    }
}

/// Classification MLP head.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct HeadSettings {
    #[serde(default)]
    pub layers: Vec<usize>,

    #[serde(default)]
    pub dropout: f64,

    #[serde(default)]
    pub layer_norm: bool,
}

/// Captioning transformer decoder head.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields, default)]
pub struct CaptionSettings {
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    pub dropout:    f64,
    /// Longest token sequence, [CLS] and [SEP] included
    pub max_len:    usize,
    pub vocab_size: usize,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            d_model:    256,
            num_heads:  4,
            num_layers: 2,
            d_ff:       512,
            dropout:    0.1,
            max_len:    64,
            vocab_size: 8000,
        }
    }
}

// ─── DATA ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Deterministic generated clips
    Synthetic,
    /// Charades-style CSV annotations + per-video frame folders
    FrameFolder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct DataConfig {
    pub dataset:      DatasetKind,
    pub num_workers:  usize,
    pub encoding_dir: PathBuf,

    #[serde(default = "default_prefetch_factor")]
    pub prefetch_factor: usize,

    #[serde(default = "default_num_sampled_frames")]
    pub num_sampled_frames: usize,

    #[serde(default = "default_crop_size")]
    pub crop_size: usize,

    #[serde(default)]
    pub synthetic: SyntheticSettings,

    #[serde(default)]
    pub frames_dir: Option<PathBuf>,

    #[serde(default)]
    pub train_annotations: Option<PathBuf>,

    #[serde(default)]
    pub val_annotations: Option<PathBuf>,

    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields, default)]
pub struct SyntheticSettings {
    pub num_train: usize,
    pub num_val:   usize,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self { num_train: 34, num_val: 8 }
    }
}

// ─── TRAIN ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cpu,
    #[serde(alias = "wgpu", alias = "auto")]
    Gpu,
}

/// Metric that decides which epoch is kept as `best`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    ValLoss,
    ValMap,
}

impl Monitor {
    pub fn is_better(&self, candidate: f64, best: f64) -> bool {
        match self {
            Monitor::ValLoss => candidate < best,
            Monitor::ValMap  => candidate > best,
        }
    }

    pub fn worst(&self) -> f64 {
        match self {
            Monitor::ValLoss => f64::INFINITY,
            Monitor::ValMap  => f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct TrainSettings {
    pub batch_size:  usize,
    pub num_epochs:  usize,
    pub accelerator: Accelerator,

    /// "32" or "16-mixed"; YAML may write it as a bare number
    #[serde(default = "default_precision", deserialize_with = "scalar_as_string")]
    pub precision: String,

    #[serde(default = "default_devices")]
    pub devices: usize,

    #[serde(default = "default_log_steps")]
    pub log_steps: usize,

    #[serde(default = "default_monitor")]
    pub best_checkpoint_by: Monitor,

    #[serde(default = "default_save_every")]
    pub save_every_n_epochs: usize,

    #[serde(default)]
    pub optim: OptimSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields, default)]
pub struct OptimSettings {
    pub init_learning_rate: f64,
    pub lr_milestones:      Vec<usize>,
    pub lr_gamma:           f64,
}

impl Default for OptimSettings {
    fn default() -> Self {
        Self {
            init_learning_rate: 1e-3,
            lr_milestones:      Vec::new(),
            lr_gamma:           0.1,
        }
    }
}

// ─── EVAL ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields, default)]
pub struct EvalSettings {
    pub beam_size: usize,
    pub max_len:   usize,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self { beam_size: 3, max_len: 128 }
    }
}

fn default_output_dir() -> PathBuf { PathBuf::from("runs") }
fn default_num_classes() -> usize { 157 }
fn default_prefetch_factor() -> usize { 4 }
fn default_num_sampled_frames() -> usize { 8 }
fn default_crop_size() -> usize { 32 }
fn default_val_fraction() -> f64 { 0.2 }
fn default_precision() -> String { "32".to_string() }
fn default_devices() -> usize { 1 }
fn default_log_steps() -> usize { 50 }
fn default_save_every() -> usize { 1 }
fn default_monitor() -> Monitor { Monitor::ValLoss }

fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other:?}"
        ))),
    }
}

// ─── Loading ──────────────────────────────────────────────────────────────────
/// Read a YAML config, resolve its `_BASE_` chain and deserialize it.
pub fn load_config(path: impl AsRef<Path>) -> Result<ExperimentConfig> {
    let path = path.as_ref();
    let merged = load_with_base(path, 0)?;
    let config: ExperimentConfig = serde_yaml::from_value(merged)
        .with_context(|| format!("Invalid configuration in '{}'", path.display()))?;

    tracing::debug!(
        "Loaded config '{}' (experiment={}, type={})",
        path.display(),
        config.experiment,
        config.model.kind,
    );
    Ok(config)
}

fn load_with_base(path: &Path, depth: usize) -> Result<Value> {
    if depth > 16 {
        bail!("'{}': _BASE_ chain is too deep (cycle?)", path.display());
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
    let mut value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("'{}' is not valid YAML", path.display()))?;

    let base = match &mut value {
        Value::Mapping(map) => map.remove(BASE_KEY),
        _ => None,
    };

    let Some(base) = base else {
        return Ok(value);
    };
    let base_name = base
        .as_str()
        .with_context(|| format!("'{}': {BASE_KEY} must be a path", path.display()))?;
    let base_path = path.parent().unwrap_or_else(|| Path::new(".")).join(base_name);

    let mut merged = load_with_base(&base_path, depth + 1)?;
    merge_values(&mut merged, value);
    Ok(merged)
}

/// Deep merge `overlay` into `base`. Mappings merge recursively,
/// anything else is replaced.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

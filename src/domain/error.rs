// ============================================================
// Layer 3 — Pipeline Errors
// ============================================================
// The failures a user can act on, each with a purpose-written
// message. Everything else travels as anyhow::Error with
// context attached at the call site.
//
// Reference: Rust Book §9 (Error Handling)

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::model_type::Split;
use crate::domain::tensor::TensorShapeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} already exists. Please remove it if you want to continue")]
    OutputDirExists(PathBuf),

    #[error("{split}: found {x_files} x-shards but {y_files} y-shards in {dir}")]
    ShardCountMismatch {
        split:   Split,
        dir:     PathBuf,
        x_files: usize,
        y_files: usize,
    },

    #[error("{split}: shard index {index} has no matching {missing}-file in {dir}")]
    UnpairedShard {
        split:   Split,
        dir:     PathBuf,
        index:   usize,
        missing: &'static str,
    },

    #[error("malformed shard {path}: {reason}")]
    MalformedShard { path: PathBuf, reason: String },

    #[error("features and labels disagree on batch size ({x} vs {y})")]
    LabelMisaligned { x: usize, y: usize },

    #[error("dataset returned no item for index {index} (len {len})")]
    MissingItem { index: usize, len: usize },

    #[error("cannot collate an empty batch")]
    EmptyBatch,

    #[error(transparent)]
    Shape(#[from] TensorShapeError),
}

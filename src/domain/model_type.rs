// ============================================================
// Layer 3 — Model Type and Split
// ============================================================
// Two closed enums that decide which variant of every stage
// runs. MODEL.TYPE is parsed once when the config is loaded;
// after that, the cache writer, the collate function and the
// shard record type are all picked with a single `match`.
//
// Reference: Rust Book §6 (Enums and Pattern Matching)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported model type '{0}' (expected 'classification' or 'captioning')")]
pub struct UnknownModelType(pub String);

// ─── ModelType ────────────────────────────────────────────────────────────────
/// Which head the experiment trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelType {
    /// Multi-label clip classification over cached feature vectors
    Classification,
    /// Caption generation over cached frame stacks
    Captioning,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Classification => "classification",
            ModelType::Captioning     => "captioning",
        }
    }
}

impl FromStr for ModelType {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classification" => Ok(ModelType::Classification),
            "captioning"     => Ok(ModelType::Captioning),
            _ => Err(UnknownModelType(s.to_string())),
        }
    }
}

impl TryFrom<String> for ModelType {
    type Error = UnknownModelType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelType> for String {
    fn from(value: ModelType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Split ────────────────────────────────────────────────────────────────────
/// Dataset partition. Doubles as the shard file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Val];

    pub fn prefix(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val   => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

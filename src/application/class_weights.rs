// ============================================================
// Layer 2 — Class Weights
// ============================================================
// Inverse-frequency weights over the cached training labels:
//
//   positives_k = Σ y[:, k]          over every train_y_* shard
//   freq_k      = positives_k / total
//   w_k         = 1 / (freq_k + 1e-10)
//   w_k         = w_k · total / Σ w
//
// Rare classes get large weights; the result is written next to
// the shards as class_weights.json.

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::shard_dataset::ShardDataset;
use crate::domain::{clip::ClsSample, error::PipelineError, model_type::Split};

pub const CLASS_WEIGHTS_FILE: &str = "class_weights.json";

const FREQ_EPS: f64 = 1e-10;

/// Per-class weights from positive counts over `total` clips.
pub fn weights_from_counts(positives: &[f64], total: usize) -> Vec<f32> {
    let total = total as f64;
    let raw: Vec<f64> = positives
        .iter()
        .map(|&p| 1.0 / (p / total.max(1.0) + FREQ_EPS))
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|w| (w * total / sum) as f32).collect()
}

/// Read every training label shard under `encoding_dir` and derive the weights.
pub fn compute_class_weights(encoding_dir: &Path) -> Result<Vec<f32>> {
    let dataset = ShardDataset::<ClsSample>::new(encoding_dir, Split::Train)?;

    let mut positives: Vec<f64> = Vec::new();
    let mut total = 0usize;
    for index in 0..dataset.len() {
        let sample = dataset
            .load(index)
            .with_context(|| format!("Cannot read label shard {index}"))?;
        let classes = *sample.y.shape().last().ok_or(PipelineError::EmptyBatch)?;
        if positives.is_empty() {
            positives = vec![0.0; classes];
        }
        anyhow::ensure!(
            classes == positives.len(),
            "label shard {index} has {classes} classes, expected {}",
            positives.len()
        );

        for row in sample.y.to_f32_vec().chunks(classes) {
            for (acc, &v) in positives.iter_mut().zip(row) {
                *acc += f64::from(v);
            }
        }
        total += sample.len();
    }

    anyhow::ensure!(total > 0, "no training labels under '{}'", encoding_dir.display());
    tracing::info!("Class weights from {} clips over {} classes", total, positives.len());
    Ok(weights_from_counts(&positives, total))
}

pub fn write_class_weights(encoding_dir: &Path, weights: &[f32]) -> Result<PathBuf> {
    let path = encoding_dir.join(CLASS_WEIGHTS_FILE);
    fs::write(&path, serde_json::to_string_pretty(weights)?)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    tracing::info!("Class weights written to '{}'", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard::ShardStore;
    use crate::domain::tensor::HostTensor;

    #[test]
    fn test_weights_from_counts() {
        // 4 clips: class 0 in all, class 1 in one
        let w = weights_from_counts(&[4.0, 1.0], 4);
        // raw = [1, 4] → scaled by 4 / 5
        assert!((w[0] - 0.8).abs() < 1e-5);
        assert!((w[1] - 3.2).abs() < 1e-5);
        let sum: f32 = w.iter().sum();
        assert!((sum - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_absent_class_gets_dominant_weight() {
        let w = weights_from_counts(&[2.0, 0.0], 2);
        assert!(w[1] > w[0] * 1e6);
    }

    #[test]
    fn test_compute_over_shards() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::create_or_reuse(dir.path()).unwrap();
        let shard = |y: Vec<f32>| {
            let n = y.len() / 2;
            ClsSample::new(
                HostTensor::f32(vec![n, 1], vec![0.0; n]).unwrap(),
                HostTensor::f32(vec![n, 2], y).unwrap(),
            )
            .unwrap()
        };
        store.write(Split::Train, 0, shard(vec![1.0, 0.0, 1.0, 1.0])).unwrap();
        store.write(Split::Train, 1, shard(vec![1.0, 0.0, 1.0, 0.0])).unwrap();

        let w = compute_class_weights(dir.path()).unwrap();
        assert_eq!(w, weights_from_counts(&[4.0, 1.0], 4));

        let path = write_class_weights(dir.path(), &w).unwrap();
        let back: Vec<f32> = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, w);
    }
}

// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:      the epoch number (starts at 0)
//   - lr:         learning rate used for the epoch
//   - train_loss: mean loss over training batches
//   - val_loss:   mean loss over validation batches
//   - val_score:  head-specific score (mAP for classification,
//                 empty for captioning)
//
// Output file: runs/<experiment>/metrics.csv
//
// Example CSV output:
//   epoch,lr,train_loss,val_loss,val_score
//   0,0.001000,0.693100,0.681200,0.084100
//   1,0.001000,0.512400,0.530900,0.102300
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "epoch,lr,train_loss,val_loss,val_score";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:      usize,
    pub lr:         f64,
    pub train_loss: f64,
    pub val_loss:   f64,
    pub val_score:  Option<f64>,
}

impl EpochMetrics {
    pub fn new(epoch: usize, lr: f64, train_loss: f64, val_loss: f64, val_score: Option<f64>) -> Self {
        Self { epoch, lr, train_loss, val_loss, val_score }
    }

    /// Returns true if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

/// Appends epoch rows to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;

        let score = m.val_score.map(|s| format!("{s:.6}")).unwrap_or_default();
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{}",
            m.epoch, m.lr, m.train_loss, m.val_loss, score,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

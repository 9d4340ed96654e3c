// ============================================================
// Layer 4 — Clip Datasets and Dataset Factory
// ============================================================
// Raw clips come from a ClipSource (synthetic or frame folder).
// Two thin views turn a source into a Burn Dataset of the item
// type the selected head needs:
//
//   ClassificationClips → ClsSample   x [1, T, C, H, W], y [1, K]
//   CaptioningClips     → CaptionClip frames [T, C, H, W] + text
//
// `create_clip_sources` picks the source from DATA.DATASET and
// builds the train and val halves.
//
// Reference: Burn Book §4 (Datasets)

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use std::sync::Arc;

use crate::data::{
    frame_folder::{read_annotations, AnnotationRow, FrameFolderClips},
    splitter::split_train_val,
    synthetic::SyntheticClips,
};
use crate::domain::{
    clip::{CaptionClip, ClsSample, RawClip},
    model_type::Split,
    tensor::HostTensor,
};
use crate::infra::{
    config::{DatasetKind, ExperimentConfig},
    seed::{RunSeed, SeedStream},
};

// ─── ClipSource ───────────────────────────────────────────────────────────────
/// Random access to decoded clips.
pub trait ClipSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode clip `index`.
    fn clip(&self, index: usize) -> Result<RawClip>;

    /// Caption of clip `index` without decoding its frames.
    fn caption(&self, index: usize) -> Result<String>;
}

fn fetch(source: &dyn ClipSource, index: usize) -> Option<RawClip> {
    if index >= source.len() {
        return None;
    }
    match source.clip(index) {
        Ok(clip) => Some(clip),
        Err(err) => {
            tracing::error!("Failed to load clip {}: {:#}", index, err);
            None
        }
    }
}

// ─── Views ────────────────────────────────────────────────────────────────────
pub struct ClassificationClips {
    source: Arc<dyn ClipSource>,
}

impl ClassificationClips {
    pub fn new(source: Arc<dyn ClipSource>) -> Self {
        Self { source }
    }

    fn to_sample(clip: RawClip) -> Result<ClsSample> {
        let classes = clip.labels.len();
        let x = clip.frames.unsqueeze_leading();
        let y = HostTensor::f32(vec![1, classes], clip.labels)?;
        Ok(ClsSample::new(x, y)?)
    }
}

impl Dataset<ClsSample> for ClassificationClips {
    fn get(&self, index: usize) -> Option<ClsSample> {
        let clip = fetch(self.source.as_ref(), index)?;
        let id = clip.id.clone();
        match Self::to_sample(clip) {
            Ok(sample) => Some(sample),
            Err(err) => {
                tracing::error!("Clip '{}' cannot be used for classification: {:#}", id, err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.source.len()
    }
}

pub struct CaptioningClips {
    source: Arc<dyn ClipSource>,
}

impl CaptioningClips {
    pub fn new(source: Arc<dyn ClipSource>) -> Self {
        Self { source }
    }
}

impl Dataset<CaptionClip> for CaptioningClips {
    fn get(&self, index: usize) -> Option<CaptionClip> {
        fetch(self.source.as_ref(), index).map(|clip| CaptionClip {
            frames:  clip.frames,
            caption: clip.caption,
        })
    }

    fn len(&self) -> usize {
        self.source.len()
    }
}

// ─── Factory ──────────────────────────────────────────────────────────────────
pub struct ClipSources {
    pub train: Arc<dyn ClipSource>,
    pub val:   Arc<dyn ClipSource>,
}

impl ClipSources {
    pub fn get(&self, split: Split) -> Arc<dyn ClipSource> {
        match split {
            Split::Train => Arc::clone(&self.train),
            Split::Val   => Arc::clone(&self.val),
        }
    }

    /// Every training caption, in clip order.
    pub fn train_captions(&self) -> Result<Vec<String>> {
        (0..self.train.len()).map(|i| self.train.caption(i)).collect()
    }
}

/// Build the train and val clip sources named by DATA.DATASET.
pub fn create_clip_sources(config: &ExperimentConfig, seed: &RunSeed) -> Result<ClipSources> {
    let data = &config.data;
    let num_classes = config.model.num_classes;

    let sources = match data.dataset {
        DatasetKind::Synthetic => {
            let stream = seed.derive(SeedStream::Synthetic);
            let make = |split: Split, len: usize| -> Arc<dyn ClipSource> {
                Arc::new(SyntheticClips::new(
                    split,
                    len,
                    stream,
                    data.num_sampled_frames,
                    data.crop_size,
                    num_classes,
                ))
            };
            ClipSources {
                train: make(Split::Train, data.synthetic.num_train),
                val:   make(Split::Val, data.synthetic.num_val),
            }
        }

        DatasetKind::FrameFolder => {
            let frames_dir = data
                .frames_dir
                .clone()
                .context("DATA.FRAMES_DIR is required for the frame_folder dataset")?;
            let train_csv = data
                .train_annotations
                .as_ref()
                .context("DATA.TRAIN_ANNOTATIONS is required for the frame_folder dataset")?;

            let rows = read_annotations(train_csv)?;
            let (train_rows, val_rows) = match &data.val_annotations {
                Some(val_csv) => (rows, read_annotations(val_csv)?),
                None => {
                    let mut rng = seed.rng(SeedStream::Split);
                    split_train_val(rows, 1.0 - data.val_fraction, &mut rng)
                }
            };

            let make = |rows: Vec<AnnotationRow>| -> Result<Arc<dyn ClipSource>> {
                Ok(Arc::new(FrameFolderClips::new(
                    frames_dir.clone(),
                    rows,
                    data.num_sampled_frames,
                    data.crop_size,
                    num_classes,
                )?))
            };
            ClipSources { train: make(train_rows)?, val: make(val_rows)? }
        }
    };

    tracing::info!(
        "Dataset {:?}: {} train clips, {} val clips",
        data.dataset,
        sources.train.len(),
        sources.val.len()
    );
    Ok(sources)
}

// ============================================================
// Layer 4 — Frame-Folder Clips (Charades layout)
// ============================================================
// Reads clips stored as folders of pre-extracted frames:
//
//   {FRAMES_DIR}/
//     46GP8/  000001.jpg 000002.jpg ...
//     N11GT/  000001.jpg ...
//
// Annotations come from a Charades-style CSV. Only three
// columns are used, any others are ignored:
//
//   id           — folder name under FRAMES_DIR
//   actions      — "c092 11.90 21.20;c147 0.00 12.60"
//                  (class id, start, end; the times are unused)
//   descriptions — free-text caption
//
// From each folder NUM_SAMPLED_FRAMES frames are taken at
// evenly spaced positions and resized to CROP_SIZE × CROP_SIZE.
// Pixel values stay in [0, 255].
//
// Reference: csv crate (serde deserialization), image crate

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::dataset::ClipSource;
use crate::domain::{clip::RawClip, tensor::HostTensor};

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const CHANNELS: usize = 3;

/// One annotation row.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationRow {
    pub id: String,

    #[serde(default)]
    pub actions: String,

    #[serde(default)]
    pub descriptions: String,
}

pub fn read_annotations(path: &Path) -> Result<Vec<AnnotationRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open annotations '{}'", path.display()))?;

    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<AnnotationRow>().enumerate() {
        let row = row.with_context(|| format!("'{}': bad record {}", path.display(), line + 1))?;
        rows.push(row);
    }
    tracing::info!("Read {} annotations from '{}'", rows.len(), path.display());
    Ok(rows)
}

/// Multi-hot vector from an actions field. An empty field means no action.
pub fn parse_actions(actions: &str, num_classes: usize) -> Result<Vec<f32>> {
    let mut labels = vec![0.0f32; num_classes];
    for segment in actions.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let code = segment.split_whitespace().next().unwrap_or_default();
        let class: usize = code
            .strip_prefix('c')
            .and_then(|digits| digits.parse().ok())
            .with_context(|| format!("bad action code '{code}' in '{actions}'"))?;
        if class >= num_classes {
            bail!("action class {class} is outside 0..{num_classes}");
        }
        labels[class] = 1.0;
    }
    Ok(labels)
}

/// Evenly spaced positions: the centre of each of `wanted` equal segments.
pub fn sample_positions(available: usize, wanted: usize) -> Vec<usize> {
    if available == 0 {
        return Vec::new();
    }
    (0..wanted)
        .map(|k| (((2 * k + 1) * available) / (2 * wanted)).min(available - 1))
        .collect()
}

pub struct FrameFolderClips {
    frames_dir:  PathBuf,
    rows:        Vec<AnnotationRow>,
    num_frames:  usize,
    crop_size:   u32,
    num_classes: usize,
}

impl FrameFolderClips {
    pub fn new(
        frames_dir:  PathBuf,
        rows:        Vec<AnnotationRow>,
        num_frames:  usize,
        crop_size:   usize,
        num_classes: usize,
    ) -> Result<Self> {
        anyhow::ensure!(num_frames > 0, "NUM_SAMPLED_FRAMES must be positive");
        let crop_size = u32::try_from(crop_size).context("CROP_SIZE is too large")?;
        anyhow::ensure!(crop_size > 0, "CROP_SIZE must be positive");
        Ok(Self { frames_dir, rows, num_frames, crop_size, num_classes })
    }

    fn frame_files(&self, id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.frames_dir.join(id);
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Cannot list frames of '{id}' in '{}'", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Decode one frame as CHW f32.
    fn load_frame(&self, path: &Path) -> Result<Vec<f32>> {
        let image = image::open(path)
            .with_context(|| format!("Cannot decode frame '{}'", path.display()))?;
        let rgb = image
            .resize_exact(self.crop_size, self.crop_size, FilterType::Triangle)
            .to_rgb8();

        let side = self.crop_size as usize;
        let hwc = rgb.into_raw();
        let mut chw = vec![0.0f32; CHANNELS * side * side];
        for (pixel, rgb) in hwc.chunks_exact(CHANNELS).enumerate() {
            for (c, &value) in rgb.iter().enumerate() {
                chw[c * side * side + pixel] = value as f32;
            }
        }
        Ok(chw)
    }

    fn row(&self, index: usize) -> Result<&AnnotationRow> {
        self.rows
            .get(index)
            .with_context(|| format!("clip {index} out of range ({})", self.rows.len()))
    }
}

impl ClipSource for FrameFolderClips {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn clip(&self, index: usize) -> Result<RawClip> {
        let row = self.row(index)?;
        let files = self.frame_files(&row.id)?;
        if files.is_empty() {
            bail!("no frames for clip '{}' in '{}'", row.id, self.frames_dir.display());
        }

        let side = self.crop_size as usize;
        let mut pixels = Vec::with_capacity(self.num_frames * CHANNELS * side * side);
        for position in sample_positions(files.len(), self.num_frames) {
            pixels.extend(self.load_frame(&files[position])?);
        }

        Ok(RawClip {
            id:      row.id.clone(),
            frames:  HostTensor::f32(vec![self.num_frames, CHANNELS, side, side], pixels)?,
            labels:  parse_actions(&row.actions, self.num_classes)
                .with_context(|| format!("clip '{}'", row.id))?,
            caption: row.descriptions.trim().to_string(),
        })
    }

    fn caption(&self, index: usize) -> Result<String> {
        Ok(self.row(index)?.descriptions.trim().to_string())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        let labels = parse_actions("c092 11.90 21.20;c147 0.00 12.60", 157).unwrap();
        assert_eq!(labels.len(), 157);
        assert_eq!(labels[92], 1.0);
        assert_eq!(labels[147], 1.0);
        assert_eq!(labels.iter().sum::<f32>(), 2.0);

        assert_eq!(parse_actions("", 4).unwrap(), vec![0.0; 4]);
        assert!(parse_actions("c009 0 1", 4).is_err());
        assert!(parse_actions("x01 0 1", 4).is_err());
    }

    #[test]
    fn test_sample_positions_are_spread() {
        assert_eq!(sample_positions(10, 5), vec![1, 3, 5, 7, 9]);
        assert_eq!(sample_positions(3, 6), vec![0, 0, 1, 1, 2, 2]);
        assert!(sample_positions(0, 4).is_empty());
    }

    #[test]
    fn test_reads_csv_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("train.csv");
        fs::write(
            &csv_path,
            "id,subject,actions,descriptions\nVID01,X,c001 0.0 1.0,A person opens a door.\n",
        )
        .unwrap();

        let clip_dir = dir.path().join("frames").join("VID01");
        fs::create_dir_all(&clip_dir).unwrap();
        for i in 0..4u8 {
            let img = image::RgbImage::from_pixel(6, 6, image::Rgb([i * 10, 100, 200]));
            img.save(clip_dir.join(format!("{i:06}.png"))).unwrap();
        }

        let rows = read_annotations(&csv_path).unwrap();
        assert_eq!(rows.len(), 1);
        let source = FrameFolderClips::new(dir.path().join("frames"), rows, 2, 4, 3).unwrap();

        let clip = source.clip(0).unwrap();
        assert_eq!(clip.frames.shape(), &[2, 3, 4, 4]);
        assert_eq!(clip.labels, vec![0.0, 1.0, 0.0]);
        assert_eq!(clip.caption, "A person opens a door.");

        // frames 1 and 3 are sampled → red 10 then 30, blue always 200
        let px = clip.frames.as_f32().unwrap();
        assert_eq!(px[0], 10.0);
        assert_eq!(px[2 * 16], 200.0);
        assert_eq!(px[3 * 16], 30.0);
    }
}

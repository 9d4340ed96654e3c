// ============================================================
// Layer 4 — Synthetic Clips
// ============================================================
// Deterministic generated clips for smoke runs and tests.
//
// Clip i of a split is produced from its own RNG seeded with
// (synthetic stream seed, split, i), so clips can be generated
// lazily, in any order, from any thread, and are the same on
// every run with the same SEED.
//
// Each clip carries:
//   frames  — integer pixel values in [0, 255], [T, 3, S, S]
//   labels  — one to three active classes
//   caption — "a person opens a door in the kitchen"-style text

use anyhow::Result;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::data::dataset::ClipSource;
use crate::domain::{clip::RawClip, model_type::Split, tensor::HostTensor};

const CHANNELS: usize = 3;

const SUBJECTS: [&str; 4] = ["a person", "a man", "a woman", "someone"];
const ACTIONS:  [&str; 6] = ["opens", "closes", "holds", "picks up", "puts down", "looks at"];
const OBJECTS:  [&str; 6] = ["a door", "a book", "a cup", "a laptop", "a towel", "the window"];
const PLACES:   [&str; 4] = ["in the kitchen", "in the bedroom", "in the living room", "in a hallway"];

#[derive(Debug, Clone)]
pub struct SyntheticClips {
    split:       Split,
    len:         usize,
    seed:        u64,
    num_frames:  usize,
    frame_size:  usize,
    num_classes: usize,
}

impl SyntheticClips {
    pub fn new(
        split:       Split,
        len:         usize,
        seed:        u64,
        num_frames:  usize,
        frame_size:  usize,
        num_classes: usize,
    ) -> Self {
        Self { split, len, seed, num_frames, frame_size, num_classes }
    }

    fn rng_for(&self, index: usize) -> StdRng {
        let split_salt = match self.split {
            Split::Train => 0x7472_6169_6e00_0000,
            Split::Val   => 0x7661_6c00_0000_0000,
        };
        StdRng::seed_from_u64(self.seed ^ split_salt ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn caption_with(rng: &mut StdRng) -> String {
        let pick = |rng: &mut StdRng, words: &[&'static str]| -> &'static str {
            words.choose(rng).copied().unwrap_or_default()
        };
        format!(
            "{} {} {} {}",
            pick(rng, &SUBJECTS),
            pick(rng, &ACTIONS),
            pick(rng, &OBJECTS),
            pick(rng, &PLACES),
        )
    }
}

impl ClipSource for SyntheticClips {
    fn len(&self) -> usize {
        self.len
    }

    fn clip(&self, index: usize) -> Result<RawClip> {
        anyhow::ensure!(index < self.len, "synthetic clip {index} out of range ({})", self.len);
        let mut rng = self.rng_for(index);

        let caption = Self::caption_with(&mut rng);

        let mut labels = vec![0.0f32; self.num_classes];
        if self.num_classes > 0 {
            let active = rng.gen_range(1..=3usize.min(self.num_classes));
            for class in rand::seq::index::sample(&mut rng, self.num_classes, active) {
                labels[class] = 1.0;
            }
        }

        let shape = vec![self.num_frames, CHANNELS, self.frame_size, self.frame_size];
        let numel: usize = shape.iter().product();
        let pixels: Vec<f32> = (0..numel).map(|_| rng.gen_range(0u8..=255) as f32).collect();

        Ok(RawClip {
            id:     format!("{}_{index:05}", self.split),
            frames: HostTensor::f32(shape, pixels)?,
            labels,
            caption,
        })
    }

    fn caption(&self, index: usize) -> Result<String> {
        anyhow::ensure!(index < self.len, "synthetic clip {index} out of range ({})", self.len);
        Ok(Self::caption_with(&mut self.rng_for(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clips(split: Split) -> SyntheticClips {
        SyntheticClips::new(split, 5, 17, 2, 4, 10)
    }

    #[test]
    fn test_clips_are_deterministic() {
        let a = clips(Split::Train).clip(3).unwrap();
        let b = clips(Split::Train).clip(3).unwrap();
        assert_eq!(a.frames, b.frames);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.caption, b.caption);
    }

    #[test]
    fn test_splits_differ() {
        let a = clips(Split::Train).clip(0).unwrap();
        let b = clips(Split::Val).clip(0).unwrap();
        assert_ne!(a.frames, b.frames);
    }

    #[test]
    fn test_shapes_and_labels() {
        let clip = clips(Split::Train).clip(1).unwrap();
        assert_eq!(clip.frames.shape(), &[2, 3, 4, 4]);
        let active = clip.labels.iter().filter(|&&v| v == 1.0).count();
        assert!((1..=3).contains(&active));
        let pixels = clip.frames.as_f32().unwrap();
        assert!(pixels.iter().all(|&v| (0.0..=255.0).contains(&v) && v.fract() == 0.0));
    }

    #[test]
    fn test_caption_matches_clip() {
        let source = clips(Split::Val);
        assert_eq!(source.caption(4).unwrap(), source.clip(4).unwrap().caption);
        assert!(source.clip(5).is_err());
    }
}

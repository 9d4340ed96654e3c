// ============================================================
// Layer 5 — Frozen Frame Encoder
// ============================================================
// Maps flattened frames [N, T, F] (F = C·H·W, pixel values in
// [0, 255]) to per-frame features [N, T, D]. Nothing in here is
// trainable; gradients never reach the encoder.
//
//   Identity         frames / 255, D = F
//                    Used by the captioning head, whose cache
//                    already holds raw frame stacks.
//
//   PatchProjection  average-pool each channel into a G × G grid,
//                    project the C·G·G cells with a fixed random
//                    matrix, squash with tanh. D = HIDDEN_SIZE.
//                    Used by the classification cache writer.
//
// The projection matrix is drawn from the Encoder seed stream,
// so the same SEED always produces the same cached features.

use anyhow::{ensure, Result};
use burn::{prelude::*, tensor::TensorData};
use rand::{rngs::StdRng, Rng};

/// Frame layout the encoder expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub channels: usize,
    pub height:   usize,
    pub width:    usize,
}

impl FrameGeometry {
    /// From a host shape ending in [C, H, W].
    pub fn from_shape(shape: &[usize]) -> Option<Self> {
        match shape {
            [.., channels, height, width] => Some(Self {
                channels: *channels,
                height:   *height,
                width:    *width,
            }),
            _ => None,
        }
    }

    pub fn frame_dim(&self) -> usize {
        self.channels * self.height * self.width
    }
}

#[derive(Debug, Clone)]
pub struct PatchProjection {
    geometry: FrameGeometry,
    grid:     usize,
    hidden:   usize,
    /// Row-major [C·G·G, hidden]
    weights:  Vec<f32>,
}

impl PatchProjection {
    pub fn new(geometry: FrameGeometry, grid: usize, hidden: usize, rng: &mut StdRng) -> Result<Self> {
        ensure!(grid > 0 && hidden > 0, "PATCH_GRID and HIDDEN_SIZE must be positive");
        ensure!(
            geometry.height % grid == 0 && geometry.width % grid == 0,
            "frame size {}x{} is not divisible by PATCH_GRID {}",
            geometry.height,
            geometry.width,
            grid
        );

        let fan_in = geometry.channels * grid * grid;
        let bound = (3.0 / fan_in as f32).sqrt();
        let weights = (0..fan_in * hidden).map(|_| rng.gen_range(-bound..=bound)).collect();
        Ok(Self { geometry, grid, hidden, weights })
    }

    fn fan_in(&self) -> usize {
        self.geometry.channels * self.grid * self.grid
    }

    fn forward<B: Backend>(&self, frames: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n, t, _] = frames.dims();
        let FrameGeometry { channels, height, width } = self.geometry;
        let g = self.grid;

        // [N·T, C, G, H/G, G, W/G] → mean over each cell
        let pooled = frames
            .div_scalar(255.0)
            .reshape([n * t, channels, g, height / g, g, width / g])
            .mean_dim(5)
            .mean_dim(3)
            .reshape([n * t, self.fan_in()]);

        let weights = Tensor::<B, 2>::from_data(
            TensorData::new(self.weights.clone(), [self.fan_in(), self.hidden]),
            &pooled.device(),
        );
        pooled.matmul(weights).tanh().reshape([n, t, self.hidden])
    }
}

#[derive(Debug, Clone)]
pub enum FrameEncoder {
    Identity,
    PatchProjection(PatchProjection),
}

impl FrameEncoder {
    /// Feature size produced for frames of `frame_dim` values.
    pub fn output_dim(&self, frame_dim: usize) -> usize {
        match self {
            FrameEncoder::Identity => frame_dim,
            FrameEncoder::PatchProjection(p) => p.hidden,
        }
    }

    /// [N, T, F] → [N, T, D]
    pub fn encode_frames<B: Backend>(&self, frames: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            FrameEncoder::Identity => frames.div_scalar(255.0),
            FrameEncoder::PatchProjection(p) => p.forward(frames),
        }
    }

    /// [N, T, C, H, W] → one time-averaged vector per clip, [N, D]
    pub fn encode_clips<B: Backend>(&self, clips: Tensor<B, 5>) -> Tensor<B, 2> {
        let [n, t, c, h, w] = clips.dims();
        let features = self.encode_frames(clips.reshape([n, t, c * h * w]));
        let [_, _, d] = features.dims();
        features.mean_dim(1).reshape([n, d])
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};
    use rand::SeedableRng;

    type B = NdArray;

    fn geometry() -> FrameGeometry {
        FrameGeometry { channels: 3, height: 4, width: 4 }
    }

    fn clips(values: Vec<f32>) -> Tensor<B, 5> {
        Tensor::from_data(TensorData::new(values, [2, 2, 3, 4, 4]), &NdArrayDevice::Cpu)
    }

    #[test]
    fn test_identity_scales_pixels() {
        let out = FrameEncoder::Identity.encode_clips(clips(vec![255.0; 192]));
        assert_eq!(out.dims(), [2, 48]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_patch_projection_shape_and_determinism() {
        let make = || {
            let mut rng = StdRng::seed_from_u64(3);
            FrameEncoder::PatchProjection(PatchProjection::new(geometry(), 2, 8, &mut rng).unwrap())
        };
        let input: Vec<f32> = (0..192).map(|i| (i % 256) as f32).collect();

        let a = make().encode_clips(clips(input.clone()));
        let b = make().encode_clips(clips(input));
        assert_eq!(a.dims(), [2, 8]);
        assert_eq!(make().output_dim(48), 8);
        assert_eq!(
            a.into_data().to_vec::<f32>().unwrap(),
            b.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_patch_projection_rejects_bad_grid() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(PatchProjection::new(geometry(), 3, 8, &mut rng).is_err());
    }

    #[test]
    fn test_geometry_from_shape() {
        let g = FrameGeometry::from_shape(&[5, 8, 3, 4, 4]).unwrap();
        assert_eq!(g, geometry());
        assert_eq!(g.frame_dim(), 48);
        assert!(FrameGeometry::from_shape(&[4, 4]).is_none());
    }
}

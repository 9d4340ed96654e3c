// ============================================================
// Layer 5 — Backend Selection
// ============================================================
// TRAIN.ACCELERATOR picks the backend once per command:
//
//   cpu → Autodiff<NdArray>
//   gpu → Autodiff<Wgpu>
//
// Work that must run on "whichever backend was chosen" is written
// as a BackendJob, generic over the autodiff backend. Jobs that
// only run inference use B::InnerBackend on the same device.

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};

use crate::infra::config::{Accelerator, TrainSettings};

pub type CpuBackend = Autodiff<NdArray>;
pub type GpuBackend = Autodiff<Wgpu>;

pub trait BackendJob {
    type Output;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<Self::Output>;
}

pub fn dispatch<J: BackendJob>(accelerator: Accelerator, job: J) -> Result<J::Output> {
    match accelerator {
        Accelerator::Cpu => {
            tracing::info!("Using NdArray CPU backend");
            job.run::<CpuBackend>(NdArrayDevice::Cpu)
        }
        Accelerator::Gpu => {
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            job.run::<GpuBackend>(device)
        }
    }
}

/// Report TRAIN settings this build cannot honour.
pub fn warn_unsupported(settings: &TrainSettings) {
    if settings.precision.trim() != "32" {
        tracing::warn!(
            "PRECISION '{}' is not supported, training in 32-bit float",
            settings.precision
        );
    }
    if settings.devices > 1 {
        tracing::warn!("DEVICES = {} requested, training on a single device", settings.devices);
    }
}

//! Backend and device selection.
//!
//! `tch` takes precedence when both backend features are enabled.

use burn::backend::Autodiff;
use burn::prelude::Backend;
use tracing::info;

#[cfg(feature = "tch")]
pub type MyBackend = burn::backend::LibTorch<f32, i8>;
#[cfg(all(feature = "ndarray", not(feature = "tch")))]
pub type MyBackend = burn::backend::NdArray<f32>;

pub type MyAutodiffBackend = Autodiff<MyBackend>;

pub type Device = <MyBackend as Backend>::Device;

/// Accelerators libtorch can see: every CUDA device, then MPS on Apple silicon.
#[cfg(feature = "tch")]
pub fn accelerators() -> Vec<Device> {
    use burn::backend::libtorch::LibTorchDevice;

    let mut devices = (0..tch::Cuda::device_count())
        .map(|i| LibTorchDevice::Cuda(i as usize))
        .collect::<Vec<_>>();
    if tch::utils::has_mps() {
        devices.push(LibTorchDevice::Mps);
    }
    devices
}

#[cfg(all(feature = "ndarray", not(feature = "tch")))]
pub fn accelerators() -> Vec<Device> {
    vec![]
}

#[cfg(feature = "tch")]
fn cpu() -> Device {
    burn::backend::libtorch::LibTorchDevice::Cpu
}

#[cfg(all(feature = "ndarray", not(feature = "tch")))]
fn cpu() -> Device {
    burn::backend::ndarray::NdArrayDevice::Cpu
}

/// Picks the first accelerator, falling back to the CPU.
pub fn select_device() -> Device {
    match accelerators().into_iter().next() {
        Some(device) => {
            info!(?device, "Using GPU");
            device
        }
        None => {
            info!("Less than 1 GPUs available. Using CPU.");
            cpu()
        }
    }
}

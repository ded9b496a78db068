//! Centralized device initialization for quaternion network training
//!
//! GPU training runs on the WGPU backend; the CPU `NdArray` backend is used
//! for small runs and by the test suite.

use burn::backend::{Autodiff, NdArray, Wgpu, ndarray::NdArrayDevice, wgpu::WgpuDevice};
use std::sync::OnceLock;

/// Global device instance to avoid conflicts
static DEVICE: OnceLock<WgpuDevice> = OnceLock::new();

/// Initialize the WGPU device once and hand out clones of it.
///
/// Creating several WGPU clients for the same adapter fails with
/// "Client already created", so every caller shares one instance.
///
/// # Example
/// ```rust,no_run
/// use qnet_rust::device::init_device;
///
/// let device = init_device();
/// ```
pub fn init_device() -> WgpuDevice {
    DEVICE
        .get_or_init(|| {
            log::info!("initializing WGPU device");
            let device = WgpuDevice::default();
            log::info!("WGPU device ready: {device:?}");
            device
        })
        .clone()
}

/// CPU device used for tests and small experiments.
pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Type alias for the Wgpu backend used throughout the project
pub type Backend = Wgpu<f32, i32>;

/// Type alias for autodiff backend used in training
pub type AutodiffBackend = Autodiff<Backend>;

/// CPU backend
pub type CpuBackend = NdArray<f32>;

/// CPU backend with gradient tracking
pub type CpuAutodiffBackend = Autodiff<CpuBackend>;

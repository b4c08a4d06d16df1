//! Compile-time backend choice of the RetinaFace tools.
//!
//! `cuda` wins over `wgpu`; without either the tools build targets on the NdArray CPU
//! backend.

use burn::tensor::backend::Backend;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Backend the tools build targets and losses on.
        pub type SelectedBackend = burn::backend::Cuda;
        const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        /// Backend the tools build targets and losses on.
        pub type SelectedBackend = burn::backend::Wgpu;
        const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        /// Backend the tools build targets and losses on.
        pub type SelectedBackend = burn::backend::NdArray;
        const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

pub type SelectedDevice = <SelectedBackend as Backend>::Device;

/// Default device of [`SelectedBackend`], logged once it is picked.
pub fn create_device() -> SelectedDevice {
    let device = SelectedDevice::default();
    tracing::info!(backend = BACKEND_NAME, ?device, "device selected");
    device
}

pub const fn get_backend_name() -> &'static str {
    BACKEND_NAME
}

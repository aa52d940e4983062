pub use burn::{
    backend::wgpu::WgpuDevice,
    tensor::backend::Backend,
};

/// The compute backend used by the production rasterizer.
pub type Wgpu = burn::backend::Wgpu;

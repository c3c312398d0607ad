//! Vulkan abstraction layer for the Emberlight demo framework.
//!
//! This crate provides:
//! - Device bootstrap: instance, surface, queue and command pool
//! - Owning handle wrappers with deterministic teardown
//! - Buffer and image resources with staging upload
//! - Render pass, descriptor and pipeline builders
//! - Swapchain handling with pre-recorded per-image command buffers

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod handle;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod renderpass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::Buffer;
pub use capabilities::{DeviceCapabilities, GpuVendor};
pub use descriptors::{DescriptorPool, DescriptorSetLayoutBuilder, DescriptorSetUpdater};
pub use device::{Device, DeviceBuilder};
pub use error::{GpuError, Result};
pub use handle::OwningHandle;
pub use image::{Image, TextureData, TextureRegion};
pub use pipeline::{Pipeline, PipelineConfig};
pub use renderpass::{RenderPass, RenderPassConfig};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{SwapStep, Swapchain};

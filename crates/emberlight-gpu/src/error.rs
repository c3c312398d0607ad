//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every failure in this layer is either a misconfigured environment or a
/// programming error; there is no recovery path. Errors propagate out of
/// constructors and are expected to terminate the demo.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No Vulkan-capable device found.
    #[error("No Vulkan-capable device found")]
    NoSuitableDevice,

    /// No queue family supports both graphics and present.
    #[error("No queue family supports both graphics and present")]
    NoSuitableQueueFamily,

    /// No supported format for the requested use.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Descriptor pool has no capacity left for the requested set.
    #[error("Descriptor pool exhausted: {0}")]
    DescriptorPoolExhausted(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
///
/// Everything here is fatal for the frame loop. Surface staleness
/// (`OUT_OF_DATE` / `SUBOPTIMAL`) is not an error and is reported through
/// [`SurfaceStatus`](crate::backend::SurfaceStatus) instead.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// An image index from a swapchain generation that has since been rebuilt
    #[error("Swapchain image {index} belongs to generation {image_generation}, current is {current_generation}")]
    StaleSwapchainImage {
        index: u32,
        image_generation: u64,
        current_generation: u64,
    },

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A command buffer ran out of room for retained resources
    #[error("Command buffer retained-resource capacity of {capacity} exceeded")]
    RetainedCapacityExceeded { capacity: usize },

    /// A command buffer was begun or reset while its last submission may still execute
    #[error("Command buffer is still in flight on the GPU")]
    CommandBufferInFlight,

    /// An operation was issued in the wrong command buffer or frame state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

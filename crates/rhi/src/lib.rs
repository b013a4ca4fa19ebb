//! Render hardware interface.
//!
//! This crate owns every GPU-backed object and the rules that keep them
//! alive while the GPU may still use them:
//! - [`DeviceBackend`] is the seam to the GPU. [`device::Device`] implements
//!   it on Vulkan through `ash`; `mock::MockBackend` implements it in
//!   process for tests (feature `mock`).
//! - [`Shared`] is the reference-counted handle every resource is handed
//!   out as. Destruction happens on the last release and cascades to
//!   child resources.
//! - [`command::CommandBuffer`] retains the resources its commands touch
//!   until it is reset after its fence signals.
//! - [`swapchain::Swapchain`] implements acquire/present and in-place
//!   rebuilds.
//! - [`transfer::TransferContext`] performs one-shot uploads.

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod resource;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{BackendRef, DeviceBackend, SurfaceStatus};
pub use error::{RhiError, RhiResult};
pub use resource::{Resource, ResourceKind, Shared};

// Re-export ash types that users might need
pub use ash::vk;

//! Synchronization primitives.
//!
//! This module provides wrappers for backend synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signal the host can wait on
//!
//! # Overview
//!
//! - **Semaphores** order acquire, render and present on the GPU without
//!   involving the CPU.
//!
//! - **Fences** tell the CPU that a submission has finished executing. A
//!   frame slot's fence is the only thing the frame loop ever blocks on.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::sync::{Fence, Semaphore};
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(backend.clone())?;
//!
//! // Created signaled so the first wait returns immediately.
//! let in_flight = Fence::new(backend, true)?;
//! in_flight.wait_forever()?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::backend::BackendRef;
use crate::error::RhiResult;

/// Semaphore wrapper.
///
/// Used for the image-available and render-finished signals of a frame
/// slot. Created unsignaled.
pub struct Semaphore {
    backend: BackendRef,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(backend: BackendRef) -> RhiResult<Self> {
        let semaphore = backend.create_semaphore()?;
        Ok(Self { backend, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.semaphore);
        debug!("Destroyed semaphore");
    }
}

/// Fence wrapper.
///
/// Fences let the host wait for a submission to finish. Common uses:
/// - Frame-in-flight fence: wait before reusing a frame slot
/// - Transfer fence: wait for a one-shot upload to complete
pub struct Fence {
    backend: BackendRef,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `backend` - The device backend
    /// * `signaled` - If true, the fence starts signaled. Frame fences are
    ///   created signaled so the first wait on each slot does not block.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(backend: BackendRef, signaled: bool) -> RhiResult<Self> {
        let fence = backend.create_fence(signaled)?;
        Ok(Self { backend, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence to become signaled.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Timeout in nanoseconds
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or device loss.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.backend.wait_fence(self.fence, timeout)
    }

    /// Waits with no timeout. A GPU that never signals is treated as fatal
    /// by the backend, not here.
    pub fn wait_forever(&self) -> RhiResult<()> {
        self.wait(u64::MAX)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// Must only be called once the fence is signaled and right before
    /// it is handed to a new submission.
    pub fn reset(&self) -> RhiResult<()> {
        self.backend.reset_fence(self.fence)
    }

    /// Non-blocking status check.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.backend.fence_signaled(self.fence)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.fence);
        debug!("Destroyed fence");
    }
}

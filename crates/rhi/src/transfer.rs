//! One-shot uploads to device-local memory.
//!
//! [`TransferContext`] copies CPU data into device-local buffers and
//! sampled textures through a staging buffer. Every upload records, submits
//! without semaphores and waits on its fence before returning, so it
//! belongs at load time, outside the frame loop.
//!
//! Staging buffers are retained by the upload's command buffer and
//! destroyed by the reset that follows the fence wait.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::buffer::BufferUsage;
//! use strand_rhi::command::RetainPolicy;
//! use strand_rhi::transfer::TransferContext;
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let mut transfer = TransferContext::new(backend, RetainPolicy::default())?;
//! let positions: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
//! let vertices = transfer.upload_buffer(bytemuck::cast_slice(&positions), BufferUsage::Vertex)?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, warn};

use crate::backend::BackendRef;
use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool, RetainPolicy};
use crate::error::{RhiError, RhiResult};
use crate::image::Texture;
use crate::resource::Shared;
use crate::sync::Fence;

/// Synchronous upload helper.
pub struct TransferContext {
    backend: BackendRef,
    command_buffer: CommandBuffer,
    fence: Fence,
}

impl TransferContext {
    /// Creates a transient command pool, a command buffer and a fence.
    pub fn new(backend: BackendRef, policy: RetainPolicy) -> RhiResult<Self> {
        let pool = CommandPool::new_transient(backend.clone())?;
        let command_buffer = CommandBuffer::new(&pool, policy)?;
        let fence = Fence::new(backend.clone(), false)?;
        Ok(Self {
            backend,
            command_buffer,
            fence,
        })
    }

    /// Copies `data` into a new device-local buffer.
    ///
    /// # Errors
    ///
    /// Returns an error for empty data, on allocation failure or if the
    /// submission fails.
    pub fn upload_buffer(&mut self, data: &[u8], usage: BufferUsage) -> RhiResult<Shared<Buffer>> {
        if data.is_empty() {
            return Err(RhiError::InvalidState(format!(
                "empty {} buffer upload",
                usage.name()
            )));
        }
        let size = data.len() as vk::DeviceSize;

        if usage.is_host_visible() {
            // No staging needed.
            return Buffer::with_data(self.backend.clone(), usage, data);
        }

        let staging = Buffer::with_data(self.backend.clone(), BufferUsage::Staging, data)?;
        let buffer = Buffer::new(self.backend.clone(), size, usage)?;

        self.submit_and_wait(|cmd| cmd.copy_buffer(&staging, &buffer, size))?;

        debug!("Uploaded {} bytes to {} buffer", size, usage.name());
        Ok(buffer)
    }

    /// Copies tightly packed RGBA8 pixels into a new sampled texture.
    ///
    /// The texture ends up in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// # Arguments
    ///
    /// * `rgba` - Pixel data, 4 bytes per pixel, row-major
    /// * `extent` - Texture size in pixels
    /// * `format` - A 4-byte-per-pixel color format, typically `R8G8B8A8_SRGB`
    ///
    /// # Errors
    ///
    /// Returns an error if `rgba` does not match `extent` or an upload step fails.
    pub fn upload_image(
        &mut self,
        rgba: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Shared<Texture>> {
        let expected = extent.width as usize * extent.height as usize * 4;
        if rgba.len() != expected {
            return Err(RhiError::InvalidState(format!(
                "{}x{} texture needs {} bytes, got {}",
                extent.width,
                extent.height,
                expected,
                rgba.len()
            )));
        }

        let staging = Buffer::with_data(self.backend.clone(), BufferUsage::Staging, rgba)?;
        let texture = Texture::new(
            self.backend.clone(),
            "texture",
            extent,
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;

        let image = texture.image();
        self.submit_and_wait(|cmd| {
            cmd.transition_image(
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            cmd.copy_buffer_to_image(&staging, image)?;
            cmd.transition_image(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        debug!(
            "Uploaded {}x{} texture ({:?})",
            extent.width, extent.height, format
        );
        Ok(texture)
    }

    /// Records with `record`, submits, waits and resets.
    fn submit_and_wait<F>(&mut self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&mut CommandBuffer) -> RhiResult<()>,
    {
        self.command_buffer.begin()?;
        if let Err(e) = record(&mut self.command_buffer) {
            self.abandon();
            return Err(e);
        }
        self.command_buffer.end()?;

        self.fence.reset()?;
        self.command_buffer.submit(&self.fence)?;
        self.fence.wait_forever()?;
        self.command_buffer.reset()
    }

    /// Drops a half-recorded upload and whatever it retained.
    fn abandon(&mut self) {
        let result = self
            .command_buffer
            .end()
            .and_then(|()| self.command_buffer.reset());
        if let Err(e) = result {
            warn!("Failed to discard upload recording: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_upload_buffer_frees_staging() {
        let mock = MockBackend::new();
        let mut transfer = TransferContext::new(mock.backend(), RetainPolicy::default()).unwrap();

        let buffer = transfer
            .upload_buffer(&[1, 2, 3, 4, 5, 6, 7, 8], BufferUsage::Vertex)
            .unwrap();

        assert_eq!(buffer.size(), 8);
        assert_eq!(buffer.ref_count(), 1);
        // Only the destination survives the upload.
        assert_eq!(mock.live(ObjectKind::Buffer), 1);
        assert_eq!(mock.created(ObjectKind::Buffer), 2);
        assert_eq!(mock.stats().submits, 1);
        assert_eq!(mock.stats().blocking_fence_waits, 1);
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_host_visible_upload_skips_staging() {
        let mock = MockBackend::new();
        let mut transfer = TransferContext::new(mock.backend(), RetainPolicy::default()).unwrap();

        let buffer = transfer
            .upload_buffer(&[9, 9, 9, 9], BufferUsage::Uniform)
            .unwrap();

        assert_eq!(mock.stats().submits, 0);
        assert_eq!(mock.buffer_contents(buffer.handle()), Some(vec![9, 9, 9, 9]));
    }

    #[test]
    fn test_repeated_uploads_reuse_fence() {
        let mock = MockBackend::new();
        let mut transfer = TransferContext::new(mock.backend(), RetainPolicy::default()).unwrap();

        for _ in 0..3 {
            transfer.upload_buffer(&[0; 16], BufferUsage::Index).unwrap();
        }
        assert_eq!(mock.stats().submits, 3);
        assert_eq!(mock.live(ObjectKind::Fence), 1);
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_upload_image_records_transitions() {
        let mock = MockBackend::new();
        let mut transfer = TransferContext::new(mock.backend(), RetainPolicy::default()).unwrap();
        let extent = vk::Extent2D {
            width: 2,
            height: 2,
        };

        let texture = transfer
            .upload_image(&[255; 16], extent, vk::Format::R8G8B8A8_SRGB)
            .unwrap();

        assert_eq!(texture.extent(), extent);
        // barrier, copy, barrier
        assert_eq!(mock.stats().commands_recorded, 3);
        assert_eq!(mock.live(ObjectKind::Buffer), 0);
        assert_eq!(mock.live(ObjectKind::Image), 1);
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_upload_image_size_mismatch() {
        let mock = MockBackend::new();
        let mut transfer = TransferContext::new(mock.backend(), RetainPolicy::default()).unwrap();
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };

        let result = transfer.upload_image(&[0; 16], extent, vk::Format::R8G8B8A8_UNORM);
        assert!(result.is_err());
        assert_eq!(mock.stats().submits, 0);
    }

    #[test]
    fn test_empty_upload_rejected() {
        let mock = MockBackend::new();
        let mut transfer = TransferContext::new(mock.backend(), RetainPolicy::default()).unwrap();
        assert!(transfer.upload_buffer(&[], BufferUsage::Vertex).is_err());
    }
}

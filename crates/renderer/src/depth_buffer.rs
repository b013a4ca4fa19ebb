//! Depth buffer management.
//!
//! The depth buffer is a device-local texture sized to the swapchain. It is
//! one of the objects a swapchain rebuild recreates, since its extent
//! follows the surface.
//!
//! # Example
//!
//! ```no_run
//! use strand_renderer::depth_buffer::DepthBuffer;
//! use strand_rhi::{BackendRef, vk};
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let depth = DepthBuffer::new(backend, vk::Extent2D { width: 1920, height: 1080 })?;
//! assert_eq!(depth.format(), vk::Format::D32_SFLOAT);
//! # Ok(())
//! # }
//! ```

use tracing::debug;

use strand_rhi::image::{ImageView, Texture};
use strand_rhi::{BackendRef, RhiError, RhiResult, Shared, vk};

/// Default depth buffer format (32-bit floating point).
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Depth attachment for one swapchain generation.
///
/// Dropping it releases the texture; framebuffers built on it keep the
/// view alive until they are released too.
pub struct DepthBuffer {
    texture: Shared<Texture>,
}

impl DepthBuffer {
    /// Creates a [`DEFAULT_DEPTH_FORMAT`] depth buffer.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-sized extent or if allocation fails.
    pub fn new(backend: BackendRef, extent: vk::Extent2D) -> RhiResult<Self> {
        Self::with_format(backend, extent, DEFAULT_DEPTH_FORMAT)
    }

    /// Creates a depth buffer in `format`, which must be a depth format.
    pub fn with_format(
        backend: BackendRef,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        if !is_depth_format(format) {
            return Err(RhiError::InvalidState(format!(
                "{:?} is not a depth format",
                format
            )));
        }
        let texture = Texture::new(
            backend,
            "depth_buffer",
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        debug!(
            "Created depth buffer {}x{} ({:?})",
            extent.width, extent.height, format
        );
        Ok(Self { texture })
    }

    #[inline]
    pub fn view(&self) -> &Shared<ImageView> {
        self.texture.view()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.texture.format()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.texture.extent()
    }
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

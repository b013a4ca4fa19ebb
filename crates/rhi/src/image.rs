//! Images, image views and textures.
//!
//! # Overview
//!
//! - [`Image`] is either allocated by us or owned by a swapchain
//!   ([`ImageOrigin`]). Swapchain images are never destroyed individually;
//!   they keep their swapchain alive instead.
//! - [`ImageView`] holds the image it views.
//! - [`Texture`] bundles an image with a view of its whole extent.
//!
//! Destroying a texture therefore destroys the view first, then the image,
//! and for presentable images finally lets go of the swapchain.

use ash::vk;
use tracing::debug;

use crate::backend::{BackendRef, ImageDesc, ImageTransition, ImageViewDesc};
use crate::error::{RhiError, RhiResult};
use crate::resource::{Resource, ResourceKind, Shared};
use crate::swapchain::SwapchainHandle;

/// Who owns an image's memory.
pub enum ImageOrigin {
    /// Created and bound by the backend on our behalf.
    Allocated,
    /// Presentable image owned by a swapchain.
    Swapchain(Shared<SwapchainHandle>),
}

/// Image resource.
pub struct Image {
    backend: BackendRef,
    image: vk::Image,
    extent: vk::Extent2D,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    origin: ImageOrigin,
}

impl Image {
    /// Creates a device-local 2D image.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-sized extent or if creation fails.
    pub fn new(
        backend: BackendRef,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> RhiResult<Shared<Self>> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidState(format!(
                "image '{}' has zero extent {}x{}",
                name, extent.width, extent.height
            )));
        }
        let image = backend.create_image(&ImageDesc {
            name,
            extent,
            format,
            usage,
        })?;
        debug!(
            "Created image '{}': {}x{} {:?}",
            name, extent.width, extent.height, format
        );
        Ok(Shared::new(Self {
            backend,
            image,
            extent,
            format,
            aspect: aspect_for(format),
            origin: ImageOrigin::Allocated,
        }))
    }

    /// Wraps a presentable image owned by `swapchain`.
    pub fn from_swapchain(
        backend: BackendRef,
        swapchain: &Shared<SwapchainHandle>,
        image: vk::Image,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Shared<Self> {
        Shared::new(Self {
            backend,
            image,
            extent,
            format,
            aspect: vk::ImageAspectFlags::COLOR,
            origin: ImageOrigin::Swapchain(swapchain.acquire()),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn is_presentable(&self) -> bool {
        matches!(self.origin, ImageOrigin::Swapchain(_))
    }

    pub fn backend(&self) -> &BackendRef {
        &self.backend
    }
}

impl Resource for Image {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        match self.origin {
            ImageOrigin::Allocated => {
                self.backend.destroy_image(self.image);
                debug!("Destroyed image {:?}", self.format);
            }
            // The swapchain reference is released with this field.
            ImageOrigin::Swapchain(_) => {}
        }
    }
}

/// Image view resource. Keeps its image alive.
pub struct ImageView {
    backend: BackendRef,
    view: vk::ImageView,
    image: Shared<Image>,
}

impl ImageView {
    /// Creates a view of the whole image.
    pub fn new(image: &Shared<Image>) -> RhiResult<Shared<Self>> {
        let backend = image.backend().clone();
        let view = backend.create_image_view(&ImageViewDesc {
            image: image.handle(),
            format: image.format(),
            aspect: image.aspect(),
        })?;
        Ok(Shared::new(Self {
            backend,
            view,
            image: image.acquire(),
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> &Shared<Image> {
        &self.image
    }
}

impl Resource for ImageView {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ImageView
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.backend.destroy_image_view(self.view);
        debug!("Destroyed image view");
    }
}

/// An image plus a view of it.
pub struct Texture {
    image: Shared<Image>,
    view: Shared<ImageView>,
}

impl Texture {
    /// Creates an image and a view of it.
    pub fn new(
        backend: BackendRef,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> RhiResult<Shared<Self>> {
        let image = Image::new(backend, name, extent, format, usage)?;
        Self::from_image(image)
    }

    /// Takes over `image` and creates a view of it.
    pub fn from_image(image: Shared<Image>) -> RhiResult<Shared<Self>> {
        let view = ImageView::new(&image)?;
        Ok(Shared::new(Self { image, view }))
    }

    pub fn image(&self) -> &Shared<Image> {
        &self.image
    }

    pub fn view(&self) -> &Shared<ImageView> {
        &self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }
}

impl Resource for Texture {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Texture
    }
}

/// Aspect flags implied by a format.
pub fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT
        | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Barrier parameters for the layout transitions the engine performs.
///
/// # Errors
///
/// Returns [`RhiError::InvalidState`] for transitions with no known
/// stage and access masks.
pub fn layout_transition(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<ImageTransition> {
    let (src_stage, src_access, dst_stage, dst_access) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (old, new) => {
            return Err(RhiError::InvalidState(format!(
                "unsupported layout transition {:?} -> {:?}",
                old, new
            )));
        }
    };

    Ok(ImageTransition {
        image,
        aspect,
        old_layout,
        new_layout,
        src_stage,
        dst_stage,
        src_access,
        dst_access,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, ObjectKind};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(
            aspect_for(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for(vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_zero_extent_rejected() {
        let mock = MockBackend::new();
        let result = Image::new(
            mock.backend(),
            "empty",
            extent(0, 16),
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_texture_destroys_view_and_image() {
        let mock = MockBackend::new();
        let texture = Texture::new(
            mock.backend(),
            "albedo",
            extent(4, 4),
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .unwrap();
        assert_eq!(texture.extent(), extent(4, 4));
        assert_eq!(mock.live(ObjectKind::Image), 1);
        assert_eq!(mock.live(ObjectKind::ImageView), 1);

        let image = texture.image().acquire();
        texture.release();
        // The view went with the texture; the image has another holder.
        assert_eq!(mock.live(ObjectKind::ImageView), 0);
        assert_eq!(mock.live(ObjectKind::Image), 1);
        image.release();
        assert_eq!(mock.live(ObjectKind::Image), 0);
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_known_transitions() {
        let image = vk::Image::null();
        let upload = layout_transition(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let sample = layout_transition(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unknown_transition_rejected() {
        let result = layout_transition(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::GENERAL,
        );
        assert!(result.is_err());
    }
}

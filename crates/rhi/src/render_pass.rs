//! Render passes and framebuffers.
//!
//! Both depend on swapchain format and extent, so the render target
//! rebuilds them whenever the swapchain is rebuilt. A framebuffer holds
//! its render pass and attachment views, which keeps a retired swapchain
//! alive until every framebuffer built on its images has been released.

use ash::vk;
use tracing::debug;

use crate::backend::{BackendRef, FramebufferDesc, RenderPassDesc};
use crate::error::{RhiError, RhiResult};
use crate::image::ImageView;
use crate::resource::{Resource, ResourceKind, Shared};

/// Render pass resource.
pub struct RenderPass {
    backend: BackendRef,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(backend: BackendRef, desc: RenderPassDesc) -> RhiResult<Shared<Self>> {
        let render_pass = backend.create_render_pass(&desc)?;
        debug!(
            "Created render pass: color {:?}, depth {:?}",
            desc.color_format, desc.depth_format
        );
        Ok(Shared::new(Self {
            backend,
            render_pass,
            desc,
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    /// Number of attachments a compatible framebuffer needs.
    pub fn attachment_count(&self) -> usize {
        1 + usize::from(self.desc.depth_format.is_some())
    }

    pub fn backend(&self) -> &BackendRef {
        &self.backend
    }
}

impl Resource for RenderPass {
    fn kind(&self) -> ResourceKind {
        ResourceKind::RenderPass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.backend.destroy_render_pass(self.render_pass);
        debug!("Destroyed render pass");
    }
}

/// Framebuffer resource.
pub struct Framebuffer {
    backend: BackendRef,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    render_pass: Shared<RenderPass>,
    attachments: Vec<Shared<ImageView>>,
}

impl Framebuffer {
    /// Creates a framebuffer for `render_pass` over `attachments`, in
    /// attachment order (colour first, then depth).
    ///
    /// # Errors
    ///
    /// Returns an error if the attachment count does not match the render pass.
    pub fn new(
        render_pass: &Shared<RenderPass>,
        attachments: &[&Shared<ImageView>],
        extent: vk::Extent2D,
    ) -> RhiResult<Shared<Self>> {
        if attachments.len() != render_pass.attachment_count() {
            return Err(RhiError::InvalidState(format!(
                "render pass expects {} attachments, got {}",
                render_pass.attachment_count(),
                attachments.len()
            )));
        }
        let backend = render_pass.backend().clone();
        let views: Vec<vk::ImageView> = attachments.iter().map(|view| view.handle()).collect();
        let framebuffer = backend.create_framebuffer(&FramebufferDesc {
            render_pass: render_pass.handle(),
            attachments: &views,
            extent,
        })?;
        Ok(Shared::new(Self {
            backend,
            framebuffer,
            extent,
            render_pass: render_pass.acquire(),
            attachments: attachments.iter().map(|view| view.acquire()).collect(),
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn render_pass(&self) -> &Shared<RenderPass> {
        &self.render_pass
    }

    pub fn attachments(&self) -> &[Shared<ImageView>] {
        &self.attachments
    }
}

impl Resource for Framebuffer {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.backend.destroy_framebuffer(self.framebuffer);
        debug!(
            "Destroyed framebuffer {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Texture;
    use crate::mock::{MockBackend, ObjectKind};

    fn color_pass(mock: &std::sync::Arc<MockBackend>) -> Shared<RenderPass> {
        RenderPass::new(
            mock.backend(),
            RenderPassDesc {
                color_format: vk::Format::B8G8R8A8_SRGB,
                depth_format: None,
                color_final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            },
        )
        .unwrap()
    }

    fn target(mock: &std::sync::Arc<MockBackend>) -> Shared<Texture> {
        Texture::new(
            mock.backend(),
            "color",
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            vk::Format::B8G8R8A8_SRGB,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
        .unwrap()
    }

    #[test]
    fn test_attachment_count_checked() {
        let mock = MockBackend::new();
        let pass = color_pass(&mock);
        let a = target(&mock);
        let b = target(&mock);
        let result = Framebuffer::new(&pass, &[a.view(), b.view()], a.extent());
        assert!(result.is_err());
    }

    #[test]
    fn test_framebuffer_keeps_pass_and_views_alive() {
        let mock = MockBackend::new();
        let pass = color_pass(&mock);
        let color = target(&mock);
        let framebuffer = Framebuffer::new(&pass, &[color.view()], color.extent()).unwrap();

        pass.release();
        color.release();
        assert_eq!(mock.live(ObjectKind::RenderPass), 1);
        assert_eq!(mock.live(ObjectKind::ImageView), 1);

        framebuffer.release();
        assert_eq!(mock.live(ObjectKind::Framebuffer), 0);
        assert_eq!(mock.live(ObjectKind::RenderPass), 0);
        assert_eq!(mock.live(ObjectKind::ImageView), 0);
        assert_eq!(mock.live(ObjectKind::Image), 0);
        assert!(mock.errors().is_empty());
    }
}

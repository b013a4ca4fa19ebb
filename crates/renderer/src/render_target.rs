//! Swapchain-backed render target and the per-frame protocol.
//!
//! [`RenderTarget`] ties a [`Swapchain`], the objects derived from its
//! format and extent (render pass, depth buffer, framebuffers) and a
//! [`FrameRing`] together. The application drives it with two calls:
//!
//! - [`RenderTarget::begin_frame`] waits for the next slot, resets it and
//!   acquires an image. `None` means "no frame this time, try again".
//! - [`RenderTarget::end_frame`] submits the recording and presents it.
//!   `false` means the swapchain was rebuilt and anything the caller
//!   derived from its extent or format should be refreshed.
//!
//! # Rebuilds
//!
//! An `OUT_OF_DATE` acquire or present, a pending [`resize`](RenderTarget::resize)
//! and, with [`SuboptimalPolicy::Rebuild`], a `SUBOPTIMAL` present all lead
//! to the same sequence: wait for the device to go idle, reset every frame
//! slot, recreate the swapchain and everything derived from it, then notify
//! the [`on_rebuild`](RenderTarget::on_rebuild) listeners. The frame ring
//! itself is never recreated.
//!
//! A minimized window (zero surface extent) cannot have a swapchain built
//! for it; `begin_frame` keeps returning `None` until the surface has a
//! non-zero size again.
//!
//! # Example
//!
//! ```no_run
//! use strand_core::RendererConfig;
//! use strand_renderer::RenderTarget;
//! use strand_rhi::{BackendRef, vk};
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let config = RendererConfig::default();
//! let mut target = RenderTarget::new(backend, &config, vk::Extent2D { width: 1280, height: 720 })?;
//!
//! target.on_rebuild(|event| {
//!     println!("swapchain is now {}x{}", event.extent.width, event.extent.height);
//! });
//!
//! loop {
//!     let Some(mut frame) = target.begin_frame()? else {
//!         continue;
//!     };
//!     target.begin_render_pass(&mut frame, config.clear_color)?;
//!     // frame.command_buffer_mut().draw(...)
//!     target.end_render_pass(&mut frame)?;
//!     target.end_frame(frame)?;
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use tracing::{debug, error, info, trace, warn};

use strand_core::{RendererConfig, SuboptimalPolicy};
use strand_rhi::backend::RenderPassDesc;
use strand_rhi::command::{CommandBuffer, CommandPool, RetainPolicy};
use strand_rhi::render_pass::{Framebuffer, RenderPass};
use strand_rhi::swapchain::{Acquired, Swapchain, SwapchainImage};
use strand_rhi::{BackendRef, RhiError, RhiResult, Shared, SurfaceStatus, vk};

use crate::depth_buffer::{DEFAULT_DEPTH_FORMAT, DepthBuffer};
use crate::frame_ring::{FrameRing, FrameSlot};

/// Counters for the frame loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Presents that reached the surface (`SUCCESS` or `SUBOPTIMAL`).
    pub frames_presented: u64,
    pub rebuilds: u64,
    /// Frames that were started but never presented.
    pub dropped_frames: u64,
    /// Slot fence waits that found the GPU still busy.
    pub blocking_waits: u64,
}

/// Passed to rebuild listeners after every successful rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildEvent {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub generation: u64,
}

type RebuildListener = Box<dyn FnMut(&RebuildEvent) + Send>;

/// A frame between [`RenderTarget::begin_frame`] and [`RenderTarget::end_frame`].
///
/// Owns the slot's command buffer while recording. It must be handed back
/// through `end_frame`; a dropped frame leaves its slot without a command
/// buffer.
#[must_use = "an active frame must be passed to RenderTarget::end_frame"]
pub struct ActiveFrame {
    slot: usize,
    image: SwapchainImage,
    command_buffer: CommandBuffer,
    framebuffer: Shared<Framebuffer>,
    extent: vk::Extent2D,
    suboptimal: bool,
}

impl ActiveFrame {
    /// Index of the frame slot this frame records into.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn image(&self) -> SwapchainImage {
        self.image
    }

    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image.index
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    #[inline]
    pub fn framebuffer(&self) -> &Shared<Framebuffer> {
        &self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Whether the acquire reported the swapchain as suboptimal.
    #[inline]
    pub fn is_suboptimal(&self) -> bool {
        self.suboptimal
    }
}

/// Swapchain, derived attachments and frame ring.
///
/// # Thread Safety
///
/// Not thread-safe; drive it from the render thread only.
pub struct RenderTarget {
    backend: BackendRef,
    ring: FrameRing,
    framebuffers: Vec<Shared<Framebuffer>>,
    depth: Option<DepthBuffer>,
    render_pass: Shared<RenderPass>,
    swapchain: Swapchain,
    suboptimal_policy: SuboptimalPolicy,
    clear_color: [f32; 4],
    requested_extent: vk::Extent2D,
    pending_resize: Option<vk::Extent2D>,
    minimized: bool,
    stats: FrameStats,
    listeners: Vec<RebuildListener>,
}

impl RenderTarget {
    /// Creates the swapchain, its attachments and the frame ring.
    ///
    /// # Arguments
    ///
    /// * `backend` - The device backend owning the surface
    /// * `config` - Ring size, retain policy, present mode and suboptimal policy
    /// * `extent` - Current window size in pixels
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] for an invalid configuration, or
    /// any error from creating the swapchain or frame resources.
    pub fn new(
        backend: BackendRef,
        config: &RendererConfig,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        config
            .validate()
            .map_err(|e| RhiError::InvalidState(e.to_string()))?;

        let swapchain = Swapchain::new(backend.clone(), extent, config.present_mode)?;
        let render_pass = create_render_pass(&backend, swapchain.format())?;
        let depth = DepthBuffer::new(backend.clone(), swapchain.extent())?;
        let framebuffers = create_framebuffers(&render_pass, &swapchain, &depth)?;

        let pool = CommandPool::new(backend.clone())?;
        let ring = FrameRing::new(
            &pool,
            config.frames_in_flight,
            RetainPolicy::from_config(config),
        )?;

        info!(
            "Render target ready: {}x{}, {} images, {} frames in flight",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            ring.size()
        );

        Ok(Self {
            backend,
            ring,
            framebuffers,
            depth: Some(depth),
            render_pass,
            swapchain,
            suboptimal_policy: config.suboptimal,
            clear_color: config.clear_color,
            requested_extent: extent,
            pending_resize: None,
            minimized: false,
            stats: FrameStats::default(),
            listeners: Vec::new(),
        })
    }

    // =========================================================================
    // Frame protocol
    // =========================================================================

    /// Starts a frame: WAIT, RESET and ACQUIRE, then begins recording.
    ///
    /// Returns `None` when no frame can be recorded right now. A rebuild
    /// has been performed where possible and the caller should simply try
    /// again next iteration.
    ///
    /// # Errors
    ///
    /// Any backend failure other than surface staleness.
    pub fn begin_frame(&mut self) -> RhiResult<Option<ActiveFrame>> {
        if self.pending_resize.is_some() || self.minimized {
            self.rebuild()?;
            return Ok(None);
        }

        let index = self.ring.next_slot()?;
        let acquired = self
            .swapchain
            .acquire_next_image(self.ring.slot(index).image_available())?;

        let (image, suboptimal) = match acquired {
            Acquired::Image { image, suboptimal } => (image, suboptimal),
            Acquired::OutOfDate => {
                debug!("Acquire reported out of date, rebuilding");
                // Nothing was submitted on the slot; reuse it for the retry.
                self.ring.give_back(index);
                self.stats.dropped_frames += 1;
                self.rebuild()?;
                return Ok(None);
            }
        };
        if suboptimal {
            trace!("Acquired suboptimal image {}", image.index);
        }

        let framebuffer = self
            .framebuffers
            .get(image.index as usize)
            .cloned()
            .ok_or_else(|| {
                RhiError::InvalidState(format!("no framebuffer for image {}", image.index))
            })?;

        let slot = self.ring.slot_mut(index);
        let mut command_buffer = slot.take_command_buffer()?;
        if let Err(e) = command_buffer.begin() {
            slot.return_command_buffer(command_buffer);
            return Err(e);
        }

        trace!("Frame begun on slot {}, image {}", index, image.index);
        Ok(Some(ActiveFrame {
            slot: index,
            image,
            command_buffer,
            framebuffer,
            extent: self.swapchain.extent(),
            suboptimal,
        }))
    }

    /// Begins the render pass over the frame's framebuffer, clearing colour
    /// to `clear` and depth to 1.0, with viewport and scissor covering the
    /// whole extent.
    pub fn begin_render_pass(&self, frame: &mut ActiveFrame, clear: [f32; 4]) -> RhiResult<()> {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_pass = frame.framebuffer.render_pass().clone();
        let framebuffer = frame.framebuffer.clone();
        frame
            .command_buffer
            .begin_render_pass(&render_pass, &framebuffer, &clear_values)?;
        frame.command_buffer.set_full_viewport(frame.extent)
    }

    pub fn end_render_pass(&self, frame: &mut ActiveFrame) -> RhiResult<()> {
        frame.command_buffer.end_render_pass()
    }

    /// Finishes a frame: END, SUBMIT and PRESENT.
    ///
    /// Returns `true` while the swapchain stays valid, `false` after a
    /// rebuild so the caller can refresh anything sized to the old
    /// swapchain.
    ///
    /// # Errors
    ///
    /// Any backend failure other than surface staleness. The slot's
    /// command buffer is handed back to the ring even on failure.
    pub fn end_frame(&mut self, frame: ActiveFrame) -> RhiResult<bool> {
        let ActiveFrame {
            slot: index,
            image,
            mut command_buffer,
            ..
        } = frame;

        let slot = self.ring.slot_mut(index);
        let submitted = submit_frame(slot, &mut command_buffer);
        slot.return_command_buffer(command_buffer);
        submitted?;
        slot.mark_submitted();

        let status = self.swapchain.present(image, slot.render_finished())?;
        match status {
            SurfaceStatus::Success => self.stats.frames_presented += 1,
            SurfaceStatus::Suboptimal => {
                self.stats.frames_presented += 1;
                if self.suboptimal_policy == SuboptimalPolicy::Rebuild {
                    debug!("Present reported suboptimal, rebuilding");
                    self.rebuild()?;
                    return Ok(false);
                }
                trace!("Present reported suboptimal, tolerated");
            }
            SurfaceStatus::OutOfDate => {
                debug!("Present reported out of date, rebuilding");
                self.stats.dropped_frames += 1;
                self.rebuild()?;
                return Ok(false);
            }
        }

        if self.pending_resize.is_some() {
            self.rebuild()?;
            return Ok(false);
        }
        Ok(true)
    }

    // =========================================================================
    // Rebuilds
    // =========================================================================

    /// Records a new window size. The next `begin_frame` or `end_frame`
    /// rebuilds the swapchain.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.pending_resize = Some(vk::Extent2D { width, height });
    }

    /// Registers a closure called after every successful rebuild.
    pub fn on_rebuild<F>(&mut self, listener: F)
    where
        F: FnMut(&RebuildEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Rebuilds the swapchain and everything derived from it.
    ///
    /// Returns `false` if the surface has zero extent, in which case the
    /// target stays minimized and the old swapchain is kept.
    ///
    /// Must not be called between `begin_frame` and `end_frame`: the
    /// frame's image would belong to the retired swapchain.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] while a frame is being recorded,
    /// or an error if waiting for idle or any recreation fails.
    pub fn rebuild(&mut self) -> RhiResult<bool> {
        if let Some(slot) = self.ring.recording_slot() {
            return Err(RhiError::InvalidState(format!(
                "cannot rebuild while slot {} is recording, end the frame first",
                slot
            )));
        }
        if let Some(extent) = self.pending_resize.take() {
            self.requested_extent = extent;
        }

        self.backend.wait_idle()?;
        self.ring.reclaim_after_idle()?;

        let extent = Swapchain::surface_extent(&self.backend, self.requested_extent)?;
        self.framebuffers.clear();
        self.depth = None;

        if extent.width == 0 || extent.height == 0 {
            if !self.minimized {
                info!("Surface has zero extent, pausing frames");
            }
            self.minimized = true;
            return Ok(false);
        }
        if self.minimized {
            info!("Surface restored, resuming frames");
        }

        let old_format = self.render_pass.desc().color_format;
        self.swapchain.recreate(self.requested_extent)?;
        if old_format != self.swapchain.format() {
            warn!(
                "Swapchain format changed from {:?} to {:?}",
                old_format,
                self.swapchain.format()
            );
        }
        self.render_pass = create_render_pass(&self.backend, self.swapchain.format())?;
        let depth = DepthBuffer::new(self.backend.clone(), self.swapchain.extent())?;
        self.framebuffers = create_framebuffers(&self.render_pass, &self.swapchain, &depth)?;
        self.depth = Some(depth);
        self.minimized = false;
        self.stats.rebuilds += 1;

        let event = RebuildEvent {
            extent: self.swapchain.extent(),
            format: self.swapchain.format(),
            generation: self.swapchain.generation(),
        };
        for listener in &mut self.listeners {
            listener(&event);
        }
        debug!(
            "Rebuild {} complete: {}x{}",
            self.stats.rebuilds, event.extent.width, event.extent.height
        );
        Ok(true)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            blocking_waits: self.ring.blocking_waits(),
            ..self.stats
        }
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn render_pass(&self) -> &Shared<RenderPass> {
        &self.render_pass
    }

    #[inline]
    pub fn framebuffers(&self) -> &[Shared<Framebuffer>] {
        &self.framebuffers
    }

    #[inline]
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    #[inline]
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    #[inline]
    pub fn backend(&self) -> &BackendRef {
        &self.backend
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        // No slot fence may be destroyed while its submission is executing.
        if let Err(e) = self.backend.wait_idle() {
            error!("Failed to wait for device idle on shutdown: {}", e);
        }
        if let Err(e) = self.ring.reclaim_after_idle() {
            error!("Failed to reset frame slots on shutdown: {}", e);
        }
        debug!("Render target destroyed");
    }
}

fn submit_frame(slot: &FrameSlot, command_buffer: &mut CommandBuffer) -> RhiResult<()> {
    command_buffer.end()?;
    // Reset only now that a submission is certain to signal it again.
    slot.in_flight().reset()?;
    command_buffer.submit_frame(
        slot.image_available(),
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        slot.render_finished(),
        slot.in_flight(),
    )
}

fn create_render_pass(backend: &BackendRef, color_format: vk::Format) -> RhiResult<Shared<RenderPass>> {
    RenderPass::new(
        backend.clone(),
        RenderPassDesc {
            color_format,
            depth_format: Some(DEFAULT_DEPTH_FORMAT),
            color_final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
    )
}

fn create_framebuffers(
    render_pass: &Shared<RenderPass>,
    swapchain: &Swapchain,
    depth: &DepthBuffer,
) -> RhiResult<Vec<Shared<Framebuffer>>> {
    swapchain
        .textures()
        .iter()
        .map(|texture| {
            Framebuffer::new(
                render_pass,
                &[texture.view(), depth.view()],
                swapchain.extent(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use strand_rhi::mock::{MockBackend, ObjectKind};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn target(mock: &Arc<MockBackend>) -> RenderTarget {
        RenderTarget::new(mock.backend(), &RendererConfig::default(), EXTENT).unwrap()
    }

    fn run_frame(target: &mut RenderTarget) -> Option<bool> {
        let mut frame = target.begin_frame().unwrap()?;
        target.begin_render_pass(&mut frame, [0.0; 4]).unwrap();
        target.end_render_pass(&mut frame).unwrap();
        Some(target.end_frame(frame).unwrap())
    }

    #[test]
    fn test_new_builds_one_framebuffer_per_image() {
        let mock = MockBackend::new();
        let target = target(&mock);
        assert_eq!(target.framebuffers().len(), target.swapchain().image_count());
        assert_eq!(
            mock.live(ObjectKind::Framebuffer),
            target.swapchain().image_count()
        );
        assert_eq!(target.render_pass().attachment_count(), 2);
        assert_eq!(target.ring().size(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mock = MockBackend::new();
        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(
            RenderTarget::new(mock.backend(), &config, EXTENT),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_frame_records_render_pass() {
        let mock = MockBackend::new();
        let mut target = target(&mock);
        let before = mock.stats().commands_recorded;

        assert_eq!(run_frame(&mut target), Some(true));
        // begin pass, viewport, scissor, end pass
        assert_eq!(mock.stats().commands_recorded - before, 4);
        assert_eq!(mock.stats().submits, 1);
        assert_eq!(mock.stats().presents, 1);
        assert_eq!(target.stats().frames_presented, 1);
    }

    #[test]
    fn test_active_frame_retains_framebuffer() {
        let mock = MockBackend::new();
        let mut target = target(&mock);
        let mut frame = target.begin_frame().unwrap().unwrap();
        target.begin_render_pass(&mut frame, [0.0; 4]).unwrap();
        assert!(frame.command_buffer().retains(frame.framebuffer()));
        assert!(frame.command_buffer().retains(target.render_pass()));
        target.end_render_pass(&mut frame).unwrap();
        target.end_frame(frame).unwrap();
    }

    #[test]
    fn test_resize_rebuilds_on_next_begin() {
        let mock = MockBackend::new();
        let mut target = target(&mock);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        target.on_rebuild(move |event| sink.lock().unwrap().push(*event));

        mock.set_surface_extent(1024, 768);
        target.resize(1024, 768);
        assert!(target.begin_frame().unwrap().is_none());

        assert_eq!(target.stats().rebuilds, 1);
        assert_eq!(target.extent().width, 1024);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].extent.height, 768);
        assert_eq!(events[0].generation, 1);
    }

    #[test]
    fn test_drop_waits_idle() {
        let mock = MockBackend::new();
        let mut target = target(&mock);
        run_frame(&mut target);
        let idles = mock.stats().wait_idles;
        drop(target);
        assert_eq!(mock.stats().wait_idles, idles + 1);
        assert!(mock.errors().is_empty(), "{:?}", mock.errors());
    }
}

//! In-process device backend for tests and headless runs.
//!
//! [`MockBackend`] hands out fake handles and keeps enough state to catch
//! protocol mistakes the real driver would only report through validation
//! layers:
//! - every handle is tracked per [`ObjectKind`]; destroying an unknown or
//!   already destroyed handle is recorded in [`MockBackend::errors`]
//! - fences follow a simulated clock: a submission leaves its fence
//!   *pending* until someone waits on it (which counts as a blocking wait)
//!   or the device goes idle. Polling never completes work.
//! - binary semaphores must be signaled before they are waited on and
//!   cannot be signaled twice
//! - acquire and present return statuses from a script, `Success` once the
//!   script runs out
//!
//! ```
//! use strand_rhi::mock::{MockBackend, ObjectKind};
//! use strand_rhi::sync::Fence;
//!
//! let mock = MockBackend::new();
//! let fence = Fence::new(mock.backend(), true).unwrap();
//! assert_eq!(mock.live(ObjectKind::Fence), 1);
//! drop(fence);
//! assert_eq!(mock.live(ObjectKind::Fence), 0);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use tracing::{trace, warn};

use crate::backend::{
    BackendRef, BufferDesc, Command, DescriptorPoolDesc, DeviceBackend, FramebufferDesc,
    ImageDesc, ImageViewDesc, RenderPassDesc, SamplerDesc, Submission, SurfaceStatus,
    SurfaceSupport, SwapchainDesc, write_range,
};
use crate::error::{RhiError, RhiResult};

/// Kinds of objects the mock keeps count of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
    Swapchain,
    Buffer,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    RenderPass,
    Framebuffer,
    Pipeline,
    PipelineLayout,
    DescriptorPool,
    DescriptorSet,
}

/// Counters exposed for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub submits: usize,
    pub acquires: usize,
    pub presents: usize,
    pub swapchains_created: usize,
    /// Fence waits of any kind.
    pub fence_waits: usize,
    /// Fence waits that found their submission still executing.
    pub blocking_fence_waits: usize,
    pub wait_idles: usize,
    pub commands_recorded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug)]
struct MockSwapchain {
    images: Vec<vk::Image>,
    next_image: usize,
    extent: vk::Extent2D,
}

#[derive(Debug)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    created: HashMap<ObjectKind, usize>,
    destroyed: HashMap<ObjectKind, usize>,
    fences: HashMap<u64, FenceState>,
    signaled_semaphores: HashSet<u64>,
    recording: HashSet<u64>,
    recorded: HashMap<u64, Vec<&'static str>>,
    swapchains: HashMap<u64, MockSwapchain>,
    host_buffers: HashMap<u64, Vec<u8>>,
    acquire_script: VecDeque<SurfaceStatus>,
    present_script: VecDeque<SurfaceStatus>,
    support: SurfaceSupport,
    stats: MockStats,
    errors: Vec<String>,
}

impl MockState {
    fn allocate(&mut self, kind: ObjectKind) -> u64 {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.insert(raw, kind);
        *self.created.entry(kind).or_default() += 1;
        raw
    }

    fn release(&mut self, kind: ObjectKind, raw: u64) {
        match self.live.get(&raw).copied() {
            Some(live_kind) if live_kind == kind => {
                self.live.remove(&raw);
                *self.destroyed.entry(kind).or_default() += 1;
            }
            Some(live_kind) => self.fail(format!(
                "destroying {raw:#x} as {kind:?} but it is a {live_kind:?}"
            )),
            None => self.fail(format!("destroying unknown or dead {kind:?} {raw:#x}")),
        }
    }

    fn check_live(&mut self, kind: ObjectKind, raw: u64) -> RhiResult<()> {
        if self.live.get(&raw) == Some(&kind) {
            Ok(())
        } else {
            let message = format!("{kind:?} {raw:#x} is not alive");
            self.fail(message.clone());
            Err(RhiError::InvalidHandle(message))
        }
    }

    fn fail(&mut self, message: String) {
        warn!("mock backend: {}", message);
        self.errors.push(message);
    }

    fn protocol_error(&mut self, message: String) -> RhiError {
        self.fail(message.clone());
        RhiError::InvalidState(message)
    }
}

fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

/// Fake device backend.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Creates a mock with an 800x600 surface, 2..=8 images, FIFO and mailbox.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                next_handle: 0x1000,
                live: HashMap::new(),
                created: HashMap::new(),
                destroyed: HashMap::new(),
                fences: HashMap::new(),
                signaled_semaphores: HashSet::new(),
                recording: HashSet::new(),
                recorded: HashMap::new(),
                swapchains: HashMap::new(),
                host_buffers: HashMap::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                support: default_support(),
                stats: MockStats::default(),
                errors: Vec::new(),
            }),
        })
    }

    /// This mock as a backend handle.
    pub fn backend(self: &Arc<Self>) -> BackendRef {
        self.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- scripting ----

    /// Queue statuses for upcoming acquire calls.
    pub fn script_acquire(&self, statuses: impl IntoIterator<Item = SurfaceStatus>) {
        self.state().acquire_script.extend(statuses);
    }

    /// Queue statuses for upcoming present calls.
    pub fn script_present(&self, statuses: impl IntoIterator<Item = SurfaceStatus>) {
        self.state().present_script.extend(statuses);
    }

    /// Simulate a window resize as reported by the surface.
    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state().support.capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state().support = support;
    }

    /// Let the simulated GPU finish everything submitted so far.
    pub fn complete_all(&self) {
        for state in self.state().fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
    }

    // ---- inspection ----

    pub fn stats(&self) -> MockStats {
        self.state().stats.clone()
    }

    /// Number of live objects of `kind`.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.state().live.values().filter(|k| **k == kind).count()
    }

    pub fn created(&self, kind: ObjectKind) -> usize {
        self.state().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: ObjectKind) -> usize {
        self.state().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Whether a particular handle is still alive.
    pub fn is_live(&self, raw: u64) -> bool {
        self.state().live.contains_key(&raw)
    }

    /// Protocol violations observed so far.
    pub fn errors(&self) -> Vec<String> {
        self.state().errors.clone()
    }

    /// Names of the commands recorded into `command_buffer` since its last begin.
    pub fn recorded(&self, command_buffer: vk::CommandBuffer) -> Vec<&'static str> {
        self.state()
            .recorded
            .get(&command_buffer.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Contents last written to a host-visible buffer.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state().host_buffers.get(&buffer.as_raw()).cloned()
    }

    pub fn fence_pending(&self, fence: vk::Fence) -> bool {
        self.state().fences.get(&fence.as_raw()) == Some(&FenceState::Pending)
    }
}

impl DeviceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.allocate(ObjectKind::Fence);
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(raw, initial);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if state.fences.get(&fence.as_raw()) == Some(&FenceState::Pending) {
            state.fail(format!("destroying fence {:#x} while pending", fence.as_raw()));
        }
        state.fences.remove(&fence.as_raw());
        state.release(ObjectKind::Fence, fence.as_raw());
    }

    fn wait_fence(&self, fence: vk::Fence, _timeout: u64) -> RhiResult<()> {
        let mut state = self.state();
        state.check_live(ObjectKind::Fence, fence.as_raw())?;
        state.stats.fence_waits += 1;
        match state.fences.get(&fence.as_raw()).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                state.stats.blocking_fence_waits += 1;
                state.fences.insert(fence.as_raw(), FenceState::Signaled);
                Ok(())
            }
            _ => {
                // Nothing will ever signal it.
                state.fail(format!(
                    "waiting on unsignaled fence {:#x} with no submission",
                    fence.as_raw()
                ));
                Err(RhiError::VulkanError(vk::Result::TIMEOUT))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();
        state.check_live(ObjectKind::Fence, fence.as_raw())?;
        if state.fences.get(&fence.as_raw()) == Some(&FenceState::Pending) {
            return Err(state.protocol_error(format!(
                "resetting fence {:#x} while its submission is pending",
                fence.as_raw()
            )));
        }
        state.fences.insert(fence.as_raw(), FenceState::Unsignaled);
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        let mut state = self.state();
        state.check_live(ObjectKind::Fence, fence.as_raw())?;
        Ok(state.fences.get(&fence.as_raw()) == Some(&FenceState::Signaled))
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(
            self.state().allocate(ObjectKind::Semaphore),
        ))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state();
        state.signaled_semaphores.remove(&semaphore.as_raw());
        state.release(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn create_command_pool(&self, _transient: bool) -> RhiResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(
            self.state().allocate(ObjectKind::CommandPool),
        ))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state().release(ObjectKind::CommandPool, pool.as_raw());
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let mut state = self.state();
        state.check_live(ObjectKind::CommandPool, pool.as_raw())?;
        Ok(vk::CommandBuffer::from_raw(
            state.allocate(ObjectKind::CommandBuffer),
        ))
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let mut state = self.state();
        state.recording.remove(&command_buffer.as_raw());
        state.recorded.remove(&command_buffer.as_raw());
        state.release(ObjectKind::CommandBuffer, command_buffer.as_raw());
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let raw = command_buffer.as_raw();
        state.check_live(ObjectKind::CommandBuffer, raw)?;
        state.recording.insert(raw);
        state.recorded.insert(raw, Vec::new());
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        if !state.recording.remove(&command_buffer.as_raw()) {
            return Err(state.protocol_error(format!(
                "ending command buffer {:#x} that is not recording",
                command_buffer.as_raw()
            )));
        }
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let raw = command_buffer.as_raw();
        state.check_live(ObjectKind::CommandBuffer, raw)?;
        state.recording.remove(&raw);
        state.recorded.remove(&raw);
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: &Command<'_>) {
        let mut state = self.state();
        let raw = command_buffer.as_raw();
        if !state.recording.contains(&raw) {
            state.fail(format!(
                "recording {} into {:#x} outside begin/end",
                command.name(),
                raw
            ));
            return;
        }
        state.stats.commands_recorded += 1;
        state
            .recorded
            .entry(raw)
            .or_default()
            .push(command.name());
    }

    fn queue_submit(&self, submission: &Submission) -> RhiResult<()> {
        let mut state = self.state();
        let cb = submission.command_buffer.as_raw();
        state.check_live(ObjectKind::CommandBuffer, cb)?;
        if state.recording.contains(&cb) {
            return Err(state.protocol_error(format!(
                "submitting command buffer {cb:#x} that is still recording"
            )));
        }

        let fence = submission.fence.as_raw();
        if fence != 0 {
            match state.fences.get(&fence).copied() {
                Some(FenceState::Unsignaled) => {}
                other => {
                    return Err(state.protocol_error(format!(
                        "submitting with fence {fence:#x} in state {other:?}"
                    )));
                }
            }
        }

        if let Some((wait, _stage)) = submission.wait
            && !state.signaled_semaphores.remove(&wait.as_raw())
        {
            return Err(state.protocol_error(format!(
                "submission waits on semaphore {:#x} that nothing signaled",
                wait.as_raw()
            )));
        }
        if let Some(signal) = submission.signal
            && !state.signaled_semaphores.insert(signal.as_raw())
        {
            return Err(state.protocol_error(format!(
                "submission signals semaphore {:#x} twice",
                signal.as_raw()
            )));
        }

        if fence != 0 {
            state.fences.insert(fence, FenceState::Pending);
        }
        state.stats.submits += 1;
        trace!("mock submit cb={:#x} fence={:#x}", cb, fence);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<(u32, SurfaceStatus)> {
        let mut state = self.state();
        state.check_live(ObjectKind::Swapchain, swapchain.as_raw())?;
        state.stats.acquires += 1;
        let status = state
            .acquire_script
            .pop_front()
            .unwrap_or(SurfaceStatus::Success);
        if status == SurfaceStatus::OutOfDate {
            return Ok((0, status));
        }
        if !state.signaled_semaphores.insert(signal.as_raw()) {
            return Err(state.protocol_error(format!(
                "acquire signals semaphore {:#x} that is already signaled",
                signal.as_raw()
            )));
        }
        let Some(chain) = state.swapchains.get_mut(&swapchain.as_raw()) else {
            return Err(RhiError::InvalidHandle("swapchain has no images".into()));
        };
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.images.len();
        Ok((index as u32, status))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<SurfaceStatus> {
        let mut state = self.state();
        state.check_live(ObjectKind::Swapchain, swapchain.as_raw())?;
        let image_count = state
            .swapchains
            .get(&swapchain.as_raw())
            .map_or(0, |chain| chain.images.len());
        if image_index as usize >= image_count {
            return Err(state.protocol_error(format!(
                "presenting image {image_index} of a swapchain with {image_count} images"
            )));
        }
        // The wait happens even when the surface turns out stale.
        if !state.signaled_semaphores.remove(&wait.as_raw()) {
            return Err(state.protocol_error(format!(
                "present waits on semaphore {:#x} that nothing signaled",
                wait.as_raw()
            )));
        }
        state.stats.presents += 1;
        Ok(state
            .present_script
            .pop_front()
            .unwrap_or(SurfaceStatus::Success))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.state().stats.wait_idles += 1;
        self.complete_all();
        Ok(())
    }

    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        Ok(self.state().support.clone())
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.state();
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        if old_swapchain != vk::SwapchainKHR::null() {
            state.check_live(ObjectKind::Swapchain, old_swapchain.as_raw())?;
        }
        let raw = state.allocate(ObjectKind::Swapchain);
        state.next_handle += u64::from(desc.image_count);
        let images = (0..u64::from(desc.image_count))
            .map(|i| vk::Image::from_raw(raw + 1 + i))
            .collect();
        state.swapchains.insert(
            raw,
            MockSwapchain {
                images,
                next_image: 0,
                extent: desc.extent,
            },
        );
        state.stats.swapchains_created += 1;
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        let state = self.state();
        state
            .swapchains
            .get(&swapchain.as_raw())
            .map(|chain| chain.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle(format!("swapchain {:#x}", swapchain.as_raw())))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        if let Some(chain) = state.swapchains.remove(&swapchain.as_raw()) {
            trace!(
                "mock destroy swapchain {}x{}",
                chain.extent.width, chain.extent.height
            );
        }
        state.release(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<vk::Buffer> {
        if desc.size == 0 {
            return Err(RhiError::InvalidState(format!(
                "buffer '{}' has zero size",
                desc.name
            )));
        }
        let mut state = self.state();
        let raw = state.allocate(ObjectKind::Buffer);
        if desc.location != MemoryLocation::GpuOnly {
            state.host_buffers.insert(raw, vec![0; desc.size as usize]);
        }
        Ok(vk::Buffer::from_raw(raw))
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut state = self.state();
        let Some(contents) = state.host_buffers.get_mut(&buffer.as_raw()) else {
            return Err(state.protocol_error(format!(
                "writing buffer {:#x} that is not host visible",
                buffer.as_raw()
            )));
        };
        let Some(range) = write_range(offset, data.len(), contents.len()) else {
            return Err(RhiError::InvalidState(format!(
                "write of {} bytes at {} overflows buffer of {}",
                data.len(),
                offset,
                contents.len()
            )));
        };
        contents[range].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        state.host_buffers.remove(&buffer.as_raw());
        state.release(ObjectKind::Buffer, buffer.as_raw());
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<vk::Image> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidState(format!(
                "image '{}' has zero extent",
                desc.name
            )));
        }
        Ok(vk::Image::from_raw(self.state().allocate(ObjectKind::Image)))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state().release(ObjectKind::Image, image.as_raw());
    }

    fn create_image_view(&self, _desc: &ImageViewDesc) -> RhiResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(
            self.state().allocate(ObjectKind::ImageView),
        ))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().release(ObjectKind::ImageView, view.as_raw());
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        Ok(vk::Sampler::from_raw(
            self.state().allocate(ObjectKind::Sampler),
        ))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().release(ObjectKind::Sampler, sampler.as_raw());
    }

    fn create_shader_module(&self, _code: &[u32]) -> RhiResult<vk::ShaderModule> {
        Ok(vk::ShaderModule::from_raw(
            self.state().allocate(ObjectKind::ShaderModule),
        ))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state().release(ObjectKind::ShaderModule, module.as_raw());
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(
            self.state().allocate(ObjectKind::RenderPass),
        ))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state()
            .release(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state();
        state.check_live(ObjectKind::RenderPass, desc.render_pass.as_raw())?;
        for view in desc.attachments {
            state.check_live(ObjectKind::ImageView, view.as_raw())?;
        }
        Ok(vk::Framebuffer::from_raw(
            state.allocate(ObjectKind::Framebuffer),
        ))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state()
            .release(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().release(ObjectKind::Pipeline, pipeline.as_raw());
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state()
            .release(ObjectKind::PipelineLayout, layout.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _desc: &DescriptorPoolDesc<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(vk::DescriptorPool::from_raw(
            self.state().allocate(ObjectKind::DescriptorPool),
        ))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state()
            .release(ObjectKind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let mut state = self.state();
        state.check_live(ObjectKind::DescriptorPool, pool.as_raw())?;
        Ok(vk::DescriptorSet::from_raw(
            state.allocate(ObjectKind::DescriptorSet),
        ))
    }

    fn free_descriptor_set(&self, _pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        self.state().release(ObjectKind::DescriptorSet, set.as_raw());
    }

    fn write_image_sampler(
        &self,
        set: vk::DescriptorSet,
        _binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let mut state = self.state();
        let _ = state.check_live(ObjectKind::DescriptorSet, set.as_raw());
        let _ = state.check_live(ObjectKind::ImageView, view.as_raw());
        let _ = state.check_live(ObjectKind::Sampler, sampler.as_raw());
    }
}

impl MockBackend {
    /// Register an externally built pipeline and layout, as a pipeline
    /// builder would on the Vulkan backend.
    pub fn create_pipeline(&self) -> (vk::Pipeline, vk::PipelineLayout) {
        let mut state = self.state();
        let pipeline = state.allocate(ObjectKind::Pipeline);
        let layout = state.allocate(ObjectKind::PipelineLayout);
        (
            vk::Pipeline::from_raw(pipeline),
            vk::PipelineLayout::from_raw(layout),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_destroy_is_reported() {
        let mock = MockBackend::new();
        let sampler = mock.create_sampler(&SamplerDesc::default()).unwrap();
        mock.destroy_sampler(sampler);
        assert!(mock.errors().is_empty());
        mock.destroy_sampler(sampler);
        assert_eq!(mock.errors().len(), 1);
    }

    #[test]
    fn test_submission_completes_on_wait() {
        let mock = MockBackend::new();
        let pool = mock.create_command_pool(false).unwrap();
        let cb = mock.allocate_command_buffer(pool).unwrap();
        let fence = mock.create_fence(false).unwrap();

        mock.begin_command_buffer(cb).unwrap();
        mock.end_command_buffer(cb).unwrap();
        mock.queue_submit(&Submission {
            command_buffer: cb,
            wait: None,
            signal: None,
            fence,
        })
        .unwrap();

        assert!(mock.fence_pending(fence));
        assert!(!mock.fence_signaled(fence).unwrap());
        mock.wait_fence(fence, u64::MAX).unwrap();
        assert!(mock.fence_signaled(fence).unwrap());
        assert_eq!(mock.stats().blocking_fence_waits, 1);
    }

    #[test]
    fn test_submit_with_signaled_fence_fails() {
        let mock = MockBackend::new();
        let pool = mock.create_command_pool(false).unwrap();
        let cb = mock.allocate_command_buffer(pool).unwrap();
        let fence = mock.create_fence(true).unwrap();
        let result = mock.queue_submit(&Submission {
            command_buffer: cb,
            wait: None,
            signal: None,
            fence,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_acquire_script_and_round_robin() {
        let mock = MockBackend::new();
        let desc = SwapchainDesc {
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            image_count: 2,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        };
        let swapchain = mock.create_swapchain(&desc, vk::SwapchainKHR::null()).unwrap();
        let semaphore = mock.create_semaphore().unwrap();
        mock.script_acquire([SurfaceStatus::OutOfDate]);

        let (_, status) = mock.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap();
        assert_eq!(status, SurfaceStatus::OutOfDate);

        let (first, _) = mock.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap();
        mock.queue_present(swapchain, first, semaphore).unwrap();
        let (second, _) = mock.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap();
        assert_eq!((first, second), (0, 1));
    }

    #[test]
    fn test_semaphore_signaled_twice_is_error() {
        let mock = MockBackend::new();
        let desc = SwapchainDesc {
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            image_count: 2,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        };
        let swapchain = mock.create_swapchain(&desc, vk::SwapchainKHR::null()).unwrap();
        let semaphore = mock.create_semaphore().unwrap();
        mock.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap();
        assert!(mock.acquire_next_image(swapchain, u64::MAX, semaphore).is_err());
    }
}

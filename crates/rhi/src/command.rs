//! Command pools and resource-retaining command buffers.
//!
//! # Overview
//!
//! - [`CommandPool`] is a shared resource command buffers are allocated from
//! - [`CommandBuffer`] records commands and keeps every resource those
//!   commands touch alive until the buffer is reset
//! - [`RetainedList`] is the bounded list behind that retention
//!
//! The rule that makes resource lifetimes safe is simple: a command buffer
//! holds one reference on each resource it uses, and only drops them in
//! [`CommandBuffer::reset`], which refuses to run while the last
//! submission's fence is unsignaled. A resource released everywhere else
//! therefore survives until the GPU is done with it.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::buffer::{Buffer, BufferUsage};
//! use strand_rhi::command::{CommandBuffer, CommandPool, RetainPolicy};
//! use strand_rhi::sync::Fence;
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let pool = CommandPool::new(backend.clone())?;
//! let mut cmd = CommandBuffer::new(&pool, RetainPolicy::default())?;
//! let fence = Fence::new(backend.clone(), false)?;
//!
//! let src = Buffer::new(backend.clone(), 64, BufferUsage::Staging)?;
//! let dst = Buffer::new(backend, 64, BufferUsage::Vertex)?;
//!
//! cmd.begin()?;
//! cmd.copy_buffer(&src, &dst, 64)?; // retains both buffers
//! cmd.end()?;
//! cmd.submit(&fence)?;
//!
//! src.release(); // still alive: the command buffer holds it
//! fence.wait_forever()?;
//! cmd.reset()?; // destroyed here
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use strand_core::RendererConfig;
use tracing::{debug, trace};

use crate::backend::{BackendRef, Command, Submission};
use crate::buffer::Buffer;
use crate::descriptor::DescriptorSet;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, layout_transition};
use crate::pipeline::Pipeline;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::resource::{Resource, ResourceKind, Shared, identity};
use crate::sync::{Fence, Semaphore};

/// Command pool resource.
///
/// Pools are created with the reset-individual-buffer flag so each frame
/// slot can reset its own buffer. Every [`CommandBuffer`] holds its pool,
/// so the pool is destroyed after the last buffer allocated from it.
pub struct CommandPool {
    backend: BackendRef,
    pool: vk::CommandPool,
    transient: bool,
}

impl CommandPool {
    /// Creates a pool for long-lived, individually reset buffers.
    pub fn new(backend: BackendRef) -> RhiResult<Shared<Self>> {
        Self::create(backend, false)
    }

    /// Creates a pool for short-lived one-shot buffers.
    pub fn new_transient(backend: BackendRef) -> RhiResult<Shared<Self>> {
        Self::create(backend, true)
    }

    fn create(backend: BackendRef, transient: bool) -> RhiResult<Shared<Self>> {
        let pool = backend.create_command_pool(transient)?;
        debug!("Created command pool (transient: {})", transient);
        Ok(Shared::new(Self {
            backend,
            pool,
            transient,
        }))
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn backend(&self) -> &BackendRef {
        &self.backend
    }
}

impl Resource for CommandPool {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CommandPool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.backend.destroy_command_pool(self.pool);
        debug!("Destroyed command pool");
    }
}

/// How many resources a command buffer may retain per recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetainPolicy {
    pub capacity: usize,
    /// Double the capacity when full instead of failing.
    pub growable: bool,
}

impl RetainPolicy {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            capacity: config.retained_capacity,
            growable: config.retained_growth,
        }
    }
}

impl Default for RetainPolicy {
    fn default() -> Self {
        Self {
            capacity: 64,
            growable: false,
        }
    }
}

/// Resources held by one recording.
///
/// Retaining the same resource twice keeps a single reference.
pub struct RetainedList {
    entries: Vec<Arc<dyn Resource>>,
    limit: usize,
    growable: bool,
}

impl RetainedList {
    pub fn new(policy: RetainPolicy) -> Self {
        Self {
            entries: Vec::with_capacity(policy.capacity),
            limit: policy.capacity,
            growable: policy.growable,
        }
    }

    /// Adds a reference. Returns `false` if the resource was already held.
    ///
    /// # Errors
    ///
    /// [`RhiError::RetainedCapacityExceeded`] when the list is full and
    /// growth is disabled.
    pub fn retain(&mut self, resource: Arc<dyn Resource>) -> RhiResult<bool> {
        if self.contains(&resource) {
            return Ok(false);
        }
        if self.entries.len() == self.limit {
            if !self.growable {
                return Err(RhiError::RetainedCapacityExceeded {
                    capacity: self.limit,
                });
            }
            self.limit = (self.limit * 2).max(1);
            debug!("Retained list grown to {}", self.limit);
        }
        self.entries.push(resource);
        Ok(true)
    }

    pub fn contains(&self, resource: &Arc<dyn Resource>) -> bool {
        let id = identity(resource);
        self.entries.iter().any(|entry| identity(entry) == id)
    }

    /// Drops every held reference, returning how many were released.
    pub fn release_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current limit; grows over time for growable lists.
    pub fn capacity(&self) -> usize {
        self.limit
    }

    pub fn count_of(&self, kind: ResourceKind) -> usize {
        self.entries.iter().filter(|e| e.kind() == kind).count()
    }
}

/// Lifecycle state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Reset, nothing recorded.
    Initial,
    Recording,
    /// Ended, not yet submitted.
    Executable,
    /// Submitted; may still execute until its fence signals.
    Pending,
}

/// A recording unit that retains the resources it touches.
///
/// # Thread Safety
///
/// Recording takes `&mut self`; a command buffer belongs to one thread at
/// a time.
pub struct CommandBuffer {
    backend: BackendRef,
    pool: Shared<CommandPool>,
    buffer: vk::CommandBuffer,
    state: CommandBufferState,
    /// Fence of the last submission. It belongs to whoever submitted and
    /// must outlive the next reset.
    fence: Option<vk::Fence>,
    retained: RetainedList,
}

impl CommandBuffer {
    /// Allocates a primary command buffer from `pool`.
    pub fn new(pool: &Shared<CommandPool>, policy: RetainPolicy) -> RhiResult<Self> {
        let backend = pool.backend().clone();
        let buffer = backend.allocate_command_buffer(pool.handle())?;
        Ok(Self {
            backend,
            pool: pool.acquire(),
            buffer,
            state: CommandBufferState::Initial,
            fence: None,
            retained: RetainedList::new(policy),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Number of resources held by the current recording.
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    pub fn retained(&self) -> &RetainedList {
        &self.retained
    }

    /// Whether `resource` is held by the current recording.
    pub fn retains<R: Resource>(&self, resource: &Shared<R>) -> bool {
        self.retained.contains(&resource.erase())
    }

    /// Whether the last submission may still be executing.
    pub fn is_in_flight(&self) -> RhiResult<bool> {
        match (self.state, self.fence) {
            (CommandBufferState::Pending, Some(fence)) => {
                Ok(!self.backend.fence_signaled(fence)?)
            }
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts a recording.
    ///
    /// A buffer that still holds an earlier recording is reset first, which
    /// releases what that recording retained.
    ///
    /// # Errors
    ///
    /// - [`RhiError::CommandBufferInFlight`] if the last submission has not completed
    /// - [`RhiError::InvalidState`] if the buffer is already recording
    pub fn begin(&mut self) -> RhiResult<()> {
        match self.state {
            CommandBufferState::Recording => {
                return Err(RhiError::InvalidState(
                    "begin called on a recording command buffer".into(),
                ));
            }
            CommandBufferState::Initial => {}
            CommandBufferState::Executable | CommandBufferState::Pending => self.reset()?,
        }
        self.backend.begin_command_buffer(self.buffer)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Adds a reference on `resource` that lives until the next reset.
    ///
    /// Must precede any recorded command that reads or writes the resource.
    pub fn use_resource<R: Resource>(&mut self, resource: &Shared<R>) -> RhiResult<()> {
        self.use_erased(resource.erase())
    }

    /// [`use_resource`](Self::use_resource) for an already type-erased reference.
    pub fn use_erased(&mut self, resource: Arc<dyn Resource>) -> RhiResult<()> {
        self.ensure_recording("use")?;
        if self.retained.retain(resource)? {
            trace!("Retained resource ({} held)", self.retained.len());
        }
        Ok(())
    }

    /// Finishes the recording.
    pub fn end(&mut self) -> RhiResult<()> {
        self.ensure_recording("end")?;
        self.backend.end_command_buffer(self.buffer)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Submits without semaphores, for one-shot work the caller waits on.
    pub fn submit(&mut self, fence: &Fence) -> RhiResult<()> {
        self.submit_with(Submission {
            command_buffer: self.buffer,
            wait: None,
            signal: None,
            fence: fence.handle(),
        })
    }

    /// Submits on the swapchain path: waits on `wait` at `wait_stage`,
    /// signals `signal` and `fence` on completion.
    pub fn submit_frame(
        &mut self,
        wait: &Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: &Semaphore,
        fence: &Fence,
    ) -> RhiResult<()> {
        self.submit_with(Submission {
            command_buffer: self.buffer,
            wait: Some((wait.handle(), wait_stage)),
            signal: Some(signal.handle()),
            fence: fence.handle(),
        })
    }

    fn submit_with(&mut self, submission: Submission) -> RhiResult<()> {
        if self.state != CommandBufferState::Executable {
            return Err(RhiError::InvalidState(format!(
                "submit called in state {:?}",
                self.state
            )));
        }
        self.backend.queue_submit(&submission)?;
        self.state = CommandBufferState::Pending;
        self.fence = Some(submission.fence);
        Ok(())
    }

    /// Returns the buffer to its initial state and releases every retained
    /// resource, finalizing those whose last holder was this buffer.
    ///
    /// # Errors
    ///
    /// [`RhiError::CommandBufferInFlight`] if the last submission's fence
    /// has not signaled yet.
    pub fn reset(&mut self) -> RhiResult<()> {
        if self.is_in_flight()? {
            return Err(RhiError::CommandBufferInFlight);
        }
        self.backend.reset_command_buffer(self.buffer)?;
        let released = self.retained.release_all();
        if released > 0 {
            trace!("Command buffer reset released {} resources", released);
        }
        self.state = CommandBufferState::Initial;
        self.fence = None;
        Ok(())
    }

    fn ensure_recording(&self, operation: &str) -> RhiResult<()> {
        if self.state == CommandBufferState::Recording {
            Ok(())
        } else {
            Err(RhiError::InvalidState(format!(
                "{} called in state {:?}",
                operation, self.state
            )))
        }
    }

    fn record(&self, command: Command<'_>) -> RhiResult<()> {
        self.ensure_recording("record")?;
        self.backend.record(self.buffer, &command);
        Ok(())
    }

    // =========================================================================
    // Render passes
    // =========================================================================

    /// Begins `render_pass` over the whole of `framebuffer`.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &Shared<RenderPass>,
        framebuffer: &Shared<Framebuffer>,
        clear_values: &[vk::ClearValue],
    ) -> RhiResult<()> {
        self.use_resource(render_pass)?;
        self.use_resource(framebuffer)?;
        self.record(Command::BeginRenderPass {
            render_pass: render_pass.handle(),
            framebuffer: framebuffer.handle(),
            extent: framebuffer.extent(),
            clear_values,
        })
    }

    pub fn end_render_pass(&mut self) -> RhiResult<()> {
        self.record(Command::EndRenderPass)
    }

    // =========================================================================
    // Binding
    // =========================================================================

    pub fn bind_pipeline(&mut self, pipeline: &Shared<Pipeline>) -> RhiResult<()> {
        self.use_resource(pipeline)?;
        self.record(Command::BindPipeline {
            bind_point: pipeline.bind_point(),
            pipeline: pipeline.handle(),
        })
    }

    pub fn bind_vertex_buffer(
        &mut self,
        binding: u32,
        buffer: &Shared<Buffer>,
        offset: u64,
    ) -> RhiResult<()> {
        self.use_resource(buffer)?;
        self.record(Command::BindVertexBuffer {
            binding,
            buffer: buffer.handle(),
            offset,
        })
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: &Shared<Buffer>,
        offset: u64,
        index_type: vk::IndexType,
    ) -> RhiResult<()> {
        self.use_resource(buffer)?;
        self.record(Command::BindIndexBuffer {
            buffer: buffer.handle(),
            offset,
            index_type,
        })
    }

    /// Binds `set` at `set_index` using the layout of `pipeline`.
    pub fn bind_descriptor_set(
        &mut self,
        pipeline: &Shared<Pipeline>,
        set_index: u32,
        set: &Shared<DescriptorSet>,
    ) -> RhiResult<()> {
        self.use_resource(pipeline)?;
        self.use_resource(set)?;
        self.record(Command::BindDescriptorSet {
            bind_point: pipeline.bind_point(),
            layout: pipeline.layout(),
            set_index,
            set: set.handle(),
        })
    }

    // =========================================================================
    // Dynamic state
    // =========================================================================

    pub fn set_viewport(&mut self, viewport: vk::Viewport) -> RhiResult<()> {
        self.record(Command::SetViewport(viewport))
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) -> RhiResult<()> {
        self.record(Command::SetScissor(scissor))
    }

    /// Sets viewport and scissor to cover `extent`.
    pub fn set_full_viewport(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        })?;
        self.set_scissor(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> RhiResult<()> {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        })
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> RhiResult<()> {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance: 0,
        })
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    /// Copies the first `size` bytes of `src` into `dst`.
    pub fn copy_buffer(
        &mut self,
        src: &Shared<Buffer>,
        dst: &Shared<Buffer>,
        size: u64,
    ) -> RhiResult<()> {
        if size > src.size() || size > dst.size() {
            return Err(RhiError::InvalidState(format!(
                "copy of {} bytes exceeds source ({}) or destination ({})",
                size,
                src.size(),
                dst.size()
            )));
        }
        self.use_resource(src)?;
        self.use_resource(dst)?;
        let regions = [vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        }];
        self.record(Command::CopyBuffer {
            src: src.handle(),
            dst: dst.handle(),
            regions: &regions,
        })
    }

    /// Copies tightly packed pixels from `src` into the whole of `dst`,
    /// which must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &mut self,
        src: &Shared<Buffer>,
        dst: &Shared<Image>,
    ) -> RhiResult<()> {
        self.use_resource(src)?;
        self.use_resource(dst)?;
        self.record(Command::CopyBufferToImage {
            src: src.handle(),
            dst: dst.handle(),
            extent: dst.extent(),
        })
    }

    /// Records a layout transition barrier for `image`.
    pub fn transition_image(
        &mut self,
        image: &Shared<Image>,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RhiResult<()> {
        let transition =
            layout_transition(image.handle(), image.aspect(), old_layout, new_layout)?;
        self.use_resource(image)?;
        self.record(Command::ImageBarrier(transition))
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.state == CommandBufferState::Pending {
            debug!("Dropping submitted command buffer; its owner waited for completion");
        }
        self.backend
            .free_command_buffer(self.pool.handle(), self.buffer);
        // Retained resources and the pool are released after the free.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferUsage;
    use crate::mock::{MockBackend, ObjectKind};

    fn setup(policy: RetainPolicy) -> (std::sync::Arc<MockBackend>, CommandBuffer, Fence) {
        let mock = MockBackend::new();
        let pool = CommandPool::new(mock.backend()).unwrap();
        let cmd = CommandBuffer::new(&pool, policy).unwrap();
        let fence = Fence::new(mock.backend(), false).unwrap();
        (mock, cmd, fence)
    }

    fn buffer(mock: &std::sync::Arc<MockBackend>) -> Shared<Buffer> {
        Buffer::new(mock.backend(), 16, BufferUsage::Uniform).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (_mock, mut cmd, fence) = setup(RetainPolicy::default());
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        cmd.submit(&fence).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Pending);
        fence.wait_forever().unwrap();
        cmd.reset().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);
    }

    #[test]
    fn test_use_outside_recording_fails() {
        let (mock, mut cmd, _fence) = setup(RetainPolicy::default());
        let resource = buffer(&mock);
        assert!(matches!(
            cmd.use_resource(&resource),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_retained_resource_outlives_release() {
        let (mock, mut cmd, fence) = setup(RetainPolicy::default());
        let resource = buffer(&mock);
        let raw = ash::vk::Handle::as_raw(resource.handle());

        cmd.begin().unwrap();
        cmd.use_resource(&resource).unwrap();
        assert_eq!(resource.ref_count(), 2);
        cmd.end().unwrap();
        cmd.submit(&fence).unwrap();

        resource.release();
        assert!(mock.is_live(raw));

        fence.wait_forever().unwrap();
        cmd.reset().unwrap();
        assert!(!mock.is_live(raw));
        assert!(mock.errors().is_empty());
    }

    #[test]
    fn test_reset_before_fence_signals_fails() {
        let (mock, mut cmd, fence) = setup(RetainPolicy::default());
        let resource = buffer(&mock);
        cmd.begin().unwrap();
        cmd.use_resource(&resource).unwrap();
        cmd.end().unwrap();
        cmd.submit(&fence).unwrap();

        assert!(matches!(cmd.reset(), Err(RhiError::CommandBufferInFlight)));
        assert!(matches!(cmd.begin(), Err(RhiError::CommandBufferInFlight)));
        assert_eq!(cmd.retained_len(), 1);

        mock.complete_all();
        cmd.begin().unwrap();
        assert_eq!(cmd.retained_len(), 0);
        assert_eq!(resource.ref_count(), 1);
    }

    #[test]
    fn test_same_resource_retained_once() {
        let (mock, mut cmd, _fence) = setup(RetainPolicy::default());
        let resource = buffer(&mock);
        cmd.begin().unwrap();
        cmd.bind_vertex_buffer(0, &resource, 0).unwrap();
        cmd.bind_vertex_buffer(1, &resource, 0).unwrap();
        assert_eq!(cmd.retained_len(), 1);
        assert_eq!(resource.ref_count(), 2);
        assert!(cmd.retains(&resource));
    }

    #[test]
    fn test_capacity_exceeded() {
        let policy = RetainPolicy {
            capacity: 2,
            growable: false,
        };
        let (mock, mut cmd, _fence) = setup(policy);
        let resources: Vec<_> = (0..3).map(|_| buffer(&mock)).collect();
        cmd.begin().unwrap();
        cmd.use_resource(&resources[0]).unwrap();
        cmd.use_resource(&resources[1]).unwrap();
        let err = cmd.use_resource(&resources[2]).unwrap_err();
        assert!(matches!(
            err,
            RhiError::RetainedCapacityExceeded { capacity: 2 }
        ));
        // Re-using a held resource does not count against the limit.
        cmd.use_resource(&resources[0]).unwrap();
    }

    #[test]
    fn test_capacity_grows_when_allowed() {
        let policy = RetainPolicy {
            capacity: 2,
            growable: true,
        };
        let (mock, mut cmd, _fence) = setup(policy);
        let resources: Vec<_> = (0..5).map(|_| buffer(&mock)).collect();
        cmd.begin().unwrap();
        for resource in &resources {
            cmd.use_resource(resource).unwrap();
        }
        assert_eq!(cmd.retained_len(), 5);
        assert_eq!(cmd.retained().capacity(), 8);
        assert_eq!(cmd.retained().count_of(ResourceKind::Buffer), 5);
    }

    #[test]
    fn test_copy_records_and_retains() {
        let (mock, mut cmd, _fence) = setup(RetainPolicy::default());
        let src = Buffer::new(mock.backend(), 32, BufferUsage::Staging).unwrap();
        let dst = Buffer::new(mock.backend(), 32, BufferUsage::Vertex).unwrap();
        cmd.begin().unwrap();
        cmd.copy_buffer(&src, &dst, 32).unwrap();
        assert!(cmd.copy_buffer(&src, &dst, 64).is_err());
        cmd.end().unwrap();
        assert_eq!(mock.recorded(cmd.handle()), vec!["copy_buffer"]);
        assert!(cmd.retains(&src) && cmd.retains(&dst));
    }

    #[test]
    fn test_drop_frees_buffer_then_pool() {
        let mock = MockBackend::new();
        {
            let pool = CommandPool::new(mock.backend()).unwrap();
            let _cmd = CommandBuffer::new(&pool, RetainPolicy::default()).unwrap();
            pool.release();
            assert_eq!(mock.live(ObjectKind::CommandPool), 1);
        }
        assert_eq!(mock.live(ObjectKind::CommandPool), 0);
        assert_eq!(mock.live(ObjectKind::CommandBuffer), 0);
        assert!(mock.errors().is_empty());
    }

    fn assert_send<T: Send>() {}

    #[test]
    fn test_command_buffer_is_send() {
        assert_send::<CommandBuffer>();
    }
}

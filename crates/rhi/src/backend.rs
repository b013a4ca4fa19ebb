//! The device backend seam.
//!
//! Everything above this module talks to the GPU through [`DeviceBackend`].
//! The Vulkan implementation lives in [`device`](crate::device); an
//! in-process fake for tests lives in `mock` (behind the `mock` feature).
//!
//! Raw `ash::vk` handles are the currency on both sides of the trait. The
//! backend never owns lifetimes: every `create_*` is paired with a
//! `destroy_*` that the resource wrappers call from their `Drop`.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::RhiResult;

/// Shared handle to a backend, held by every GPU-backed object.
pub type BackendRef = Arc<dyn DeviceBackend>;

/// Outcome of an acquire or present call that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceStatus {
    /// The surface matches the swapchain.
    Success,
    /// Still usable, but no longer matches the surface exactly.
    Suboptimal,
    /// Unusable; the swapchain must be rebuilt.
    OutOfDate,
}

impl SurfaceStatus {
    /// Map the `Ok` side of `vkAcquireNextImageKHR` / `vkQueuePresentKHR`.
    pub fn from_suboptimal_flag(suboptimal: bool) -> Self {
        if suboptimal {
            SurfaceStatus::Suboptimal
        } else {
            SurfaceStatus::Success
        }
    }
}

/// Surface capabilities, formats and present modes reported for a device.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// A swapchain needs at least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Parameters for a swapchain build.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Parameters for a buffer with bound memory.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

/// Parameters for a single-mip 2D image with bound device-local memory.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
        }
    }
}

/// A single-subpass render pass with one colour and an optional depth attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    /// Layout the colour attachment ends in, e.g. `PRESENT_SRC_KHR`.
    pub color_final_layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct FramebufferDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub attachments: &'a [vk::ImageView],
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorPoolDesc<'a> {
    pub max_sets: u32,
    pub pool_sizes: &'a [vk::DescriptorPoolSize],
}

/// One queue submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// An image layout transition recorded as a pipeline barrier.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// A recorded command.
///
/// Command buffers translate their typed, resource-retaining calls into
/// these and hand them to [`DeviceBackend::record`].
#[derive(Clone, Copy)]
pub enum Command<'a> {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &'a [vk::ClearValue],
    },
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    },
    BindDescriptorSet {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &'a [vk::BufferCopy],
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
    },
    ImageBarrier(ImageTransition),
}

impl Command<'_> {
    /// Name of the Vulkan call this command maps to, without the `vkCmd` prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::EndRenderPass => "end_render_pass",
            Command::BindPipeline { .. } => "bind_pipeline",
            Command::BindVertexBuffer { .. } => "bind_vertex_buffer",
            Command::BindIndexBuffer { .. } => "bind_index_buffer",
            Command::BindDescriptorSet { .. } => "bind_descriptor_set",
            Command::SetViewport(_) => "set_viewport",
            Command::SetScissor(_) => "set_scissor",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Command::ImageBarrier(_) => "image_barrier",
        }
    }
}

// `vk::ClearValue` is a union without a `Debug` impl, so clear values are
// shown by count.
impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                clear_values,
            } => f
                .debug_struct("BeginRenderPass")
                .field("render_pass", render_pass)
                .field("framebuffer", framebuffer)
                .field("extent", extent)
                .field("clear_values", &clear_values.len())
                .finish(),
            Command::EndRenderPass => f.write_str("EndRenderPass"),
            Command::BindPipeline {
                bind_point,
                pipeline,
            } => f
                .debug_struct("BindPipeline")
                .field("bind_point", bind_point)
                .field("pipeline", pipeline)
                .finish(),
            Command::BindVertexBuffer {
                binding,
                buffer,
                offset,
            } => f
                .debug_struct("BindVertexBuffer")
                .field("binding", binding)
                .field("buffer", buffer)
                .field("offset", offset)
                .finish(),
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => f
                .debug_struct("BindIndexBuffer")
                .field("buffer", buffer)
                .field("offset", offset)
                .field("index_type", index_type)
                .finish(),
            Command::BindDescriptorSet {
                bind_point,
                layout,
                set_index,
                set,
            } => f
                .debug_struct("BindDescriptorSet")
                .field("bind_point", bind_point)
                .field("layout", layout)
                .field("set_index", set_index)
                .field("set", set)
                .finish(),
            Command::SetViewport(viewport) => f.debug_tuple("SetViewport").field(viewport).finish(),
            Command::SetScissor(scissor) => f.debug_tuple("SetScissor").field(scissor).finish(),
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => f
                .debug_struct("Draw")
                .field("vertex_count", vertex_count)
                .field("instance_count", instance_count)
                .field("first_vertex", first_vertex)
                .field("first_instance", first_instance)
                .finish(),
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => f
                .debug_struct("DrawIndexed")
                .field("index_count", index_count)
                .field("instance_count", instance_count)
                .field("first_index", first_index)
                .field("vertex_offset", vertex_offset)
                .field("first_instance", first_instance)
                .finish(),
            Command::CopyBuffer { src, dst, regions } => f
                .debug_struct("CopyBuffer")
                .field("src", src)
                .field("dst", dst)
                .field("regions", regions)
                .finish(),
            Command::CopyBufferToImage { src, dst, extent } => f
                .debug_struct("CopyBufferToImage")
                .field("src", src)
                .field("dst", dst)
                .field("extent", extent)
                .finish(),
            Command::ImageBarrier(transition) => {
                f.debug_tuple("ImageBarrier").field(transition).finish()
            }
        }
    }
}

/// Byte range written by `len` bytes at `offset`, if it lies within `capacity`.
pub(crate) fn write_range(offset: u64, len: usize, capacity: usize) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len)?;
    (end <= capacity).then_some(start..end)
}

/// Object creation, submission and presentation primitives.
///
/// Implementations must be callable from any thread. Destroy calls never
/// fail; a backend that cannot destroy an object logs and moves on.
pub trait DeviceBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    // ---- synchronization ----

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Block until the fence signals or `timeout` nanoseconds pass.
    fn wait_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    /// Non-blocking status query.
    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool>;
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ---- command recording ----

    fn create_command_pool(&self, transient: bool) -> RhiResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn record(&self, command_buffer: vk::CommandBuffer, command: &Command<'_>);

    // ---- queue ----

    fn queue_submit(&self, submission: &Submission) -> RhiResult<()>;
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<(u32, SurfaceStatus)>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<SurfaceStatus>;
    fn wait_idle(&self) -> RhiResult<()>;

    // ---- surface and swapchain ----

    fn surface_support(&self) -> RhiResult<SurfaceSupport>;
    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    // ---- memory-backed objects ----

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<vk::Buffer>;
    /// Copy into a host-visible buffer at `offset`.
    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> RhiResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, desc: &ImageViewDesc) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // ---- state objects ----

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    // ---- descriptors ----

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc<'_>)
    -> RhiResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet>;
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet);
    fn write_image_sampler(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    );
}

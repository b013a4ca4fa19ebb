//! Vulkan logical device: the production [`DeviceBackend`].
//!
//! # Overview
//!
//! [`Device`] owns everything below the resource layer:
//! - the [`Instance`] and the window surface it was created for
//! - the logical device and its single graphics/present queue
//! - the `gpu-allocator` allocator and every allocation bound to a buffer
//!   or image created through it
//! - the surface and swapchain extension loaders
//!
//! Resource wrappers never see `ash::Device`; they call the trait methods
//! with raw handles and the device pairs each `destroy_*` with the memory
//! it bound at creation.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::device::Device;
//! use strand_rhi::instance::Instance;
//! use strand_rhi::vk;
//!
//! # fn example(instance: Instance, surface: vk::SurfaceKHR) -> strand_rhi::RhiResult<()> {
//! let device = Device::new(instance, surface)?;
//! let backend = device.backend();
//! println!("Rendering on {}", device.physical().device_name());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use tracing::{debug, error, info};

use crate::backend::{
    BackendRef, BufferDesc, Command, DescriptorPoolDesc, DeviceBackend, FramebufferDesc,
    ImageDesc, ImageViewDesc, RenderPassDesc, SamplerDesc, Submission, SurfaceStatus,
    SurfaceSupport, SwapchainDesc, write_range,
};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, select_physical_device};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// Shared as `Arc<Device>`. The queue, the allocator and the allocation
/// tables each sit behind their own `Mutex`.
pub struct Device {
    device: ash::Device,
    physical: PhysicalDeviceInfo,
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    buffer_memory: Mutex<HashMap<vk::Buffer, Allocation>>,
    image_memory: Mutex<HashMap<vk::Image, Allocation>>,
    instance: Instance,
}

impl Device {
    /// Creates the logical device for `surface`, taking ownership of both
    /// the instance and the surface.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if no GPU can present to
    /// `surface`, or the Vulkan / allocator error that stopped creation.
    /// The surface is destroyed on failure.
    pub fn new(instance: Instance, surface: vk::SurfaceKHR) -> RhiResult<Arc<Self>> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let physical = match select_physical_device(instance.handle(), surface, &surface_loader) {
            Ok(physical) => physical,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let device = match create_logical_device(&instance, &physical) {
            Ok(device) => device,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                }
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        let queue_family = physical.queue_family.index;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical,
            queue: Mutex::new(queue),
            queue_family,
            surface,
            surface_loader,
            swapchain_loader,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            buffer_memory: Mutex::new(HashMap::new()),
            image_memory: Mutex::new(HashMap::new()),
            instance,
        }))
    }

    /// This device as a backend handle for the resource layer.
    pub fn backend(self: &Arc<Self>) -> BackendRef {
        self.clone()
    }

    /// The raw logical device, for building pipelines and layouts.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RhiResult<Allocation> {
        let allocation = lock(&self.allocator).allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(allocation)
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = lock(&self.allocator).free(allocation) {
            error!("Failed to free GPU allocation: {}", e);
        }
    }
}

fn create_logical_device(
    instance: &Instance,
    physical: &PhysicalDeviceInfo,
) -> RhiResult<ash::Device> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(physical.queue_family.index)
        .queue_priorities(&priorities)];

    let features =
        vk::PhysicalDeviceFeatures::default().sampler_anisotropy(physical.supports_anisotropy());

    let extension_names: Vec<*const std::ffi::c_char> =
        DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe {
        instance
            .handle()
            .create_device(physical.device, &create_info, None)?
    };
    info!(
        "Logical device created with {} extension(s), queue family {}",
        DEVICE_EXTENSIONS.len(),
        physical.queue_family.index
    );
    Ok(device)
}

fn first<T>(items: Vec<T>, what: &str) -> RhiResult<T> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::InvalidState(format!("driver returned no {}", what)))
}

/// Maps the two presentation results that are not failures.
fn surface_status<T>(result: ash::prelude::VkResult<(T, bool)>, fallback: T) -> RhiResult<(T, SurfaceStatus)> {
    match result {
        Ok((value, suboptimal)) => Ok((value, SurfaceStatus::from_suboptimal_flag(suboptimal))),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((fallback, SurfaceStatus::OutOfDate)),
        Err(e) => Err(e.into()),
    }
}

impl DeviceBackend for Device {
    fn name(&self) -> &str {
        self.physical.device_name()
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    // =========================================================================
    // Command recording
    // =========================================================================

    fn create_command_pool(&self, transient: bool) -> RhiResult<vk::CommandPool> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(self.queue_family);
        Ok(unsafe { self.device.create_command_pool(&info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        first(buffers, "command buffer")
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn record(&self, cb: vk::CommandBuffer, command: &Command<'_>) {
        let device = &self.device;
        unsafe {
            match *command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_values,
                } => {
                    let info = vk::RenderPassBeginInfo::default()
                        .render_pass(render_pass)
                        .framebuffer(framebuffer)
                        .render_area(vk::Rect2D {
                            offset: vk::Offset2D::default(),
                            extent,
                        })
                        .clear_values(clear_values);
                    device.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
                }
                Command::EndRenderPass => device.cmd_end_render_pass(cb),
                Command::BindPipeline {
                    bind_point,
                    pipeline,
                } => device.cmd_bind_pipeline(cb, bind_point, pipeline),
                Command::BindVertexBuffer {
                    binding,
                    buffer,
                    offset,
                } => device.cmd_bind_vertex_buffers(cb, binding, &[buffer], &[offset]),
                Command::BindIndexBuffer {
                    buffer,
                    offset,
                    index_type,
                } => device.cmd_bind_index_buffer(cb, buffer, offset, index_type),
                Command::BindDescriptorSet {
                    bind_point,
                    layout,
                    set_index,
                    set,
                } => device.cmd_bind_descriptor_sets(cb, bind_point, layout, set_index, &[set], &[]),
                Command::SetViewport(viewport) => device.cmd_set_viewport(cb, 0, &[viewport]),
                Command::SetScissor(scissor) => device.cmd_set_scissor(cb, 0, &[scissor]),
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => device.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => device.cmd_draw_indexed(
                    cb,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                ),
                Command::CopyBuffer { src, dst, regions } => {
                    device.cmd_copy_buffer(cb, src, dst, regions)
                }
                Command::CopyBufferToImage { src, dst, extent } => {
                    let region = vk::BufferImageCopy::default()
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .image_extent(vk::Extent3D {
                            width: extent.width,
                            height: extent.height,
                            depth: 1,
                        });
                    device.cmd_copy_buffer_to_image(
                        cb,
                        src,
                        dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                Command::ImageBarrier(transition) => {
                    let barrier = vk::ImageMemoryBarrier::default()
                        .old_layout(transition.old_layout)
                        .new_layout(transition.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(transition.image)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: transition.aspect,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .src_access_mask(transition.src_access)
                        .dst_access_mask(transition.dst_access);
                    device.cmd_pipeline_barrier(
                        cb,
                        transition.src_stage,
                        transition.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
        }
    }

    // =========================================================================
    // Queue
    // =========================================================================

    fn queue_submit(&self, submission: &Submission) -> RhiResult<()> {
        let command_buffers = [submission.command_buffer];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal_semaphores: Vec<_> = submission.signal.into_iter().collect();

        let info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        let queue = lock(&self.queue);
        unsafe { self.device.queue_submit(*queue, &[info], submission.fence)? };
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<(u32, SurfaceStatus)> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, signal, vk::Fence::null())
        };
        surface_status(result, 0)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<SurfaceStatus> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = lock(&self.queue);
        let result = unsafe { self.swapchain_loader.queue_present(*queue, &info) };
        surface_status(result.map(|suboptimal| ((), suboptimal)), ()).map(|(_, status)| status)
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    // =========================================================================
    // Surface and swapchain
    // =========================================================================

    fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        let pd = self.physical.device;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(pd, self.surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(pd, self.surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(pd, self.surface)?,
            })
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        Ok(unsafe { self.swapchain_loader.create_swapchain(&info, None)? })
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    // =========================================================================
    // Memory-backed objects
    // =========================================================================

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(desc.name, requirements, desc.location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(e.into());
        }

        lock(&self.buffer_memory).insert(buffer, allocation);
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut memory = lock(&self.buffer_memory);
        let allocation = memory
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("buffer {:?}", buffer)))?;
        let mapped = allocation
            .mapped_slice_mut()
            .ok_or_else(|| RhiError::InvalidState("buffer memory is not host visible".into()))?;

        let range = write_range(offset, data.len(), mapped.len()).ok_or_else(|| {
            RhiError::InvalidState(format!(
                "write of {} bytes at {} overflows mapping of {}",
                data.len(),
                offset,
                mapped.len()
            ))
        })?;
        mapped[range].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let allocation = lock(&self.buffer_memory).remove(&buffer);
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = allocation {
            self.free(allocation);
        }
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<vk::Image> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(desc.name, requirements, MemoryLocation::GpuOnly, false)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(e.into());
        }

        lock(&self.image_memory).insert(image, allocation);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        let allocation = lock(&self.image_memory).remove(&image);
        unsafe { self.device.destroy_image(image, None) };
        if let Some(allocation) = allocation {
            self.free(allocation);
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> RhiResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(desc.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        Ok(unsafe { self.device.create_image_view(&info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    // =========================================================================
    // State objects
    // =========================================================================

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        let anisotropy = desc
            .max_anisotropy
            .filter(|_| self.physical.supports_anisotropy())
            .map(|requested| requested.min(self.physical.max_anisotropy()));

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        Ok(unsafe { self.device.create_sampler(&info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        Ok(unsafe { self.device.create_shader_module(&info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        let mut attachments = vec![
            vk::AttachmentDescription::default()
                .format(desc.color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(desc.color_final_layout),
        ];
        if let Some(depth_format) = desc.depth_format {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(depth_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if desc.depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        Ok(unsafe { self.device.create_render_pass(&info, None)? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(desc.render_pass)
            .attachments(desc.attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        Ok(unsafe { self.device.create_framebuffer(&info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    // =========================================================================
    // Descriptors
    // =========================================================================

    fn create_descriptor_pool(
        &self,
        desc: &DescriptorPoolDesc<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(desc.max_sets)
            .pool_sizes(desc.pool_sizes);
        Ok(unsafe { self.device.create_descriptor_pool(&info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info)? };
        first(sets, "descriptor set")
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(pool, &[set]) } {
            error!("Failed to free descriptor set: {}", e);
        }
    }

    fn write_image_sampler(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            let leaked_buffers: Vec<_> = lock(&self.buffer_memory).drain().collect();
            let leaked_images: Vec<_> = lock(&self.image_memory).drain().collect();
            if !leaked_buffers.is_empty() || !leaked_images.is_empty() {
                error!(
                    "Device dropped with {} buffers and {} images still alive",
                    leaked_buffers.len(),
                    leaked_images.len()
                );
            }
            for (buffer, allocation) in leaked_buffers {
                self.device.destroy_buffer(buffer, None);
                self.free(allocation);
            }
            for (image, allocation) in leaked_images {
                self.device.destroy_image(image, None);
                self.free(allocation);
            }

            // The allocator holds a device clone and must go first.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        debug!("Logical device and surface destroyed");
        // `instance` drops after this.
    }
}

// Safety: ash::Device and the extension loaders are Send + Sync; raw
// handles are plain integers; every piece of mutable state is behind a
// Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }

    #[test]
    fn test_out_of_date_is_a_status() {
        let result: ash::prelude::VkResult<(u32, bool)> = Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let (index, status) = surface_status(result, 0).unwrap();
        assert_eq!(index, 0);
        assert_eq!(status, SurfaceStatus::OutOfDate);
    }

    #[test]
    fn test_suboptimal_flag_is_a_status() {
        let (index, status) = surface_status(Ok((2u32, true)), 0).unwrap();
        assert_eq!(index, 2);
        assert_eq!(status, SurfaceStatus::Suboptimal);
    }

    #[test]
    fn test_device_lost_is_an_error() {
        let result: ash::prelude::VkResult<(u32, bool)> = Err(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            surface_status(result, 0),
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
    }
}

//! GPU buffers.
//!
//! This module handles vertex, index, uniform, storage and staging buffers.
//! Memory is bound by the backend (gpu-allocator on Vulkan); a [`Buffer`]
//! is a shared resource that returns its memory when the last holder,
//! command buffers included, releases it.
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used and where its memory lives
//! - [`Buffer`] wraps the backend buffer handle
//!
//! Device-local buffers (vertex, index, storage) are filled through a
//! staging copy, see [`TransferContext`](crate::transfer::TransferContext).
//! Host-visible ones (uniform, staging) can be written directly.
//!
//! # Example
//!
//! ```no_run
//! use strand_rhi::buffer::{Buffer, BufferUsage};
//! use strand_rhi::BackendRef;
//!
//! # fn example(backend: BackendRef) -> strand_rhi::RhiResult<()> {
//! let params: [f32; 4] = [1.0, 0.5, 0.25, 1.0];
//! let uniforms = Buffer::with_data(
//!     backend,
//!     BufferUsage::Uniform,
//!     bytemuck::cast_slice(&params),
//! )?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::backend::{BackendRef, BufferDesc};
use crate::error::{RhiError, RhiResult};
use crate::resource::{Resource, ResourceKind, Shared};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which selects Vulkan usage
/// flags and the memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
    /// Storage buffer - general-purpose GPU storage
    Storage,
    /// Staging buffer - CPU-writable source for uploads
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            // Filled once through staging, read by the GPU every frame
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            // Updated by the CPU every frame
            BufferUsage::Uniform => MemoryLocation::CpuToGpu,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether the CPU can write the buffer directly.
    pub fn is_host_visible(self) -> bool {
        self.memory_location() != MemoryLocation::GpuOnly
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer resource.
pub struct Buffer {
    backend: BackendRef,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a new buffer with the specified size.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer or its memory cannot be created.
    pub fn new(
        backend: BackendRef,
        size: vk::DeviceSize,
        usage: BufferUsage,
    ) -> RhiResult<Shared<Self>> {
        let buffer = backend.create_buffer(&BufferDesc {
            name: usage.name(),
            size,
            usage: usage.to_vk_usage(),
            location: usage.memory_location(),
        })?;

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Shared::new(Self {
            backend,
            buffer,
            size,
            usage,
        }))
    }

    /// Creates a host-visible buffer and fills it with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error for device-local usages, which need a staging copy.
    pub fn with_data(
        backend: BackendRef,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Shared<Self>> {
        let buffer = Self::new(backend, data.len() as vk::DeviceSize, usage)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Writes `data` at `offset` in a host-visible buffer.
    ///
    /// A buffer used by a recording that may still execute must not be
    /// written; callers rotate per-frame buffers instead.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if !self.usage.is_host_visible() {
            return Err(RhiError::InvalidState(format!(
                "{} buffer is not host visible",
                self.usage.name()
            )));
        }
        let end = offset.checked_add(data.len() as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::InvalidState(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }
        self.backend.write_buffer(self.buffer, offset, data)
    }

    /// Writes one plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, value: &T) -> RhiResult<()> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Resource for Buffer {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.buffer);
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceBackend;
    use crate::mock::{MockBackend, ObjectKind};

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Vertex.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert!(BufferUsage::Uniform.is_host_visible());
        assert!(!BufferUsage::Index.is_host_visible());
    }

    #[test]
    fn test_with_data_writes_contents() {
        let mock = MockBackend::new();
        let buffer = Buffer::with_data(mock.backend(), BufferUsage::Staging, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            mock.buffer_contents(buffer.handle()),
            Some(vec![1, 2, 3, 4])
        );
    }

    #[test]
    fn test_write_pod() {
        let mock = MockBackend::new();
        let buffer = Buffer::new(mock.backend(), 8, BufferUsage::Uniform).unwrap();
        buffer.write_pod(4, &0x0403_0201u32).unwrap();
        assert_eq!(
            mock.buffer_contents(buffer.handle()),
            Some(vec![0, 0, 0, 0, 1, 2, 3, 4])
        );
    }

    #[test]
    fn test_device_local_write_rejected() {
        let mock = MockBackend::new();
        let buffer = Buffer::new(mock.backend(), 16, BufferUsage::Vertex).unwrap();
        assert!(buffer.write(0, &[0; 4]).is_err());
    }

    #[test]
    fn test_out_of_bounds_write_rejected() {
        let mock = MockBackend::new();
        let buffer = Buffer::new(mock.backend(), 4, BufferUsage::Uniform).unwrap();
        assert!(buffer.write(2, &[0; 4]).is_err());
    }

    #[test]
    fn test_write_at_huge_offset_rejected() {
        let mock = MockBackend::new();
        let buffer = Buffer::new(mock.backend(), 4, BufferUsage::Uniform).unwrap();
        assert!(matches!(
            buffer.write(u64::MAX - 1, &[0; 4]),
            Err(RhiError::InvalidState(_))
        ));
        // The backend checks the range on its own as well.
        assert!(matches!(
            mock.backend().write_buffer(buffer.handle(), u64::MAX, &[0; 4]),
            Err(RhiError::InvalidState(_))
        ));
        assert_eq!(mock.buffer_contents(buffer.handle()), Some(vec![0; 4]));
    }

    #[test]
    fn test_last_release_destroys() {
        let mock = MockBackend::new();
        let buffer = Buffer::new(mock.backend(), 16, BufferUsage::Uniform).unwrap();
        let other = buffer.acquire();
        buffer.release();
        assert_eq!(mock.live(ObjectKind::Buffer), 1);
        other.release();
        assert_eq!(mock.live(ObjectKind::Buffer), 0);
        assert_eq!(mock.destroyed(ObjectKind::Buffer), 1);
    }
}

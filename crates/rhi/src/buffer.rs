//! GPU buffers backed by gpu-allocator.
//!
//! This module handles vertex, index, uniform and staging buffers. It uses
//! gpu-allocator for memory management and exposes bounds-checked host
//! reads and writes.
//!
//! # Overview
//!
//! - [`BufferUsage`] picks the Vulkan usage flags and the allocation name
//! - [`Buffer`] wraps a `VkBuffer` and its persistently mapped allocation
//!
//! Every buffer lives in host-visible memory. Uniforms are rewritten every
//! frame, meshes are written once at load, and staging buffers feed
//! texture uploads. None of the host accessors synchronize with the GPU;
//! callers wait on the owning frame's fence first.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra_rhi::buffer::{Buffer, BufferUsage};
//! use umbra_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let uniform = Buffer::new(device, BufferUsage::Uniform, 192)?;
//! uniform.write_data(0, &[0u8; 192])?;
//! assert_eq!(uniform.read_data()?.len(), 192);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Intended use of a buffer.
///
/// Decides the Vulkan usage flags and the allocation's debug name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex data, written once at load.
    Vertex,
    /// 32-bit indices, written once at load.
    Index,
    /// Shader uniforms, rewritten per frame slot.
    Uniform,
    /// Upload source for image copies.
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// All usages are CPU-written, so all live in mappable memory.
    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// GPU buffer wrapper with mapped, allocator-managed memory.
///
/// The allocation is freed through the device allocator on drop, before the
/// buffer handle is destroyed.
///
/// # Thread Safety
///
/// Host writes take `&self` and copy straight into mapped memory. Two
/// threads writing overlapping ranges race; synchronize externally when
/// sharing a buffer.
pub struct Buffer {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan buffer handle.
    buffer: vk::Buffer,
    /// GPU memory allocation; taken on drop.
    allocation: Option<Allocation>,
    /// Buffer size in bytes.
    size: vk::DeviceSize,
    /// Buffer usage type.
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a mapped buffer of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `usage` - The intended buffer usage
    /// * `size` - Buffer size in bytes
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a zero size, or the Vulkan /
    /// allocator error if creation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be greater than 0".into(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.name(),
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer ({} bytes)", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Creates a buffer sized to `data` and fills it.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `usage` - The intended buffer usage
    /// * `data` - Initial contents; also sets the size
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is empty or creation fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use umbra_rhi::buffer::{Buffer, BufferUsage};
    /// # use umbra_rhi::device::Device;
    /// # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
    /// let indices: Vec<u8> = [0u32, 1, 2].iter().flat_map(|i| i.to_ne_bytes()).collect();
    /// let buffer = Buffer::new_with_data(device, BufferUsage::Index, &indices)?;
    /// assert_eq!(buffer.size(), 12);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Host copy into the mapped memory. No GPU synchronization happens here.
    ///
    /// # Arguments
    ///
    /// * `offset` - Byte offset into the buffer
    /// * `data` - Bytes to copy; an empty slice is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if the range exceeds the buffer or
    /// the memory is not mapped.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }
        let mapped = self.mapped_ptr()?;
        // SAFETY: the range was bounds-checked above and the mapping lives as
        // long as the allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Copies the whole buffer back to the host.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if the memory is not mapped.
    pub fn read_data(&self) -> RhiResult<Vec<u8>> {
        let mapped = self.mapped_ptr()?;
        let mut out = vec![0u8; self.size as usize];
        // SAFETY: the mapping covers `size` bytes for the life of the allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(mapped, out.as_mut_ptr(), out.len());
        }
        Ok(out)
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.as_ptr().cast::<u8>())
            .ok_or_else(|| RhiError::InvalidHandle("buffer memory is not mapped".into()))
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer memory: {e}", self.usage.name());
                    }
                }
                Err(e) => error!("Leaking {} buffer memory: {e}", self.usage.name()),
            }
        }
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags() {
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn every_usage_is_host_visible() {
        for usage in [
            BufferUsage::Vertex,
            BufferUsage::Index,
            BufferUsage::Uniform,
            BufferUsage::Staging,
        ] {
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        }
    }
}

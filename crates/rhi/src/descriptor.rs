//! Descriptor set layouts, pools and writes.
//!
//! This module provides:
//! - [`DescriptorSetLayout`] describing the bindings of one set
//! - [`DescriptorPool`] allocating sets at a fixed capacity
//! - [`write_uniform_buffer`] and [`write_combined_image`] for updates
//!
//! # Overview
//!
//! Only the two descriptor kinds the engine binds are wrapped: uniform
//! buffers and combined image samplers. Pools are sized once from the
//! exact demand of the loaded scene, so allocation failing at runtime
//! means that demand was computed wrong.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use umbra_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
//! use umbra_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
//! let layout = DescriptorSetLayout::new(device.clone(), &[binding])?;
//! let pool = DescriptorPool::new(
//!     device,
//!     4,
//!     &[vk::DescriptorPoolSize::default()
//!         .ty(vk::DescriptorType::UNIFORM_BUFFER)
//!         .descriptor_count(4)],
//! )?;
//! let set = pool.allocate_one(layout.handle())?;
//! # let _ = set;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Descriptor set layout wrapper.
///
/// Specifies the binding points, descriptor types and shader stages of one
/// set. Pipeline layouts and allocated sets must be dropped first.
///
/// # Thread Safety
///
/// Immutable after creation and can be shared between threads.
pub struct DescriptorSetLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
    /// Number of bindings in the layout.
    binding_count: usize,
}

impl DescriptorSetLayout {
    /// Creates a layout from `bindings`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `bindings` - One entry per binding, e.g. from
    ///   [`DescriptorBindingBuilder`]
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        debug!("Created descriptor set layout ({} bindings)", bindings.len());
        Ok(Self {
            device,
            layout,
            binding_count: bindings.len(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn binding_count(&self) -> usize {
        self.binding_count
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Fixed-capacity descriptor pool. Sets are never freed individually; the
/// whole pool is released at teardown.
///
/// # Thread Safety
///
/// Vulkan descriptor pools are externally synchronized. Allocate from one
/// thread at a time.
pub struct DescriptorPool {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan descriptor pool handle.
    pool: vk::DescriptorPool,
    /// Maximum number of sets the pool can hand out.
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool for `max_sets` sets drawing on `pool_sizes`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `max_sets` - Set capacity
    /// * `pool_sizes` - Descriptor capacity per type
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for an empty request, or an error
    /// if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        if max_sets == 0 || pool_sizes.is_empty() {
            return Err(RhiError::InvalidHandle(
                "descriptor pool needs at least one set and one pool size".into(),
            ));
        }
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!(
            "Created descriptor pool (max_sets={}, {} pool size(s))",
            max_sets,
            pool_sizes.len()
        );
        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates a single set with `layout`.
    ///
    /// # Errors
    ///
    /// Returns `ERROR_OUT_OF_POOL_MEMORY` (as [`RhiError::VulkanError`])
    /// once the capacity is used up.
    pub fn allocate_one(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("driver returned no descriptor set".into()))
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Points `binding` of `set` at a whole uniform buffer.
///
/// # Arguments
///
/// * `device` - The logical device
/// * `set` - Set to update; must not be bound in a pending submission
/// * `binding` - A uniform-buffer binding of the set's layout
/// * `buffer` - Buffer to bind from offset 0
/// * `range` - Bytes visible to the shader
pub fn write_uniform_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let info = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&info);
    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Points `binding` of `set` at an image view and sampler.
///
/// # Arguments
///
/// * `device` - The logical device
/// * `set` - Set to update; must not be bound in a pending submission
/// * `binding` - A combined-image-sampler binding of the set's layout
/// * `view` - 2D or cube view matching the shader's sampler type
/// * `sampler` - Sampler to pair with the view
/// * `layout` - Layout the image will be in when sampled
pub fn write_combined_image(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
    layout: vk::ImageLayout,
) {
    let info = [vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(view)
        .image_layout(layout)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&info);
    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Shorthands for single-descriptor layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    /// One uniform buffer at `binding`, visible to `stage_flags`.
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// One combined image sampler at `binding`, visible to `stage_flags`.
    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_buffer_binding() {
        let binding = DescriptorBindingBuilder::uniform_buffer(3, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 3);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn combined_image_sampler_binding() {
        let binding =
            DescriptorBindingBuilder::combined_image_sampler(8, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(binding.binding, 8);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }
}

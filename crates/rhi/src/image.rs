//! Device-local images: depth targets, sampled textures and cubemaps.
//!
//! # Overview
//!
//! - [`Image::depth_attachment`] backs both the main pass depth test and the
//!   shadow map; the shadow variant is created with `SAMPLED` usage so the
//!   main pass can read it.
//! - [`Image::texture_rgba8`] uploads a 2D texture through a staging buffer.
//! - [`Image::texture_cube_rgba8`] uploads six faces into a
//!   `CUBE_COMPATIBLE` image with a cube view.
//!
//! Uploaded textures are left in `SHADER_READ_ONLY_OPTIMAL`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra_rhi::command::CommandPool;
//! use umbra_rhi::device::Device;
//! use umbra_rhi::image::Image;
//!
//! # fn example(device: Arc<Device>, upload_pool: &CommandPool) -> umbra_rhi::RhiResult<()> {
//! // Six 1x1 faces, +X first.
//! let faces = [255u8; 4 * 6];
//! let sky = Image::texture_cube_rgba8(device, upload_pool, 1, &faces)?;
//! # let _ = sky;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Array layers of a cube image, one per face.
pub const CUBE_LAYERS: u32 = 6;

/// Picks the first candidate depth format usable as an optimal-tiling depth
/// attachment that can also be sampled.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedFormat`] if no candidate qualifies.
pub fn find_depth_format(device: &Device) -> RhiResult<vk::Format> {
    let required = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        | vk::FormatFeatureFlags::SAMPLED_IMAGE;
    DEPTH_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|&format| {
            device
                .format_properties(format)
                .optimal_tiling_features
                .contains(required)
        })
        .ok_or(RhiError::UnsupportedFormat(
            "no sampleable depth format available".into(),
        ))
}

#[inline]
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Layer arrangement of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageShape {
    /// One layer, 2D view.
    Flat,
    /// Six layers, cube view.
    Cube,
}

impl ImageShape {
    fn layers(self) -> u32 {
        match self {
            ImageShape::Flat => 1,
            ImageShape::Cube => CUBE_LAYERS,
        }
    }

    fn create_flags(self) -> vk::ImageCreateFlags {
        match self {
            ImageShape::Flat => vk::ImageCreateFlags::empty(),
            ImageShape::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
        }
    }

    fn view_type(self) -> vk::ImageViewType {
        match self {
            ImageShape::Flat => vk::ImageViewType::TYPE_2D,
            ImageShape::Cube => vk::ImageViewType::CUBE,
        }
    }
}

/// A device-local image, its view and its memory.
///
/// The view covers every layer, so a cube image is sampled through a
/// `samplerCube`. Memory is freed through the device allocator on drop.
///
/// # Thread Safety
///
/// Immutable after creation. Layout transitions happen inside the
/// constructors; later transitions are recorded by the caller.
pub struct Image {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// View over every layer.
    view: vk::ImageView,
    /// GPU memory allocation; taken on drop.
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    shape: ImageShape,
    /// Debug name used in allocations and logs.
    name: &'static str,
}

impl Image {
    /// Creates a depth attachment.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `extent` - Width and height of the attachment
    /// * `format` - A depth format from [`find_depth_format`]
    /// * `sampled` - Adds shader-read usage, for shadow maps
    ///
    /// # Errors
    ///
    /// Returns an error if image creation, allocation or view creation fails.
    pub fn depth_attachment(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        sampled: bool,
    ) -> RhiResult<Self> {
        let mut usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        if sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        let name = if sampled { "shadow depth" } else { "depth" };
        Self::new(
            device,
            extent,
            format,
            usage,
            vk::ImageAspectFlags::DEPTH,
            ImageShape::Flat,
            name,
        )
    }

    /// Uploads tightly packed RGBA8 `pixels` into a sampled 2D texture.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `upload_pool` - Pool the one-time upload commands are recorded from
    /// * `width`, `height` - Texture dimensions
    /// * `pixels` - `width * height * 4` bytes, top row first
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if `pixels` does not hold exactly
    /// `width * height * 4` bytes, or any error from creation or upload.
    pub fn texture_rgba8(
        device: Arc<Device>,
        upload_pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        Self::upload_rgba8(
            device,
            upload_pool,
            vk::Extent2D { width, height },
            ImageShape::Flat,
            pixels,
        )
    }

    /// Uploads six square RGBA8 faces into a cube texture.
    ///
    /// Faces are stored back to back in layer order +X, -X, +Y, -Y, +Z, -Z.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `upload_pool` - Pool the one-time upload commands are recorded from
    /// * `size` - Edge length of every face
    /// * `pixels` - `size * size * 4 * 6` bytes
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] on a size mismatch, or any error
    /// from creation or upload.
    pub fn texture_cube_rgba8(
        device: Arc<Device>,
        upload_pool: &CommandPool,
        size: u32,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        Self::upload_rgba8(
            device,
            upload_pool,
            vk::Extent2D {
                width: size,
                height: size,
            },
            ImageShape::Cube,
            pixels,
        )
    }

    fn upload_rgba8(
        device: Arc<Device>,
        upload_pool: &CommandPool,
        extent: vk::Extent2D,
        shape: ImageShape,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let layers = shape.layers();
        let expected = rgba8_size(extent, layers);
        if extent.width == 0 || extent.height == 0 || pixels.len() != expected {
            return Err(RhiError::InvalidHandle(format!(
                "texture {}x{}x{} needs {} bytes, got {}",
                extent.width,
                extent.height,
                layers,
                expected,
                pixels.len()
            )));
        }

        let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, pixels)?;
        let image = Self::new(
            device,
            extent,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
            shape,
            match shape {
                ImageShape::Flat => "texture",
                ImageShape::Cube => "cubemap",
            },
        )?;

        upload_pool.one_time_submit(|cmd| {
            cmd.image_barrier(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                image.layout_barrier(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            );
            // Layers follow each other in the staging buffer, so one region
            // covers them all.
            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_array_layer(0)
                        .layer_count(layers),
                )
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            cmd.copy_buffer_to_image(staging.handle(), image.image, region);
            cmd.image_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                image.layout_barrier(
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::SHADER_READ,
                ),
            );
        })?;

        debug!(
            "Uploaded {}x{} RGBA8 {}",
            extent.width, extent.height, image.name
        );
        Ok(image)
    }

    fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        shape: ImageShape,
        name: &'static str,
    ) -> RhiResult<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .flags(shape.create_flags())
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(shape.layers())
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
            shape,
            name,
        };
        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(shape.view_type())
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(shape.layers()),
            );
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} image {}x{} ({:?})",
            name, extent.width, extent.height, format
        );
        Ok(this)
    }

    fn layout_barrier(
        &self,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(self.shape.layers()),
            )
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the view over every layer.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns `true` for six-layer cube images.
    #[inline]
    pub fn is_cube(&self) -> bool {
        self.shape == ImageShape::Cube
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} image memory: {e}", self.name);
                    }
                }
                Err(e) => error!("Leaking {} image memory: {e}", self.name),
            }
        }
        debug!(
            "Destroyed {} image {}x{}",
            self.name, self.extent.width, self.extent.height
        );
    }
}

/// Bytes of `layers` tightly packed RGBA8 layers of `extent`.
fn rgba8_size(extent: vk::Extent2D, layers: u32) -> usize {
    extent.width as usize * extent.height as usize * 4 * layers as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stencil_detection() {
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_depth_candidates_prefer_pure_depth() {
        assert_eq!(DEPTH_FORMAT_CANDIDATES[0], vk::Format::D32_SFLOAT);
    }

    #[test]
    fn cube_images_are_six_layer_cube_compatible() {
        let cube = ImageShape::Cube;
        assert_eq!(cube.layers(), 6);
        assert!(cube.create_flags().contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(cube.view_type(), vk::ImageViewType::CUBE);

        let flat = ImageShape::Flat;
        assert_eq!(flat.layers(), 1);
        assert!(flat.create_flags().is_empty());
        assert_eq!(flat.view_type(), vk::ImageViewType::TYPE_2D);
    }

    #[test]
    fn upload_sizes_cover_every_layer() {
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        assert_eq!(rgba8_size(extent, 1), 64);
        assert_eq!(rgba8_size(extent, CUBE_LAYERS), 384);
    }
}

//! Swapchain creation, acquisition and presentation.
//!
//! Acquire and present report surface staleness as values
//! ([`AcquiredImage::OutOfDate`], [`PresentStatus::Suboptimal`], ...)
//! instead of errors, so the frame loop can recover without unwinding.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use umbra_rhi::swapchain::{AcquiredImage, Swapchain};
//!
//! # fn example(
//! #     swapchain: &Swapchain,
//! #     queue: ash::vk::Queue,
//! #     available: ash::vk::Semaphore,
//! #     finished: ash::vk::Semaphore,
//! # ) -> umbra_rhi::RhiResult<()> {
//! match swapchain.acquire_next_image(available, Duration::from_secs(1))? {
//!     AcquiredImage::Ready { index, .. } => {
//!         // record and submit, signalling `finished`
//!         if swapchain.present(queue, index, finished)?.is_stale() {
//!             // recreate before the next frame
//!         }
//!     }
//!     AcquiredImage::OutOfDate => { /* recreate */ }
//!     AcquiredImage::Timeout => {}
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Surface capabilities, formats and present modes for one GPU.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count and extent limits.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries what `physical_device` supports for `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three surface queries fails.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };
        debug!(
            "Surface support: {} formats, {} present modes, min images {}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count
        );
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True when at least one format and one present mode exist.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquiredImage {
    Ready { index: u32, suboptimal: bool },
    /// The surface changed; the swapchain must be rebuilt before use.
    OutOfDate,
    /// No image became available within the timeout.
    Timeout,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented and the swapchain still matches the surface.
    Optimal,
    /// Presented, but the swapchain should be rebuilt.
    Suboptimal,
    /// Not presented; the swapchain must be rebuilt.
    OutOfDate,
}

impl PresentStatus {
    /// True unless the swapchain still matches the surface exactly.
    #[inline]
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

/// Presentable images for one surface, with a color view per image.
///
/// # Thread Safety
///
/// Acquire and present must be externally synchronized; only the frame
/// loop thread calls them.
pub struct Swapchain {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Swapchain extension function table.
    loader: ash::khr::swapchain::Device,
    /// Vulkan swapchain handle, null before the first build.
    swapchain: vk::SwapchainKHR,
    /// Images owned by the presentation engine.
    images: Vec<vk::Image>,
    /// One view per image, destroyed with the swapchain.
    image_views: Vec<vk::ImageView>,
    /// Chosen surface format.
    format: vk::Format,
    /// Chosen image extent.
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the surface was created on
    /// * `device` - The logical device
    /// * `surface` - Target surface
    /// * `requested` - Window size, used when the surface leaves the extent
    ///   up to the application
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface offers no format or
    /// present mode, or the Vulkan error if creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
        };
        swapchain.build(instance, surface, requested)?;
        Ok(swapchain)
    }

    /// Rebuilds for a new surface size. The caller must have drained all
    /// in-flight work that references the old images.
    ///
    /// # Errors
    ///
    /// Same as [`Swapchain::new`].
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
    ) -> RhiResult<()> {
        info!(
            "Recreating swapchain for {}x{}",
            requested.width, requested.height
        );
        self.build(instance, surface, requested)
    }

    fn build(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
    ) -> RhiResult<()> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let support =
            SurfaceSupport::query(self.device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".into(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = determine_image_count(&support.capabilities);

        let families = self.device.queue_families();
        let (Some(graphics_family), Some(present_family)) =
            (families.graphics_family, families.present_family)
        else {
            return Err(RhiError::SwapchainError(
                "device has no graphics/present queue family".into(),
            ));
        };
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, surface_format.format)?;
        self.format = surface_format.format;
        self.extent = extent;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Acquires the next presentable image, signalling `semaphore` when it
    /// is ready for rendering.
    ///
    /// # Errors
    ///
    /// Staleness and timeouts are values; only other failures are errors.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquiredImage> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe {
            self.loader
                .acquire_next_image(self.swapchain, nanos, semaphore, vk::Fence::null())
        } {
            Ok((index, suboptimal)) => Ok(AcquiredImage::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquiredImage::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// # Errors
    ///
    /// Staleness is a value; only other failures are errors.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Chosen surface format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Current image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of presentable images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// One color view per image, in image-index order.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let srgb = |format: vk::Format| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    };
    if let Some(format) = srgb(vk::Format::B8G8R8A8_SRGB) {
        return format;
    }
    if let Some(format) = srgb(vk::Format::B8G8R8A8_UNORM) {
        warn!("Falling back to B8G8R8A8_UNORM surface format");
        return format;
    }
    let first = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format: {:?}", first.format);
    first
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // Always available.
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "failed to create swapchain image view: {e:?}"
                )));
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn test_choose_surface_format_first_available() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_choose_extent() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1280, 720),
            min_image_extent: extent(64, 64),
            max_image_extent: extent(2048, 2048),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(10, 10)), extent(1280, 720));

        // Window-manager-defined size: clamp the request.
        capabilities.current_extent = extent(u32::MAX, u32::MAX);
        assert_eq!(choose_extent(&capabilities, extent(10, 4000)), extent(64, 2048));
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&bounded), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded), 4);
    }

    #[test]
    fn test_present_status_staleness() {
        assert!(!PresentStatus::Optimal.is_stale());
        assert!(PresentStatus::Suboptimal.is_stale());
        assert!(PresentStatus::OutOfDate.is_stale());
    }
}

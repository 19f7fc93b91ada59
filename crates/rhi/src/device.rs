//! Vulkan logical device and queue ownership.
//!
//! [`Device`] is the engine's table of long-lived GPU handles: the logical
//! device, the graphics and present queues, the queue family indices and the
//! memory allocator. It performs no rendering logic of its own; every other
//! RHI object holds an `Arc<Device>` and borrows these handles from it.
//!
//! # Example
//!
//! ```no_run
//! use umbra_rhi::device::Device;
//! use umbra_rhi::instance::Instance;
//! use umbra_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("instance");
//! let surface = vk::SurfaceKHR::null();
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader).expect("gpu");
//! let device = Device::new(&instance, &gpu).expect("device");
//! device.wait_idle().expect("idle");
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};

/// Logical device, queues and allocator.
///
/// Always handed out as `Arc<Device>`; the device is destroyed when the
/// last RHI object holding it is dropped.
///
/// # Thread Safety
///
/// `Send + Sync`. The allocator is behind a mutex. Queue submission is
/// externally synchronized in Vulkan, so only the thread driving the frame
/// loop submits.
pub struct Device {
    /// Loaded device function table.
    device: ash::Device,
    /// GPU the device was created on.
    physical_device: vk::PhysicalDevice,
    /// Cached properties, including sampler limits.
    properties: vk::PhysicalDeviceProperties,
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Queue for rendering and uploads.
    graphics_queue: vk::Queue,
    /// Queue for presentation; may equal `graphics_queue`.
    present_queue: vk::Queue,
    /// Families the queues were taken from.
    queue_families: QueueFamilyIndices,
    /// Needed for format queries after creation.
    instance: ash::Instance,
}

impl Device {
    /// Creates the logical device, retrieves its queues and initializes the allocator.
    ///
    /// Enables sampler anisotropy and the swapchain extension.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `gpu` - A GPU picked by
    ///   [`select_physical_device`](crate::physical_device::select_physical_device)
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails,
    /// or if the physical device info lacks a graphics/present family.
    pub fn new(instance: &Instance, gpu: &PhysicalDeviceInfo) -> Result<Arc<Self>, RhiError> {
        let families = gpu.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (families.graphics_family, families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
        let extension_names: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(gpu.device, &create_info, None)?
        };
        info!(
            "Logical device created ({} queue famil{})",
            queue_infos.len(),
            if queue_infos.len() == 1 { "y" } else { "ies" }
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!("Queues retrieved: graphics={graphics_family}, present={present_family}");

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: gpu.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };
        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: gpu.device,
            properties: gpu.properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families: families,
            instance: instance.handle().clone(),
        }))
    }

    /// Returns the loaded device function table.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Locks the memory allocator.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if a previous holder panicked.
    pub fn allocator(&self) -> Result<MutexGuard<'_, Allocator>, RhiError> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::InvalidHandle("allocator mutex poisoned".into()))
    }

    /// Format properties for `format` on this GPU.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Blocks until every queue is idle.
    ///
    /// # Errors
    ///
    /// Returns an error on device loss.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits work to the graphics queue.
    ///
    /// # Arguments
    ///
    /// * `submits` - Batches with their wait and signal semaphores
    /// * `fence` - Signaled when every batch retires, or null
    ///
    /// # Errors
    ///
    /// Returns an error if the queue rejects the submission.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded, and `fence` must be unsignaled
    /// and not associated with another pending submission. Every resource
    /// the buffers reference must stay alive until `fence` signals, and no
    /// other thread may submit to the graphics queue concurrently.
    pub unsafe fn submit_graphics(
        &self,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe { self.device.queue_submit(self.graphics_queue, submits, fence)? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("device_wait_idle failed during drop: {e:?}");
            }
            // Frees the allocator's memory blocks while the device is still alive.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is Send + Sync, queue handles are plain handles that are
// only submitted to from the orchestrating thread, and the allocator sits
// behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}

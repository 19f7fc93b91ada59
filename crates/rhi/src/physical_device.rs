//! Physical device (GPU) selection.
//!
//! Candidates must expose a graphics queue, a queue that can present to the
//! target surface, the swapchain extension and sampler anisotropy. Among the
//! survivors discrete GPUs win, then the larger device-local heap.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Device extensions every candidate must support.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices used by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family with graphics support.
    pub graphics_family: Option<u32>,
    /// Family able to present to the target surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// True once both families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        families.extend(self.graphics_family);
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Information about the selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Name, type and limits.
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Complete queue families for the target surface.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Driver-reported device name.
    pub fn device_name(&self) -> String {
        // SAFETY: device_name is a null-terminated array filled by the driver.
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Human-readable device type for logs.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the best GPU able to render to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no device meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device(instance, device, surface, surface_loader))
        .max_by_key(rate_device);

    match best {
        Some(info) => {
            info!(
                "Selected GPU: '{}' ({})",
                info.device_name(),
                info.device_type_name()
            );
            Ok(info)
        }
        None => {
            warn!("No GPU satisfies the renderer's requirements");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn check_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let queue_families = find_queue_families(instance, device, surface, surface_loader);

    let info = PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    };

    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics/present queue", info.device_name());
        return None;
    }
    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{}' skipped: no sampler anisotropy", info.device_name());
        return None;
    }
    if !supports_extensions(instance, device) {
        debug!("GPU '{}' skipped: missing device extensions", info.device_name());
        return None;
    }

    Some(info)
}

fn supports_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(available) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    REQUIRED_DEVICE_EXTENSIONS.iter().all(|required| {
        available.iter().any(|ext| {
            // SAFETY: extension_name is a null-terminated array filled by the driver.
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == *required
        })
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }
        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        // Prefer one family doing both so submit and present share a queue.
        if graphics && present {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    let type_score: u64 = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    };
    let vram_mb = (info.device_local_memory() / (1024 * 1024)).min(1 << 20);
    (type_score << 32) | vram_mb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_families_deduplicates() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn incomplete_without_present() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: None,
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn swapchain_extension_is_required() {
        assert!(REQUIRED_DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }
}

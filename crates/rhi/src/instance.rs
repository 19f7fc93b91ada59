//! Vulkan instance management.
//!
//! [`Instance`] loads the Vulkan library, creates the `VkInstance` with the
//! surface extensions the window layer reports, and optionally installs the
//! Khronos validation layer with a debug messenger that forwards into
//! `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use umbra_rhi::instance::Instance;
//!
//! let surface_extensions: Vec<*const std::ffi::c_char> = Vec::new();
//! let instance = Instance::new(cfg!(debug_assertions), &surface_extensions)
//!     .expect("Failed to create Vulkan instance");
//! assert!(!instance.has_validation() || cfg!(debug_assertions));
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation support.
///
/// # Thread Safety
///
/// Read-only after creation. Must outlive every device and surface created
/// from it.
pub struct Instance {
    /// Loaded Vulkan library.
    entry: Entry,
    /// Instance function table.
    instance: ash::Instance,
    /// Debug utils loader, present when validation is on.
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Messenger forwarding validation output, present when validation is on.
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Request the Khronos validation layer and a debug messenger
    /// * `surface_extensions` - Extension names required to create a surface for the target window
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded or instance
    /// creation fails. A missing validation layer is logged, not fatal.
    pub fn new(
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not installed, continuing without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"umbra")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"umbra")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const c_char> = surface_extensions.to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let layers = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created ({} extension(s), validation: {})",
            extensions.len(),
            validation
        );

        let (debug_utils, debug_messenger) = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::create_debug_messenger(&loader)?;
            debug!("Debug messenger installed");
            (Some(loader), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the instance function table.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the loaded Vulkan library.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether the validation layer and debug messenger are active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool, RhiError> {
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(layers.iter().any(|layer| {
            // SAFETY: layer_name is a null-terminated array filled by the loader.
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER_NAME
        }))
    }

    fn create_debug_messenger(
        loader: &ash::ext::debug_utils::Instance,
    ) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        Ok(unsafe { loader.create_debug_utils_messenger(&create_info, None)? })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(loader), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Forwards validation messages into `tracing` by severity.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback data pointer for the duration of the call.
    let data = unsafe { &*callback_data };
    let message = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "umbra_rhi::vulkan", "[{kind}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "umbra_rhi::vulkan", "[{kind}] {message}");
    } else {
        debug!(target: "umbra_rhi::vulkan", "[{kind}] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_without_validation_or_no_driver() {
        match Instance::new(false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) => eprintln!("Skipping: Vulkan loader not present"),
            Err(RhiError::VulkanError(e)) => eprintln!("Skipping: no usable ICD ({e})"),
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
}

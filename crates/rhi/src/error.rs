//! RHI-specific error types.
//!
//! Every fallible RHI call returns [`RhiResult`]. Raw Vulkan, loader and
//! allocator errors convert with `?`; the string variants carry context the
//! raw codes lack.

use thiserror::Error;

/// Errors raised by the Vulkan abstraction layer.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No GPU satisfied the device requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface query or creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain creation error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle or argument (zero-sized buffer, out-of-range write)
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// No memory or depth format matched the request
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl RhiError {
    /// True when the error reports a surface that no longer matches the swapchain.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            RhiError::VulkanError(ash::vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn out_of_date_is_detected() {
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!RhiError::from(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!RhiError::NoSuitableGpu.is_out_of_date());
    }
}

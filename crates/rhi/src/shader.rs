//! SPIR-V shader modules.
//!
//! Material pipelines use one vertex and one fragment stage, both entered
//! at `main`. The shadow pipeline uses a vertex stage only.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use umbra_rhi::device::Device;
//! use umbra_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let vs = Shader::from_spirv_file(device, Path::new("shaders/skybox.vert.spv"), ShaderStage::Vertex)?;
//! let stage = vs.stage_create_info();
//! # let _ = stage;
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a module is compiled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Converts to the Vulkan stage flag.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Lowercase stage name for logs.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A compiled shader module plus the stage it is meant for.
///
/// Only needed until the pipelines using it are built.
///
/// # Thread Safety
///
/// Immutable after creation and can be shared between threads.
pub struct Shader {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
    /// Stage the module is entered from.
    stage: ShaderStage,
}

impl Shader {
    /// Loads a `.spv` file.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `path` - Compiled SPIR-V file
    /// * `stage` - Stage the module will be bound to
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the file cannot be read or is not
    /// valid SPIR-V, or the Vulkan error if module creation fails.
    pub fn from_spirv_file(device: Arc<Device>, path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("failed to read shader file {:?}: {}", path, e))
        })?;
        Self::from_spirv_bytes(device, &bytes, stage)
    }

    /// Creates a module from SPIR-V bytes already in memory.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if `bytes` is not a whole number of
    /// words or lacks the SPIR-V magic.
    pub fn from_spirv_bytes(device: Arc<Device>, bytes: &[u8], stage: ShaderStage) -> RhiResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| RhiError::ShaderError(format!("invalid SPIR-V: {}", e)))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };
        info!("Created {} shader module ({} words)", stage, code.len());
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for pipeline creation, entered at `main`.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_flags() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_truncated_spirv_is_rejected() {
        let bytes = [0x03u8, 0x02, 0x23];
        assert!(ash::util::read_spv(&mut Cursor::new(&bytes[..])).is_err());
    }
}

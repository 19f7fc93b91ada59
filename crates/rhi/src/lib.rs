//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Safe RAII wrappers over the `ash` handles the engine needs:
//! - Instance, physical device selection and logical device
//! - Swapchain acquire/present with staleness reported as values
//! - Render passes, framebuffers and graphics pipelines
//! - Host-visible buffers, depth images, sampled 2D textures and cubemaps
//! - Samplers per addressing kind
//! - Descriptor layouts, pools and writes
//! - Fences and semaphores

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;

//! Per-frame resource binding and synchronization.
//!
//! This crate turns a loaded scene into recorded frames:
//! - Per-frame uniform buffers, one per frame slot
//! - Material layouts, descriptor pools sized up front, and set writes
//! - A shadow depth pass whose maps feed the main pass
//! - Fence and semaphore handling for frames in flight
//! - Resize and stale-surface recovery
//!
//! The GPU sits behind [`GpuBackend`]. [`VulkanBackend`] drives a real
//! device; [`HeadlessBackend`] records everything in memory for tests.

pub mod assets;
pub mod backend;
pub mod binding_layout;
pub mod descriptor_composer;
pub mod engine;
pub mod frame_graph;
pub mod frame_sync;
pub mod headless;
pub mod light_uniforms;
pub mod material;
pub mod scene_graph;
pub mod shadow;
pub mod ubo;
pub mod uniform_store;
pub mod vulkan;

mod error;

pub use backend::{GpuBackend, PoolSizes, RenderCommand, ResourceRef};
pub use binding_layout::BindingLayout;
pub use engine::{Engine, FrameReport, FrameStatus};
pub use error::{RenderError, RenderResult};
pub use frame_sync::FramePhase;
pub use headless::{Hazard, HeadlessBackend, LiveObjects};
pub use material::MaterialState;
pub use vulkan::VulkanBackend;

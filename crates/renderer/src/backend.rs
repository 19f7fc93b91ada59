//! The GPU seam of the frame engine.
//!
//! Every component of the engine reaches the GPU through [`GpuBackend`].
//! Objects are named by small copyable [`slotmap`] keys, and per-frame
//! command streams are plain [`RenderCommand`] data that the backend
//! translates into its own command buffers.
//!
//! Two implementations live in this crate: [`VulkanBackend`](crate::vulkan::VulkanBackend)
//! over `umbra_rhi`, and [`HeadlessBackend`](crate::headless::HeadlessBackend),
//! a recording stand-in used by the tests.

use std::ops::{Add, AddAssign, Mul};
use std::path::PathBuf;
use std::time::Duration;

use slotmap::new_key_type;

use umbra_resources::{MeshData, TextureData};
use umbra_rhi::pipeline::{CullMode, DepthBias};
use umbra_rhi::vk;

use crate::binding_layout::DescriptorBindingSpec;
use crate::error::RenderResult;

new_key_type! {
    pub struct BufferKey;
    pub struct ImageKey;
    pub struct LayoutKey;
    pub struct PoolKey;
    pub struct SetKey;
    pub struct RenderPassKey;
    pub struct FramebufferKey;
    pub struct PipelineKey;
    pub struct FenceKey;
    pub struct SemaphoreKey;
    pub struct CommandBufferKey;
}

/// Immutable uploaded geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuMesh {
    pub vertex_buffer: BufferKey,
    pub index_buffer: BufferKey,
    pub index_count: u32,
}

/// A depth image together with the framebuffer that renders into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowTarget {
    pub image: ImageKey,
    pub framebuffer: FramebufferKey,
}

/// Descriptor counts by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSizes {
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
}

impl PoolSizes {
    pub const fn new(uniform_buffers: u32, combined_image_samplers: u32) -> Self {
        Self {
            uniform_buffers,
            combined_image_samplers,
        }
    }

    /// True when `self` fits inside `capacity` for every kind.
    pub fn fits_within(&self, capacity: &PoolSizes) -> bool {
        self.uniform_buffers <= capacity.uniform_buffers
            && self.combined_image_samplers <= capacity.combined_image_samplers
    }
}

impl Add for PoolSizes {
    type Output = PoolSizes;

    fn add(self, rhs: PoolSizes) -> PoolSizes {
        PoolSizes::new(
            self.uniform_buffers + rhs.uniform_buffers,
            self.combined_image_samplers + rhs.combined_image_samplers,
        )
    }
}

impl AddAssign for PoolSizes {
    fn add_assign(&mut self, rhs: PoolSizes) {
        *self = *self + rhs;
    }
}

impl Mul<u32> for PoolSizes {
    type Output = PoolSizes;

    fn mul(self, rhs: u32) -> PoolSizes {
        PoolSizes::new(
            self.uniform_buffers * rhs,
            self.combined_image_samplers * rhs,
        )
    }
}

/// What a descriptor binding points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceRef {
    UniformBuffer(BufferKey),
    /// Material texture, sampled with repeat addressing.
    Texture(ImageKey),
    /// Six-layer cube texture, sampled through a cube view clamped to edge.
    Cubemap(ImageKey),
    /// Shadow depth image in its read-only layout, clamped to edge.
    ShadowMap(ImageKey),
}

/// Pipeline creation parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub name: String,
    pub pass: RenderPassKey,
    pub vertex_shader: PathBuf,
    /// `None` for depth-only pipelines.
    pub fragment_shader: Option<PathBuf>,
    pub set_layout: LayoutKey,
    pub cull_mode: CullMode,
    pub depth_bias: Option<DepthBias>,
}

/// Color and depth clear values of a render pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    /// `None` for depth-only passes.
    pub color: Option<[f32; 4]>,
    pub depth: f32,
}

impl ClearValues {
    pub const fn depth_only() -> Self {
        Self {
            color: None,
            depth: 1.0,
        }
    }

    pub const fn color_and_depth(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            depth: 1.0,
        }
    }
}

/// Render target of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferTarget {
    Shadow(FramebufferKey),
    /// The framebuffer wrapping swap image `n`.
    Swapchain(u32),
}

/// Explicit synchronization recorded between passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Barrier {
    /// Depth writes to `image` finish before fragment shaders sample it.
    DepthWriteToShaderRead { image: ImageKey },
}

/// One recorded command. A frame is a `Vec<RenderCommand>`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderCommand {
    BeginRenderPass {
        pass: RenderPassKey,
        framebuffer: FramebufferTarget,
        extent: vk::Extent2D,
        clear: ClearValues,
    },
    EndRenderPass,
    BindPipeline(PipelineKey),
    BindDescriptorSet {
        pipeline: PipelineKey,
        set: SetKey,
    },
    BindMesh(GpuMesh),
    DrawIndexed {
        index_count: u32,
    },
    SetViewport(vk::Extent2D),
    SetScissor(vk::Extent2D),
    PipelineBarrier(Barrier),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed; nothing was acquired and no semaphore was signaled.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presentation was queued or dropped, but the surface must be rebuilt.
    Stale,
}

/// Everything the frame engine asks of a GPU.
///
/// Destroy calls on unknown keys are ignored so teardown paths can be
/// idempotent.
pub trait GpuBackend {
    // Buffers

    /// Host-visible, persistently mapped buffer usable as a uniform buffer.
    fn create_host_buffer(&mut self, size: u64) -> RenderResult<BufferKey>;
    fn write_host_buffer(&mut self, buffer: BufferKey, offset: u64, bytes: &[u8])
    -> RenderResult<()>;
    fn read_host_buffer(&self, buffer: BufferKey) -> RenderResult<Vec<u8>>;
    fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<GpuMesh>;
    fn destroy_buffer(&mut self, buffer: BufferKey);

    // Images

    fn create_texture(&mut self, texture: &TextureData) -> RenderResult<ImageKey>;
    /// Sampled depth image of `extent` plus a framebuffer compatible with `pass`.
    fn create_shadow_target(
        &mut self,
        extent: vk::Extent2D,
        pass: RenderPassKey,
    ) -> RenderResult<ShadowTarget>;
    fn destroy_image(&mut self, image: ImageKey);
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferKey);

    // Descriptors

    fn create_set_layout(&mut self, spec: &DescriptorBindingSpec) -> RenderResult<LayoutKey>;
    fn destroy_set_layout(&mut self, layout: LayoutKey);
    fn create_descriptor_pool(&mut self, sizes: &PoolSizes, max_sets: u32)
    -> RenderResult<PoolKey>;
    /// Destroys the pool and frees every set allocated from it.
    fn destroy_descriptor_pool(&mut self, pool: PoolKey);
    fn allocate_set(&mut self, pool: PoolKey, layout: LayoutKey) -> RenderResult<SetKey>;
    fn write_set(&mut self, set: SetKey, binding: u32, resource: ResourceRef) -> RenderResult<()>;

    // Passes and pipelines

    /// Depth-only pass ending in the depth read-only layout.
    fn create_shadow_render_pass(&mut self) -> RenderResult<RenderPassKey>;
    /// The swapchain pass, owned by the backend.
    fn main_render_pass(&self) -> RenderPassKey;
    fn destroy_render_pass(&mut self, pass: RenderPassKey);
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> RenderResult<PipelineKey>;
    fn destroy_pipeline(&mut self, pipeline: PipelineKey);

    // Surface

    fn surface_extent(&self) -> vk::Extent2D;
    fn surface_image_count(&self) -> u32;
    /// Recreates the swapchain and its framebuffers. Returns the extent
    /// actually obtained.
    fn rebuild_surface(&mut self, extent: vk::Extent2D) -> RenderResult<vk::Extent2D>;

    // Synchronization and submission

    fn create_fence(&mut self, signaled: bool) -> RenderResult<FenceKey>;
    fn destroy_fence(&mut self, fence: FenceKey);
    fn create_semaphore(&mut self) -> RenderResult<SemaphoreKey>;
    fn destroy_semaphore(&mut self, semaphore: SemaphoreKey);
    fn allocate_command_buffer(&mut self) -> RenderResult<CommandBufferKey>;
    fn free_command_buffer(&mut self, cmd: CommandBufferKey);
    /// Returns `false` when `timeout` elapsed first.
    fn wait_fence(&mut self, fence: FenceKey, timeout: Duration) -> RenderResult<bool>;
    fn reset_fence(&mut self, fence: FenceKey) -> RenderResult<()>;
    fn acquire_next_image(
        &mut self,
        signal: SemaphoreKey,
        timeout: Duration,
    ) -> RenderResult<AcquireOutcome>;
    /// Replaces the contents of `cmd` with `commands`.
    fn record(&mut self, cmd: CommandBufferKey, commands: &[RenderCommand]) -> RenderResult<()>;
    fn submit(
        &mut self,
        cmd: CommandBufferKey,
        wait: SemaphoreKey,
        signal: SemaphoreKey,
        fence: FenceKey,
    ) -> RenderResult<()>;
    fn present(&mut self, image_index: u32, wait: SemaphoreKey) -> RenderResult<PresentOutcome>;
    fn wait_idle(&mut self) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_arithmetic() {
        let per_set = PoolSizes::new(7, 2);
        let total = per_set * 3 + PoolSizes::new(1, 0);
        assert_eq!(total, PoolSizes::new(22, 6));
        assert!(per_set.fits_within(&total));
        assert!(!total.fits_within(&per_set));
    }
}

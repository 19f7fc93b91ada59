//! Command pools and command buffer recording.
//!
//! - [`CommandPool`] owns a `VkCommandPool` and hands out primary buffers
//! - [`CommandBuffer`] is a thin recording view over a `vk::CommandBuffer`
//!   exposing only the commands the shadow and main passes record
//!
//! # Overview
//!
//! Per-frame buffers come from a pool created with
//! `RESET_COMMAND_BUFFER`, so each frame slot re-records its own buffer
//! after waiting on its fence. Load-time uploads go through
//! [`CommandPool::one_time_submit`] on a transient pool, which blocks
//! until the copy retires.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra_rhi::command::{CommandBuffer, CommandPool};
//! use umbra_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let family = device.queue_families().graphics_family.unwrap_or(0);
//! let pool = CommandPool::new(device.clone(), family)?;
//! let cmd = CommandBuffer::from_handle(device, pool.allocate_command_buffer()?);
//! cmd.begin()?;
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::Fence;

/// Upper bound for blocking one-shot uploads.
const ONE_TIME_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns a command pool for one queue family.
///
/// Buffers allocated from the pool are freed with it.
///
/// # Thread Safety
///
/// Vulkan command pools are externally synchronized. Allocation and
/// recording from one pool must stay on one thread at a time.
pub struct CommandPool {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan command pool handle.
    pool: vk::CommandPool,
    /// Queue family the pool's buffers are submitted to.
    queue_family_index: u32,
}

impl CommandPool {
    /// Pool whose buffers can be reset individually (per-frame recording).
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `queue_family_index` - Family the buffers will be submitted to
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Pool for short-lived upload buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);
        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        info!("Command pool created for queue family {}", queue_family_index);
        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates one primary command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails or the driver returns nothing.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        self.allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("driver returned no command buffer".into()))
    }

    /// Allocates `count` primary command buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    /// Records with `record`, submits to the graphics queue and blocks until
    /// the GPU has finished. Used for texture uploads at load time.
    ///
    /// The temporary buffer is freed whether or not the submission succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if recording or submission fails, or
    /// `VulkanError(TIMEOUT)` if the work does not retire within ten seconds.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use umbra_rhi::command::CommandPool;
    /// # use umbra_rhi::vk;
    /// # fn example(pool: &CommandPool, image: vk::Image) -> umbra_rhi::RhiResult<()> {
    /// pool.one_time_submit(|cmd| {
    ///     let barrier = vk::ImageMemoryBarrier::default()
    ///         .image(image)
    ///         .old_layout(vk::ImageLayout::UNDEFINED)
    ///         .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    ///     cmd.image_barrier(
    ///         vk::PipelineStageFlags::TOP_OF_PIPE,
    ///         vk::PipelineStageFlags::TRANSFER,
    ///         barrier,
    ///     );
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn one_time_submit<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        let handle = self.allocate_command_buffer()?;
        let cmd = CommandBuffer::from_handle(self.device.clone(), handle);
        let result = (|| {
            cmd.begin()?;
            record(&cmd);
            cmd.end()?;

            let fence = Fence::new(self.device.clone(), false)?;
            let buffers = [handle];
            let submit = vk::SubmitInfo::default().command_buffers(&buffers);
            unsafe { self.device.submit_graphics(&[submit], fence.handle())? };
            if !fence.wait(ONE_TIME_SUBMIT_TIMEOUT)? {
                return Err(RhiError::VulkanError(vk::Result::TIMEOUT));
            }
            Ok(())
        })();
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[handle]);
        }
        result
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Recording view over a primary command buffer. Does not own the handle;
/// the pool frees it.
///
/// Recording methods other than [`begin`](Self::begin),
/// [`end`](Self::end) and [`reset`](Self::reset) are infallible: Vulkan
/// reports recording errors at `end`.
///
/// # Thread Safety
///
/// Shares the external synchronization of its pool.
pub struct CommandBuffer {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Borrowed command buffer handle.
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Wraps a handle allocated from a [`CommandPool`].
    pub fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins one-time-submit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already recording or pending.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Finishes recording.
    ///
    /// # Errors
    ///
    /// Returns an error if any recorded command was invalid.
    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Returns the buffer to the initial state. The owning frame's fence
    /// must have signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Begins `render_pass` over the full `extent` with inline contents.
    ///
    /// # Arguments
    ///
    /// * `render_pass` - Pass to begin
    /// * `framebuffer` - Framebuffer compatible with the pass
    /// * `extent` - Render area, starting at the origin
    /// * `clear_values` - One per attachment, in attachment order
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe { self.device.handle().cmd_end_render_pass(self.buffer) };
    }

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer], &[0]);
        }
    }

    /// Binds `buffer` at offset 0 as the index source.
    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, 0, index_type);
        }
    }

    /// Binds `set` at set index 0 for graphics.
    pub fn bind_descriptor_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    /// Sets a full-extent viewport and scissor.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    /// Draws one instance of `index_count` indices from offset 0.
    pub fn draw_indexed(&self, index_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
        }
    }

    /// Records a single image memory barrier.
    pub fn image_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Copies `src` into `dst`, which must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        debug!("Recorded buffer-to-image copy");
    }
}

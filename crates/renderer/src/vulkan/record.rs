//! Translation of [`RenderCommand`] lists into Vulkan command buffers.

use ash::vk;

use umbra_rhi::command::CommandBuffer;
use umbra_rhi::image::has_stencil_component;

use super::VulkanBackend;
use crate::backend::{Barrier, ClearValues, FramebufferTarget, RenderCommand};
use crate::error::{RenderError, RenderResult};

fn clear_values(clear: ClearValues) -> Vec<vk::ClearValue> {
    let depth = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: clear.depth,
            stencil: 0,
        },
    };
    match clear.color {
        Some(float32) => vec![
            vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            depth,
        ],
        None => vec![depth],
    }
}

impl VulkanBackend {
    /// Resets `cmd` and records `commands` into it.
    pub(super) fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        commands: &[RenderCommand],
    ) -> RenderResult<()> {
        let cmd = CommandBuffer::from_handle(self.device.clone(), cmd);
        cmd.reset()?;
        cmd.begin()?;
        for command in commands {
            self.record_one(&cmd, command)?;
        }
        cmd.end()?;
        Ok(())
    }

    fn record_one(&self, cmd: &CommandBuffer, command: &RenderCommand) -> RenderResult<()> {
        match *command {
            RenderCommand::BeginRenderPass {
                pass,
                framebuffer,
                extent,
                clear,
            } => {
                let framebuffer = match framebuffer {
                    FramebufferTarget::Shadow(key) => self
                        .framebuffers
                        .get(key)
                        .ok_or(RenderError::UnknownHandle("framebuffer"))?
                        .handle(),
                    FramebufferTarget::Swapchain(index) => self
                        .surface_targets
                        .as_ref()
                        .and_then(|t| t.framebuffers.get(index as usize))
                        .ok_or(RenderError::UnknownHandle("swapchain framebuffer"))?
                        .handle(),
                };
                cmd.begin_render_pass(
                    self.pass(pass)?.handle(),
                    framebuffer,
                    extent,
                    &clear_values(clear),
                );
            }
            RenderCommand::EndRenderPass => cmd.end_render_pass(),
            RenderCommand::BindPipeline(key) => {
                let entry = self
                    .pipelines
                    .get(key)
                    .ok_or(RenderError::UnknownHandle("pipeline"))?;
                cmd.bind_graphics_pipeline(entry.pipeline.handle());
            }
            RenderCommand::BindDescriptorSet { pipeline, set } => {
                let layout = self
                    .pipelines
                    .get(pipeline)
                    .ok_or(RenderError::UnknownHandle("pipeline"))?
                    .layout
                    .handle();
                let set = self
                    .sets
                    .get(set)
                    .ok_or(RenderError::UnknownHandle("descriptor set"))?
                    .set;
                cmd.bind_descriptor_set(layout, set);
            }
            RenderCommand::BindMesh(mesh) => {
                cmd.bind_vertex_buffer(self.buffer(mesh.vertex_buffer)?.handle());
                cmd.bind_index_buffer(self.buffer(mesh.index_buffer)?.handle(), vk::IndexType::UINT32);
            }
            RenderCommand::DrawIndexed { index_count } => cmd.draw_indexed(index_count),
            // Viewport and scissor are always set together at full extent.
            RenderCommand::SetViewport(extent) => cmd.set_viewport_and_scissor(extent),
            RenderCommand::SetScissor(_) => {}
            RenderCommand::PipelineBarrier(Barrier::DepthWriteToShaderRead { image }) => {
                let image = self.image(image)?;
                let mut aspect = vk::ImageAspectFlags::DEPTH;
                if has_stencil_component(image.format()) {
                    aspect |= vk::ImageAspectFlags::STENCIL;
                }
                // The shadow pass already leaves the image read-only; this
                // only orders the writes against fragment sampling.
                let barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
                    .new_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.handle())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(aspect)
                            .level_count(1)
                            .layer_count(1),
                    )
                    .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ);
                cmd.image_barrier(
                    vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    barrier,
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_only_passes_clear_one_attachment() {
        assert_eq!(clear_values(ClearValues::depth_only()).len(), 1);
        let values = clear_values(ClearValues::color_and_depth([0.1, 0.2, 0.3, 1.0]));
        assert_eq!(values.len(), 2);
        // SAFETY: the first value of a color pass is written as a color.
        let color = unsafe { values[0].color.float32 };
        assert_eq!(color, [0.1, 0.2, 0.3, 1.0]);
    }
}

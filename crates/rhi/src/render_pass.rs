//! Render passes and framebuffers.
//!
//! This module provides the two pass shapes a frame is recorded with:
//! - [`RenderPass::shadow`] - a single depth attachment, cleared and stored,
//!   then left in `DEPTH_STENCIL_READ_ONLY_OPTIMAL` so a later pass can
//!   sample it
//! - [`RenderPass::main`] - swapchain color plus a depth buffer, with the
//!   color attachment ending in `PRESENT_SRC_KHR`
//!
//! [`Framebuffer`] binds image views to a pass at a fixed extent.
//!
//! # Overview
//!
//! Both passes carry their own external subpass dependencies:
//!
//! - **Shadow pass (outgoing).** Depth writes finish before any
//!   fragment-shader read in a later pass.
//! - **Main pass (incoming).** The depth buffer is shared by every swap
//!   image and every frame in flight, so the previous frame's late-fragment
//!   depth writes must finish before this frame clears and writes depth
//!   again. The same dependency waits for the presentation engine to
//!   release the color attachment.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra_rhi::device::Device;
//! use umbra_rhi::image::{Image, find_depth_format};
//! use umbra_rhi::render_pass::{Framebuffer, RenderPass};
//! use umbra_rhi::vk;
//!
//! # fn example(device: Arc<Device>) -> umbra_rhi::RhiResult<()> {
//! let extent = vk::Extent2D { width: 1024, height: 1024 };
//! let depth_format = find_depth_format(&device)?;
//! let pass = RenderPass::shadow(device.clone(), depth_format)?;
//! let depth = Image::depth_attachment(device.clone(), extent, depth_format, true)?;
//! let framebuffer = Framebuffer::new(device, &pass, &[depth.view()], extent)?;
//! # let _ = framebuffer;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Which of the two pass shapes a [`RenderPass`] was built as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    /// Depth-only, sampled afterwards.
    Shadow,
    /// Swapchain color plus depth.
    Main,
}

/// Outgoing dependency of the shadow pass: depth writes before shader reads.
fn shadow_pass_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(0)
        .dst_subpass(vk::SUBPASS_EXTERNAL)
        .src_stage_mask(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
        .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .dependency_flags(vk::DependencyFlags::BY_REGION)
}

/// Incoming dependency of the main pass.
///
/// Orders the previous frame's depth writes (late fragment tests) before
/// this frame's depth clear and writes, and the swap image release before
/// color output.
fn main_pass_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
}

/// Vulkan render pass wrapper.
///
/// The pass is destroyed when dropped. Pipelines and framebuffers created
/// against it must be dropped first.
///
/// # Thread Safety
///
/// The render pass is immutable after creation and can be shared between
/// threads.
pub struct RenderPass {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan render pass handle.
    render_pass: vk::RenderPass,
    /// Shape the pass was built with.
    kind: PassKind,
}

impl RenderPass {
    /// Creates the depth-only shadow pass.
    ///
    /// The attachment starts `UNDEFINED` (its previous contents are
    /// discarded) and ends `DEPTH_STENCIL_READ_ONLY_OPTIMAL`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `depth_format` - Format of the depth attachment
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn shadow(device: Arc<Device>, depth_format: vk::Format) -> RhiResult<Self> {
        let attachments = [vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .depth_stencil_attachment(&depth_ref)];
        let dependencies = [shadow_pass_dependency()];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        Self::create(device, &create_info, PassKind::Shadow)
    }

    /// Creates the main color pass.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `color_format` - Swapchain image format
    /// * `depth_format` - Format of the depth attachment
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn main(
        device: Arc<Device>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];
        let dependencies = [main_pass_dependency()];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        Self::create(device, &create_info, PassKind::Main)
    }

    fn create(
        device: Arc<Device>,
        create_info: &vk::RenderPassCreateInfo,
        kind: PassKind,
    ) -> RhiResult<Self> {
        let render_pass = unsafe { device.handle().create_render_pass(create_info, None)? };
        debug!("Created {:?} render pass", kind);
        Ok(Self {
            device,
            render_pass,
            kind,
        })
    }

    /// Returns the Vulkan render pass handle.
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Returns the shape the pass was built with.
    #[inline]
    pub fn kind(&self) -> PassKind {
        self.kind
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Destroyed {:?} render pass", self.kind);
    }
}

/// A framebuffer bound to one render pass. Destroyed when dropped.
///
/// The attached image views must outlive the framebuffer.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Creates a single-layer framebuffer of `extent`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `render_pass` - Pass the framebuffer must be compatible with
    /// * `attachments` - Views in the pass's attachment order
    /// * `extent` - Width and height of every attachment
    ///
    /// # Errors
    ///
    /// Returns an error if framebuffer creation fails.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        Ok(Self {
            device,
            framebuffer,
        })
    }

    /// Returns the Vulkan framebuffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_pass_waits_for_previous_depth_writes() {
        let dep = main_pass_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(
            dep.src_stage_mask
                .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
        );
        assert!(
            dep.src_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
        assert!(
            dep.dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            dep.dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn main_pass_waits_for_the_swap_image() {
        let dep = main_pass_dependency();
        assert!(
            dep.src_stage_mask
                .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        );
        assert!(
            dep.dst_access_mask
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn shadow_pass_hands_depth_to_fragment_reads() {
        let dep = shadow_pass_dependency();
        assert_eq!(dep.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.src_stage_mask, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS);
        assert_eq!(dep.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn render_pass_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RenderPass>();
        assert_send_sync::<Framebuffer>();
    }
}

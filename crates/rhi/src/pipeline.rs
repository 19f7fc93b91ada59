//! Graphics pipelines and pipeline layouts.
//!
//! Pipelines are built against a render pass with a dynamic viewport and
//! scissor so they survive swapchain resizes. The shadow pipeline has no
//! fragment stage and no color attachment, and enables depth bias.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra_rhi::device::Device;
//! use umbra_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, PipelineLayout};
//! use umbra_rhi::render_pass::RenderPass;
//! use umbra_rhi::shader::Shader;
//! use umbra_rhi::vertex::VertexLayout;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     pass: &RenderPass,
//! #     vs: &Shader,
//! #     fs: &Shader,
//! #     layout: &PipelineLayout,
//! # ) -> umbra_rhi::RhiResult<()> {
//! let pipeline = GraphicsPipelineBuilder::new(pass)
//!     .vertex_shader(vs)
//!     .fragment_shader(fs)
//!     .vertex_layout(VertexLayout::POSITION_NORMAL_UV)
//!     .cull_mode(CullMode::Back)
//!     .build(device, layout)?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::render_pass::{PassKind, RenderPass};
use crate::shader::Shader;
use crate::vertex::VertexLayout;

/// Pipeline layout over one or more descriptor set layouts.
///
/// # Thread Safety
///
/// Immutable after creation and can be shared between threads.
pub struct PipelineLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan pipeline layout handle.
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout with no push constant ranges.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `descriptor_set_layouts` - Set layouts in set-index order
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);
        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        debug!(
            "Created pipeline layout with {} descriptor set layout(s)",
            descriptor_set_layouts.len()
        );
        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Compiled graphics pipeline. Destroyed when dropped.
///
/// Must outlive every command buffer that binds it.
pub struct Pipeline {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan pipeline handle.
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        info!("Graphics pipeline destroyed");
    }
}

/// Which triangle faces the rasterizer discards.
///
/// Front faces are counter-clockwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    /// Both faces are drawn.
    None,
    /// Front faces are discarded. Used for geometry viewed from inside.
    Front,
    #[default]
    Back,
}

impl CullMode {
    /// Converts to the Vulkan flag.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Constant and slope factors applied while rasterizing shadow casters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBias {
    /// Constant depth offset.
    pub constant: f32,
    /// Offset scaled by the polygon's depth slope.
    pub slope: f32,
}

/// Builder for render-pass based graphics pipelines.
///
/// Depth test and write are always on with a `LESS` compare. Topology is a
/// triangle list. Viewport and scissor are dynamic.
pub struct GraphicsPipelineBuilder<'a> {
    render_pass: &'a RenderPass,
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_layout: VertexLayout,
    cull_mode: CullMode,
    depth_bias: Option<DepthBias>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Starts a builder for pipelines used inside `render_pass`.
    pub fn new(render_pass: &'a RenderPass) -> Self {
        Self {
            render_pass,
            vertex_shader: None,
            fragment_shader: None,
            vertex_layout: VertexLayout::default(),
            cull_mode: CullMode::default(),
            depth_bias: None,
        }
    }

    /// Sets the vertex stage. Required.
    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Sets the fragment stage. Required for main-pass pipelines.
    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = layout;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    /// Enables depth bias, for shadow casters.
    pub fn depth_bias(mut self, bias: DepthBias) -> Self {
        self.depth_bias = Some(bias);
        self
    }

    /// Compiles the pipeline.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `layout` - Layout whose sets the shaders' bindings resolve against
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if no vertex shader was set, or if
    /// a main-pass pipeline lacks a fragment shader.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| RhiError::PipelineError("vertex shader is required".into()))?;
        let has_color = self.render_pass.kind() == PassKind::Main;
        if has_color && self.fragment_shader.is_none() {
            return Err(RhiError::PipelineError(
                "main pass pipelines need a fragment shader".into(),
            ));
        }

        let mut stages = vec![vertex_shader.stage_create_info()];
        if let Some(fragment) = self.fragment_shader {
            stages.push(fragment.stage_create_info());
        }

        let bindings = [self.vertex_layout.binding_description()];
        let attributes = self.vertex_layout.attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let mut rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);
        if let Some(bias) = self.depth_bias {
            rasterization = rasterization
                .depth_bias_enable(true)
                .depth_bias_constant_factor(bias.constant)
                .depth_bias_slope_factor(bias.slope);
        }

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blend = if has_color {
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments)
        } else {
            vk::PipelineColorBlendStateCreateInfo::default()
        };

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(self.render_pass.handle())
            .subpass(0);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".into()))?;
        info!(
            "Graphics pipeline created for {:?} pass (cull {:?}, depth bias {})",
            self.render_pass.kind(),
            self.cull_mode,
            self.depth_bias.is_some()
        );
        Ok(Pipeline { device, pipeline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::default(), CullMode::Back);
    }
}

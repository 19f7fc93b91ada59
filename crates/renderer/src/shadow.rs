//! Shadow pass resources: the depth-only pass, its pipeline, and one
//! depth target per frame slot.

use glam::Mat4;
use tracing::{debug, info};

use umbra_core::ShadowConfig;
use umbra_rhi::pipeline::{CullMode, DepthBias};
use umbra_rhi::vk;
use umbra_scene::{Light, ShadowProjection};

use crate::backend::{
    Barrier, ClearValues, FramebufferTarget, GpuBackend, ImageKey, LayoutKey, PipelineDesc,
    PipelineKey, RenderCommand, RenderPassKey, ShadowTarget,
};
use crate::error::{RenderError, RenderResult};
use crate::ubo::LightSpaceUniform;

#[derive(Debug)]
pub struct ShadowPassResources {
    render_pass: RenderPassKey,
    pipeline: PipelineKey,
    targets: Vec<ShadowTarget>,
    extent: vk::Extent2D,
    projection: ShadowProjection,
    light_index: usize,
}

impl ShadowPassResources {
    /// Creates the pass, the biased depth-only pipeline over
    /// `shadow_layout`, and `frame_count` depth targets of `extent`.
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        shadow_layout: LayoutKey,
        frame_count: usize,
        extent: vk::Extent2D,
        config: &ShadowConfig,
    ) -> RenderResult<Self> {
        let render_pass = backend.create_shadow_render_pass()?;
        let pipeline = backend.create_pipeline(&PipelineDesc {
            name: "shadow".to_string(),
            pass: render_pass,
            vertex_shader: config.vertex_shader.clone(),
            fragment_shader: None,
            set_layout: shadow_layout,
            cull_mode: CullMode::Back,
            depth_bias: Some(DepthBias {
                constant: config.depth_bias_constant,
                slope: config.depth_bias_slope,
            }),
        })?;

        let mut resources = Self {
            render_pass,
            pipeline,
            targets: Vec::with_capacity(frame_count),
            extent,
            projection: ShadowProjection {
                fov_degrees: config.fov_degrees,
                aspect: aspect(extent),
                near: config.near,
                far: config.far,
            },
            light_index: config.light_index,
        };
        resources.create_targets(backend, frame_count)?;
        info!(
            "Shadow pass ready: {} targets at {}x{}, light {}",
            frame_count, extent.width, extent.height, config.light_index
        );
        Ok(resources)
    }

    fn create_targets<B: GpuBackend>(&mut self, backend: &mut B, count: usize) -> RenderResult<()> {
        for _ in 0..count {
            let target = backend.create_shadow_target(self.extent, self.render_pass)?;
            self.targets.push(target);
        }
        Ok(())
    }

    fn destroy_targets<B: GpuBackend>(&mut self, backend: &mut B) {
        for target in self.targets.drain(..) {
            backend.destroy_framebuffer(target.framebuffer);
            backend.destroy_image(target.image);
        }
    }

    /// Recreates every depth target at `extent`. The caller must have
    /// waited for the device and must repoint the material sets afterwards.
    pub fn rebuild<B: GpuBackend>(&mut self, backend: &mut B, extent: vk::Extent2D) -> RenderResult<()> {
        let count = self.targets.len();
        self.destroy_targets(backend);
        self.extent = extent;
        self.projection.aspect = aspect(extent);
        self.create_targets(backend, count)?;
        debug!("Rebuilt {} shadow targets at {}x{}", count, extent.width, extent.height);
        Ok(())
    }

    /// Depth images in frame-slot order.
    pub fn shadow_maps(&self) -> Vec<ImageKey> {
        self.targets.iter().map(|t| t.image).collect()
    }

    #[inline]
    pub fn pipeline(&self) -> PipelineKey {
        self.pipeline
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn light_index(&self) -> usize {
        self.light_index
    }

    #[inline]
    pub fn projection(&self) -> ShadowProjection {
        self.projection
    }

    fn target(&self, slot: usize) -> RenderResult<ShadowTarget> {
        self.targets
            .get(slot)
            .copied()
            .ok_or(RenderError::UnknownHandle("shadow target"))
    }

    /// Opens the depth-only pass on the target of `slot` and binds the
    /// shadow pipeline.
    pub fn begin_pass(&self, slot: usize, commands: &mut Vec<RenderCommand>) -> RenderResult<()> {
        let target = self.target(slot)?;
        commands.push(RenderCommand::BeginRenderPass {
            pass: self.render_pass,
            framebuffer: FramebufferTarget::Shadow(target.framebuffer),
            extent: self.extent,
            clear: ClearValues::depth_only(),
        });
        commands.push(RenderCommand::SetViewport(self.extent));
        commands.push(RenderCommand::SetScissor(self.extent));
        commands.push(RenderCommand::BindPipeline(self.pipeline));
        Ok(())
    }

    /// Closes the pass and orders its depth writes before the main pass
    /// samples the map.
    pub fn end_pass(&self, slot: usize, commands: &mut Vec<RenderCommand>) -> RenderResult<()> {
        let target = self.target(slot)?;
        commands.push(RenderCommand::EndRenderPass);
        commands.push(RenderCommand::PipelineBarrier(Barrier::DepthWriteToShaderRead {
            image: target.image,
        }));
        Ok(())
    }

    /// Light-space matrices that place `model` in the view of `light`.
    pub fn compute_light_space_mvp(&self, light: &Light, model: Mat4) -> LightSpaceUniform {
        LightSpaceUniform::new(
            model,
            light.view_matrix(),
            light.projection_matrix(&self.projection),
        )
    }

    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B) {
        self.destroy_targets(backend);
        backend.destroy_pipeline(self.pipeline);
        backend.destroy_render_pass(self.render_pass);
    }
}

fn aspect(extent: vk::Extent2D) -> f32 {
    extent.width.max(1) as f32 / extent.height.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_layout::shadow_spec;
    use crate::headless::HeadlessBackend;
    use glam::Vec3;

    fn resources(backend: &mut HeadlessBackend, frames: usize) -> ShadowPassResources {
        let layout = backend.create_set_layout(&shadow_spec()).unwrap();
        let extent = backend.surface_extent();
        ShadowPassResources::new(backend, layout, frames, extent, &ShadowConfig::default()).unwrap()
    }

    #[test]
    fn one_target_per_slot() {
        let mut backend = HeadlessBackend::new(128, 64);
        let shadow = resources(&mut backend, 3);
        let maps = shadow.shadow_maps();
        assert_eq!(maps.len(), 3);
        assert_ne!(maps[0], maps[1]);
        assert_eq!(shadow.projection().aspect, 2.0);
    }

    #[test]
    fn pass_ends_with_a_depth_barrier() {
        let mut backend = HeadlessBackend::new(32, 32);
        let shadow = resources(&mut backend, 2);
        let mut commands = Vec::new();
        shadow.begin_pass(1, &mut commands).unwrap();
        shadow.end_pass(1, &mut commands).unwrap();

        assert!(matches!(commands[0], RenderCommand::BeginRenderPass { clear, .. } if clear.color.is_none()));
        assert_eq!(
            commands.last(),
            Some(&RenderCommand::PipelineBarrier(Barrier::DepthWriteToShaderRead {
                image: shadow.shadow_maps()[1]
            }))
        );
        assert!(shadow.begin_pass(2, &mut commands).is_err());
    }

    #[test]
    fn rebuild_replaces_targets_without_leaking() {
        let mut backend = HeadlessBackend::new(32, 32);
        let mut shadow = resources(&mut backend, 2);
        let before = backend.live_objects();
        let old = shadow.shadow_maps();

        let extent = vk::Extent2D { width: 64, height: 16 };
        shadow.rebuild(&mut backend, extent).unwrap();

        assert_eq!(backend.live_objects(), before);
        assert_ne!(shadow.shadow_maps(), old);
        assert_eq!(shadow.extent(), extent);
        assert_eq!(shadow.projection().aspect, 4.0);
    }

    #[test]
    fn light_space_mvp_uses_light_view() {
        let mut backend = HeadlessBackend::new(32, 32);
        let shadow = resources(&mut backend, 1);
        let light = Light {
            position: Vec3::new(0.0, 10.0, 0.0),
            ..Light::default()
        };
        let model = Mat4::from_translation(Vec3::X);
        let uniform = shadow.compute_light_space_mvp(&light, model);
        assert_eq!(uniform.model, model);
        assert_eq!(uniform.light_view, light.view_matrix());
        assert_eq!(
            uniform.light_proj,
            light.projection_matrix(&shadow.projection())
        );
    }
}

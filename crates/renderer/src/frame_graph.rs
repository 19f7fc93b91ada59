//! The fixed two-pass frame: shadow depth, then main color.
//!
//! Both passes go into one command list. The shadow pass leaves its target
//! in the depth read-only layout and ends with a depth-write to
//! fragment-read barrier, which is all the main pass needs to sample it.

use umbra_rhi::vk;

use crate::backend::{ClearValues, FramebufferTarget, RenderCommand, RenderPassKey};
use crate::error::RenderResult;
use crate::frame_sync::FrameTicket;
use crate::scene_graph::SceneGraph;
use crate::shadow::ShadowPassResources;

/// Records frames into a reused command list.
#[derive(Debug)]
pub struct FrameGraph {
    main_pass: RenderPassKey,
    clear_color: [f32; 4],
    commands: Vec<RenderCommand>,
}

impl FrameGraph {
    pub fn new(main_pass: RenderPassKey, clear_color: [f32; 4]) -> Self {
        Self {
            main_pass,
            clear_color,
            commands: Vec::new(),
        }
    }

    /// Records the frame of `ticket` and returns its command list.
    pub fn record(
        &mut self,
        ticket: &FrameTicket,
        scene: &SceneGraph,
        shadow: &ShadowPassResources,
        extent: vk::Extent2D,
    ) -> RenderResult<&[RenderCommand]> {
        self.commands.clear();
        self.record_shadow_pass(ticket.slot, scene, shadow)?;
        self.record_main_pass(ticket, scene, extent)?;
        Ok(&self.commands)
    }

    fn record_shadow_pass(
        &mut self,
        slot: usize,
        scene: &SceneGraph,
        shadow: &ShadowPassResources,
    ) -> RenderResult<()> {
        shadow.begin_pass(slot, &mut self.commands)?;
        for (_, object) in scene.shadow_casters() {
            let set = scene.instance(object.instance)?.shadow_set(slot)?;
            self.commands.push(RenderCommand::BindDescriptorSet {
                pipeline: shadow.pipeline(),
                set,
            });
            self.commands.push(RenderCommand::BindMesh(object.mesh));
            self.commands.push(RenderCommand::DrawIndexed {
                index_count: object.mesh.index_count,
            });
        }
        shadow.end_pass(slot, &mut self.commands)
    }

    /// One pipeline bind per base material; only the set changes per object.
    fn record_main_pass(
        &mut self,
        ticket: &FrameTicket,
        scene: &SceneGraph,
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        self.commands.push(RenderCommand::BeginRenderPass {
            pass: self.main_pass,
            framebuffer: FramebufferTarget::Swapchain(ticket.image_index),
            extent,
            clear: ClearValues::color_and_depth(self.clear_color),
        });
        self.commands.push(RenderCommand::SetViewport(extent));
        self.commands.push(RenderCommand::SetScissor(extent));

        for group in scene.groups() {
            let pipeline = scene.base_material(group.base)?.pipeline()?;
            self.commands.push(RenderCommand::BindPipeline(pipeline));
            for &key in &group.objects {
                let object = scene.object(key)?;
                let set = scene.instance(object.instance)?.descriptor_set(ticket.slot)?;
                self.commands
                    .push(RenderCommand::BindDescriptorSet { pipeline, set });
                self.commands.push(RenderCommand::BindMesh(object.mesh));
                self.commands.push(RenderCommand::DrawIndexed {
                    index_count: object.mesh.index_count,
                });
            }
        }
        self.commands.push(RenderCommand::EndRenderPass);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::GpuAssets;
    use crate::backend::{Barrier, GpuBackend};
    use crate::descriptor_composer::DescriptorComposer;
    use crate::headless::HeadlessBackend;
    use crate::light_uniforms::LightUniforms;
    use crate::uniform_store::PerFrameUniformStore;
    use umbra_core::ShadowConfig;
    use umbra_resources::{BaseMaterialDescription, DirectoryAssets, ObjectDescription, SceneDescription};
    use umbra_scene::Light;

    struct Fixture {
        backend: HeadlessBackend,
        scene: SceneGraph,
        shadow: ShadowPassResources,
    }

    fn fixture() -> Fixture {
        let desc = SceneDescription {
            base_materials: vec![
                BaseMaterialDescription::new("lit", "lit.vert.spv", "lit.frag.spv"),
                BaseMaterialDescription::new("sky", "sky.vert.spv", "sky.frag.spv"),
            ],
            objects: vec![
                ObjectDescription::new("cube", "lit", "builtin:cube"),
                ObjectDescription::new("dome", "sky", "builtin:cube").with_shadow(false),
                ObjectDescription::new("floor", "lit", "builtin:plane"),
            ],
            lights: vec![Light::default()],
        };
        let mut backend = HeadlessBackend::new(64, 64);
        let mut composer = DescriptorComposer::new();
        let mut store = PerFrameUniformStore::new();
        let assets = GpuAssets::upload(&desc, &mut DirectoryAssets::new("."), &mut backend).unwrap();
        let lights = LightUniforms::new(&mut store, &mut backend, 1, 2).unwrap();
        let mut scene = SceneGraph::build(
            &desc, &assets, &mut backend, &mut composer, &mut store, &lights, 2, 0,
        )
        .unwrap();
        let extent = backend.surface_extent();
        let shadow = ShadowPassResources::new(
            &mut backend,
            scene.shadow_layout().unwrap(),
            2,
            extent,
            &ShadowConfig::default(),
        )
        .unwrap();
        scene
            .attach_shadow_resources(&mut backend, &composer, &shadow.shadow_maps())
            .unwrap();
        let main_pass = backend.main_render_pass();
        scene.create_pipelines(&mut backend, main_pass).unwrap();
        Fixture {
            backend,
            scene,
            shadow,
        }
    }

    fn ticket(backend: &mut HeadlessBackend, slot: usize) -> FrameTicket {
        FrameTicket {
            slot,
            image_index: 0,
            suboptimal: false,
            command_buffer: backend.allocate_command_buffer().unwrap(),
        }
    }

    #[test]
    fn shadow_pass_precedes_main_pass_with_a_barrier() {
        let mut f = fixture();
        let t = ticket(&mut f.backend, 1);
        let mut graph = FrameGraph::new(f.backend.main_render_pass(), [0.0; 4]);
        let extent = f.backend.surface_extent();
        let commands = graph.record(&t, &f.scene, &f.shadow, extent).unwrap();

        let barrier = commands
            .iter()
            .position(|c| matches!(c, RenderCommand::PipelineBarrier(_)))
            .unwrap();
        let main_begin = commands
            .iter()
            .position(|c| {
                matches!(
                    c,
                    RenderCommand::BeginRenderPass {
                        framebuffer: FramebufferTarget::Swapchain(_),
                        ..
                    }
                )
            })
            .unwrap();
        assert!(barrier < main_begin);
        assert_eq!(
            commands[barrier],
            RenderCommand::PipelineBarrier(Barrier::DepthWriteToShaderRead {
                image: f.shadow.shadow_maps()[1]
            })
        );

        let shadow_draws = commands[..barrier]
            .iter()
            .filter(|c| matches!(c, RenderCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(shadow_draws, 2);
    }

    #[test]
    fn main_pass_binds_each_pipeline_once() {
        let mut f = fixture();
        let t = ticket(&mut f.backend, 0);
        let mut graph = FrameGraph::new(f.backend.main_render_pass(), [0.0; 4]);
        let extent = f.backend.surface_extent();
        let commands = graph.record(&t, &f.scene, &f.shadow, extent).unwrap();

        let pipeline_binds = commands
            .iter()
            .filter(|c| matches!(c, RenderCommand::BindPipeline(p) if *p != f.shadow.pipeline()))
            .count();
        let main_draws = commands
            .iter()
            .skip_while(|c| !matches!(c, RenderCommand::PipelineBarrier(_)))
            .filter(|c| matches!(c, RenderCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(pipeline_binds, 2);
        assert_eq!(main_draws, 3);
        assert_eq!(commands.last(), Some(&RenderCommand::EndRenderPass));
    }
}

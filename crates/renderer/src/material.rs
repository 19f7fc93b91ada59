//! Base materials and their per-object instances.
//!
//! A [`BaseMaterial`] owns the shader pair, one set layout and one
//! pipeline. A [`MaterialInstance`] owns the per-object uniforms and one
//! main set plus one shadow set per frame slot, and moves through a
//! one-way state machine:
//!
//! ```text
//! Constructed -> LayoutAssigned -> SetsAllocated -> SetsWritten -> Ready
//! ```
//!
//! `SetsWritten` is the unattached state: every binding except the shadow
//! maps points at its resource. Attaching the shadow maps makes the
//! instance `Ready`; only then may its sets be bound.

use std::path::PathBuf;

use glam::Mat4;
use tracing::debug;

use umbra_resources::{BaseMaterialDescription, MaterialProperties};
use umbra_rhi::pipeline::CullMode;

use crate::backend::{
    BufferKey, GpuBackend, ImageKey, LayoutKey, PipelineDesc, PipelineKey, RenderPassKey,
    ResourceRef, SetKey,
};
use crate::binding_layout::BindingLayout;
use crate::descriptor_composer::DescriptorComposer;
use crate::error::{RenderError, RenderResult};
use crate::light_uniforms::LightUniforms;
use crate::scene_graph::BaseMaterialKey;
use crate::ubo::{LightSpaceUniform, MaterialPropertiesUniform, MvpUniform};
use crate::uniform_store::{PerFrameUniform, PerFrameUniformStore, UniformHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaterialState {
    Constructed,
    LayoutAssigned,
    SetsAllocated,
    SetsWritten,
    Ready,
}

#[derive(Debug)]
pub struct BaseMaterial {
    name: String,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    cull_mode: CullMode,
    layout: BindingLayout,
    set_layout: Option<LayoutKey>,
    pipeline: Option<PipelineKey>,
}

impl BaseMaterial {
    pub fn new(desc: &BaseMaterialDescription, light_count: u32) -> Self {
        Self {
            name: desc.name.clone(),
            vertex_shader: desc.vertex_shader.clone(),
            fragment_shader: desc.fragment_shader.clone(),
            cull_mode: if desc.cubemap {
                CullMode::Front
            } else if desc.cull_back_faces {
                CullMode::Back
            } else {
                CullMode::None
            },
            layout: BindingLayout::new(light_count, desc.texture_count as u32),
            set_layout: None,
            pipeline: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn binding_layout(&self) -> BindingLayout {
        self.layout
    }

    pub fn declare_layout<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        composer: &mut DescriptorComposer,
    ) -> RenderResult<LayoutKey> {
        let layout = composer.declare_layout(backend, &self.layout.spec())?;
        self.set_layout = Some(layout);
        Ok(layout)
    }

    pub fn set_layout(&self) -> RenderResult<LayoutKey> {
        self.set_layout
            .ok_or(RenderError::NotInitialized("base material layout"))
    }

    pub fn create_pipeline<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        pass: RenderPassKey,
    ) -> RenderResult<PipelineKey> {
        let desc = PipelineDesc {
            name: self.name.clone(),
            pass,
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: Some(self.fragment_shader.clone()),
            set_layout: self.set_layout()?,
            cull_mode: self.cull_mode,
            depth_bias: None,
        };
        let pipeline = backend.create_pipeline(&desc)?;
        debug!("Created pipeline for base material '{}'", self.name);
        self.pipeline = Some(pipeline);
        Ok(pipeline)
    }

    pub fn pipeline(&self) -> RenderResult<PipelineKey> {
        self.pipeline
            .ok_or(RenderError::NotInitialized("base material pipeline"))
    }

    pub fn destroy_pipeline<B: GpuBackend>(&mut self, backend: &mut B) {
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
    }
}

#[derive(Debug)]
pub struct MaterialInstance {
    base: BaseMaterialKey,
    layout: BindingLayout,
    state: MaterialState,
    properties: MaterialProperties,
    textures: Vec<ImageKey>,
    shadow_light: u32,
    set_layout: Option<LayoutKey>,
    shadow_layout: Option<LayoutKey>,
    mvp: Option<PerFrameUniform<MvpUniform>>,
    light_space: Vec<PerFrameUniform<LightSpaceUniform>>,
    properties_ubo: Option<UniformHandle>,
    sets: Vec<SetKey>,
    shadow_sets: Vec<SetKey>,
}

impl MaterialInstance {
    /// `shadow_light` selects whose light-space uniform feeds the shadow set.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Config`] if the texture count differs from the
    /// layout's, or if `shadow_light` names no light (including when the
    /// layout has none, since the shadow set would stay unwritten).
    pub fn new(
        base: BaseMaterialKey,
        layout: BindingLayout,
        properties: MaterialProperties,
        textures: Vec<ImageKey>,
        shadow_light: u32,
    ) -> RenderResult<Self> {
        if textures.len() != layout.texture_count() as usize {
            return Err(RenderError::Config(format!(
                "material instance has {} textures, layout binds {}",
                textures.len(),
                layout.texture_count()
            )));
        }
        if shadow_light >= layout.light_count() {
            return Err(RenderError::Config(format!(
                "shadow light {shadow_light} out of range for {} lights",
                layout.light_count()
            )));
        }
        Ok(Self {
            base,
            layout,
            state: MaterialState::Constructed,
            properties,
            textures,
            shadow_light,
            set_layout: None,
            shadow_layout: None,
            mvp: None,
            light_space: Vec::new(),
            properties_ubo: None,
            sets: Vec::new(),
            shadow_sets: Vec::new(),
        })
    }

    #[inline]
    pub fn state(&self) -> MaterialState {
        self.state
    }

    #[inline]
    pub fn base(&self) -> BaseMaterialKey {
        self.base
    }

    #[inline]
    pub fn binding_layout(&self) -> BindingLayout {
        self.layout
    }

    fn expect_state(&self, expected: MaterialState) -> RenderResult<()> {
        if self.state != expected {
            return Err(RenderError::InvalidMaterialState {
                expected,
                found: self.state,
            });
        }
        Ok(())
    }

    pub fn assign_layout(&mut self, set_layout: LayoutKey, shadow_layout: LayoutKey) -> RenderResult<()> {
        self.expect_state(MaterialState::Constructed)?;
        self.set_layout = Some(set_layout);
        self.shadow_layout = Some(shadow_layout);
        self.state = MaterialState::LayoutAssigned;
        Ok(())
    }

    /// Creates the instance-owned uniforms and allocates one main and one
    /// shadow set per frame slot.
    pub fn allocate_sets<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        composer: &mut DescriptorComposer,
        store: &mut PerFrameUniformStore,
        frame_count: usize,
    ) -> RenderResult<()> {
        self.expect_state(MaterialState::LayoutAssigned)?;
        let (Some(set_layout), Some(shadow_layout)) = (self.set_layout, self.shadow_layout) else {
            return Err(RenderError::NotInitialized("material instance layout"));
        };

        self.mvp = Some(PerFrameUniform::new(store, backend, frame_count)?);
        for _ in 0..self.layout.light_count() {
            self.light_space
                .push(PerFrameUniform::new(store, backend, frame_count)?);
        }
        let properties_ubo = store.create(backend, MaterialPropertiesUniform::SIZE)?;
        let props = MaterialPropertiesUniform::from(&self.properties);
        store.write(backend, properties_ubo, bytemuck::bytes_of(&props))?;
        self.properties_ubo = Some(properties_ubo);

        for _ in 0..frame_count {
            self.sets.push(composer.allocate(backend, set_layout)?);
            self.shadow_sets.push(composer.allocate(backend, shadow_layout)?);
        }
        self.state = MaterialState::SetsAllocated;
        Ok(())
    }

    /// Writes every binding that never changes. Shadow-map bindings stay
    /// unwritten until [`attach_shadow_maps`](Self::attach_shadow_maps).
    pub fn write_sets<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        composer: &DescriptorComposer,
        lights: &LightUniforms,
    ) -> RenderResult<()> {
        self.expect_state(MaterialState::SetsAllocated)?;
        let mvp = self.mvp.as_ref().ok_or(RenderError::NotInitialized("mvp uniform"))?;
        let properties = self
            .properties_ubo
            .ok_or(RenderError::NotInitialized("material properties uniform"))?;
        let layout = self.layout;

        for (slot, &set) in self.sets.iter().enumerate() {
            let ubo = |handle: UniformHandle| ResourceRef::UniformBuffer(handle.buffer());

            composer.write(backend, set, BindingLayout::MVP, ubo(mvp.handle(slot)?))?;
            for i in 0..layout.light_count() {
                let light = lights.handle(i as usize, slot)?;
                composer.write(backend, set, layout.light(i), ubo(light))?;
                let light_space = self.light_space[i as usize].handle(slot)?;
                composer.write(backend, set, layout.light_space(i), ubo(light_space))?;
            }
            composer.write(backend, set, layout.properties(), ubo(properties))?;
            for (i, &texture) in self.textures.iter().enumerate() {
                let resource = if self.properties.is_cubemap {
                    ResourceRef::Cubemap(texture)
                } else {
                    ResourceRef::Texture(texture)
                };
                composer.write(backend, set, layout.texture(i as u32), resource)?;
            }

            let caster = self
                .light_space
                .get(self.shadow_light as usize)
                .ok_or(RenderError::UnknownHandle("shadow caster light"))?;
            composer.write(backend, self.shadow_sets[slot], 0, ubo(caster.handle(slot)?))?;
        }
        self.state = MaterialState::SetsWritten;
        Ok(())
    }

    /// Points the shadow-map bindings of slot `n` at `shadow_maps[n]`.
    ///
    /// Valid once the immutable bindings are written; calling it again on a
    /// ready instance repoints the bindings after the maps were rebuilt.
    pub fn attach_shadow_maps<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        composer: &DescriptorComposer,
        shadow_maps: &[ImageKey],
    ) -> RenderResult<()> {
        if self.state < MaterialState::SetsWritten {
            return Err(RenderError::InvalidMaterialState {
                expected: MaterialState::SetsWritten,
                found: self.state,
            });
        }
        if shadow_maps.len() != self.sets.len() {
            return Err(RenderError::Config(format!(
                "{} shadow maps for {} frame slots",
                shadow_maps.len(),
                self.sets.len()
            )));
        }
        // A single depth map per slot serves every light binding.
        for (&set, &map) in self.sets.iter().zip(shadow_maps) {
            for i in 0..self.layout.light_count() {
                composer.write(backend, set, self.layout.shadow_map(i), ResourceRef::ShadowMap(map))?;
            }
        }
        self.state = MaterialState::Ready;
        Ok(())
    }

    /// Main-pass set of `slot`.
    ///
    /// # Errors
    ///
    /// [`RenderError::ReadSetBeforeReady`] until shadow maps are attached.
    pub fn descriptor_set(&self, slot: usize) -> RenderResult<SetKey> {
        self.ready_set(&self.sets, slot)
    }

    /// Shadow-pass set of `slot`.
    pub fn shadow_set(&self, slot: usize) -> RenderResult<SetKey> {
        self.ready_set(&self.shadow_sets, slot)
    }

    fn ready_set(&self, sets: &[SetKey], slot: usize) -> RenderResult<SetKey> {
        if self.state != MaterialState::Ready {
            return Err(RenderError::ReadSetBeforeReady { state: self.state });
        }
        sets.get(slot)
            .copied()
            .ok_or(RenderError::UnknownHandle("frame slot"))
    }

    /// Rewrites the MVP uniform of `slot`. The set already names the
    /// buffer, so no descriptor write follows.
    pub fn update_transform<B: GpuBackend>(
        &self,
        store: &PerFrameUniformStore,
        backend: &mut B,
        slot: usize,
        model: Mat4,
        view: Mat4,
        proj: Mat4,
    ) -> RenderResult<()> {
        self.expect_state(MaterialState::Ready)?;
        let mvp = self.mvp.as_ref().ok_or(RenderError::NotInitialized("mvp uniform"))?;
        mvp.write(store, backend, slot, &MvpUniform::new(model, view, proj))
    }

    pub fn update_light_space<B: GpuBackend>(
        &self,
        store: &PerFrameUniformStore,
        backend: &mut B,
        slot: usize,
        light: usize,
        value: &LightSpaceUniform,
    ) -> RenderResult<()> {
        self.expect_state(MaterialState::Ready)?;
        self.light_space
            .get(light)
            .ok_or(RenderError::UnknownHandle("light"))?
            .write(store, backend, slot, value)
    }

    pub fn mvp_buffer(&self, slot: usize) -> RenderResult<BufferKey> {
        let mvp = self.mvp.as_ref().ok_or(RenderError::NotInitialized("mvp uniform"))?;
        Ok(mvp.handle(slot)?.buffer())
    }

    pub fn light_space_buffer(&self, light: usize, slot: usize) -> RenderResult<BufferKey> {
        let uniform = self
            .light_space
            .get(light)
            .ok_or(RenderError::UnknownHandle("light"))?;
        Ok(uniform.handle(slot)?.buffer())
    }

    /// Frees the instance-owned buffers. Sets go with the pool.
    pub fn destroy<B: GpuBackend>(&mut self, store: &mut PerFrameUniformStore, backend: &mut B) {
        if let Some(mvp) = self.mvp.take() {
            mvp.destroy(store, backend);
        }
        for uniform in self.light_space.drain(..) {
            uniform.destroy(store, backend);
        }
        if let Some(handle) = self.properties_ubo.take() {
            store.destroy(backend, handle);
        }
        self.sets.clear();
        self.shadow_sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_layout::{SETS_PER_INSTANCE_SLOT, shadow_spec};
    use crate::headless::HeadlessBackend;
    use umbra_resources::TextureData;

    struct Fixture {
        backend: HeadlessBackend,
        composer: DescriptorComposer,
        store: PerFrameUniformStore,
        lights: LightUniforms,
        instance: MaterialInstance,
    }

    fn fixture(frames: usize) -> Fixture {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut composer = DescriptorComposer::new();
        let mut store = PerFrameUniformStore::new();
        let layout = BindingLayout::new(1, 1);

        let set_layout = composer.declare_layout(&mut backend, &layout.spec()).unwrap();
        let shadow_layout = composer.declare_layout(&mut backend, &shadow_spec()).unwrap();
        composer
            .reserve_capacity(
                &mut backend,
                layout.demand_per_slot() * frames as u32,
                SETS_PER_INSTANCE_SLOT * frames as u32,
            )
            .unwrap();

        let lights = LightUniforms::new(&mut store, &mut backend, 1, frames).unwrap();
        let texture = backend.create_texture(&TextureData::white()).unwrap();
        let mut instance = MaterialInstance::new(
            BaseMaterialKey::default(),
            layout,
            MaterialProperties::default(),
            vec![texture],
            0,
        )
        .unwrap();
        instance.assign_layout(set_layout, shadow_layout).unwrap();

        Fixture {
            backend,
            composer,
            store,
            lights,
            instance,
        }
    }

    #[test]
    fn sets_unreadable_until_shadow_maps_attach() {
        let mut f = fixture(2);
        f.instance
            .allocate_sets(&mut f.backend, &mut f.composer, &mut f.store, 2)
            .unwrap();
        f.instance
            .write_sets(&mut f.backend, &f.composer, &f.lights)
            .unwrap();
        assert_eq!(f.instance.state(), MaterialState::SetsWritten);
        assert!(matches!(
            f.instance.descriptor_set(0),
            Err(RenderError::ReadSetBeforeReady {
                state: MaterialState::SetsWritten
            })
        ));

        let pass = f.backend.create_shadow_render_pass().unwrap();
        let maps: Vec<_> = (0..2)
            .map(|_| f.backend.create_shadow_target(f.backend.surface_extent(), pass).unwrap().image)
            .collect();
        f.instance
            .attach_shadow_maps(&mut f.backend, &f.composer, &maps)
            .unwrap();
        assert_eq!(f.instance.state(), MaterialState::Ready);

        let set = f.instance.descriptor_set(1).unwrap();
        let layout = f.instance.binding_layout();
        assert_eq!(
            f.backend.set_binding(set, layout.shadow_map(0)),
            Some(ResourceRef::ShadowMap(maps[1]))
        );
    }

    #[test]
    fn states_cannot_be_skipped() {
        let mut f = fixture(1);
        assert!(matches!(
            f.instance.write_sets(&mut f.backend, &f.composer, &f.lights),
            Err(RenderError::InvalidMaterialState {
                expected: MaterialState::SetsAllocated,
                found: MaterialState::LayoutAssigned
            })
        ));
        assert!(
            f.instance
                .attach_shadow_maps(&mut f.backend, &f.composer, &[])
                .is_err()
        );
    }

    #[test]
    fn shadow_set_names_the_caster_light_space_buffer() {
        let mut f = fixture(1);
        f.instance
            .allocate_sets(&mut f.backend, &mut f.composer, &mut f.store, 1)
            .unwrap();
        f.instance
            .write_sets(&mut f.backend, &f.composer, &f.lights)
            .unwrap();
        let pass = f.backend.create_shadow_render_pass().unwrap();
        let map = f.backend.create_shadow_target(f.backend.surface_extent(), pass).unwrap().image;
        f.instance
            .attach_shadow_maps(&mut f.backend, &f.composer, &[map])
            .unwrap();

        let shadow_set = f.instance.shadow_set(0).unwrap();
        let caster = f.instance.light_space_buffer(0, 0).unwrap();
        assert_eq!(
            f.backend.set_binding(shadow_set, 0),
            Some(ResourceRef::UniformBuffer(caster))
        );
    }

    #[test]
    fn texture_count_must_match_layout() {
        let err = MaterialInstance::new(
            BaseMaterialKey::default(),
            BindingLayout::new(1, 2),
            MaterialProperties::default(),
            Vec::new(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn shadow_caster_must_name_a_light() {
        for (lights, shadow_light) in [(0, 0), (2, 2)] {
            let err = MaterialInstance::new(
                BaseMaterialKey::default(),
                BindingLayout::new(lights, 0),
                MaterialProperties::default(),
                Vec::new(),
                shadow_light,
            )
            .unwrap_err();
            assert!(matches!(err, RenderError::Config(_)));
        }
    }

    #[test]
    fn transform_updates_need_a_ready_instance() {
        let f = fixture(1);
        let mut backend = f.backend;
        assert!(
            f.instance
                .update_transform(&f.store, &mut backend, 0, Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
                .is_err()
        );
    }
}

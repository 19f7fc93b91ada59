//! Arena of base materials, material instances and render objects.
//!
//! The arena exclusively owns every [`BaseMaterial`] and
//! [`MaterialInstance`]; render objects refer to them by key. Objects are
//! grouped by base material in declaration order so the main pass binds
//! each pipeline once per group.
//!
//! Construction is two-phase. [`SceneGraph::build`] leaves every instance
//! unattached (`SetsWritten`), and
//! [`SceneGraph::attach_shadow_resources`] makes them `Ready` once the
//! shadow maps exist.

use slotmap::{SlotMap, new_key_type};
use tracing::{debug, info};

use umbra_resources::SceneDescription;
use umbra_scene::Transform;

use crate::assets::GpuAssets;
use crate::backend::{GpuBackend, GpuMesh, ImageKey, LayoutKey, PoolSizes, RenderPassKey};
use crate::binding_layout::{SETS_PER_INSTANCE_SLOT, shadow_spec};
use crate::descriptor_composer::DescriptorComposer;
use crate::error::{RenderError, RenderResult};
use crate::light_uniforms::LightUniforms;
use crate::material::{BaseMaterial, MaterialInstance, MaterialState};
use crate::uniform_store::PerFrameUniformStore;

new_key_type! {
    pub struct BaseMaterialKey;
    pub struct MaterialInstanceKey;
    pub struct ObjectKey;
}

#[derive(Debug)]
pub struct RenderObject {
    pub name: String,
    pub mesh: GpuMesh,
    pub transform: Transform,
    pub casts_shadow: bool,
    pub base: BaseMaterialKey,
    pub instance: MaterialInstanceKey,
}

/// Objects sharing one base material, drawn under one pipeline bind.
#[derive(Clone, Debug)]
pub struct MaterialGroup {
    pub base: BaseMaterialKey,
    pub objects: Vec<ObjectKey>,
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    base_materials: SlotMap<BaseMaterialKey, BaseMaterial>,
    instances: SlotMap<MaterialInstanceKey, MaterialInstance>,
    objects: SlotMap<ObjectKey, RenderObject>,
    groups: Vec<MaterialGroup>,
    shadow_layout: Option<LayoutKey>,
}

impl SceneGraph {
    /// Builds the arena and brings every instance to `SetsWritten`.
    ///
    /// Layouts are declared first, then the exact descriptor demand of
    /// every instance in every frame slot is reserved in one call, then
    /// sets are allocated and their immutable bindings written.
    #[allow(clippy::too_many_arguments)]
    pub fn build<B: GpuBackend>(
        desc: &SceneDescription,
        assets: &GpuAssets,
        backend: &mut B,
        composer: &mut DescriptorComposer,
        store: &mut PerFrameUniformStore,
        lights: &LightUniforms,
        frame_count: usize,
        shadow_light: usize,
    ) -> RenderResult<Self> {
        let light_count = lights.light_count() as u32;
        let mut graph = SceneGraph::default();

        for material in &desc.base_materials {
            let mut base = BaseMaterial::new(material, light_count);
            base.declare_layout(backend, composer)?;
            let key = graph.base_materials.insert(base);
            graph.groups.push(MaterialGroup {
                base: key,
                objects: Vec::new(),
            });
        }
        let shadow_layout = composer.declare_layout(backend, &shadow_spec())?;
        graph.shadow_layout = Some(shadow_layout);

        for object in &desc.objects {
            let base_key = graph
                .base_key(&object.base_material)
                .ok_or_else(|| RenderError::UnknownBaseMaterial(object.base_material.clone()))?;
            let base = &graph.base_materials[base_key];
            let properties = desc.resolved_properties(object)?;
            let textures = desc
                .resolved_textures(object)?
                .iter()
                .map(|name| {
                    if properties.is_cubemap {
                        assets.cubemap(name)
                    } else {
                        assets.texture(name)
                    }
                })
                .collect::<RenderResult<Vec<ImageKey>>>()?;

            let mut instance = MaterialInstance::new(
                base_key,
                base.binding_layout(),
                properties,
                textures,
                shadow_light as u32,
            )?;
            instance.assign_layout(base.set_layout()?, shadow_layout)?;
            let instance = graph.instances.insert(instance);

            let key = graph.objects.insert(RenderObject {
                name: object.name.clone(),
                mesh: assets.mesh(&object.mesh)?,
                transform: object.transform,
                casts_shadow: object.casts_shadow,
                base: base_key,
                instance,
            });
            if let Some(group) = graph.groups.iter_mut().find(|g| g.base == base_key) {
                group.objects.push(key);
            }
        }
        graph.groups.retain(|g| !g.objects.is_empty());

        let (sizes, max_sets) = graph.descriptor_demand(frame_count);
        composer.reserve_capacity(backend, sizes, max_sets)?;

        for instance in graph.instances.values_mut() {
            instance.allocate_sets(backend, composer, store, frame_count)?;
            instance.write_sets(backend, composer, lights)?;
        }

        info!(
            "Scene graph built: {} base materials, {} objects, {} descriptor sets",
            graph.base_materials.len(),
            graph.objects.len(),
            max_sets
        );
        Ok(graph)
    }

    /// Exact descriptor counts and set count for `frame_count` slots.
    pub fn descriptor_demand(&self, frame_count: usize) -> (PoolSizes, u32) {
        let frames = frame_count as u32;
        let sizes = self
            .instances
            .values()
            .fold(PoolSizes::default(), |acc, instance| {
                acc + instance.binding_layout().demand_per_slot() * frames
            });
        let sets = self.instances.len() as u32 * SETS_PER_INSTANCE_SLOT * frames;
        (sizes, sets)
    }

    /// Points every instance's shadow-map bindings at `shadow_maps` (one
    /// per frame slot) and marks it `Ready`. Also used to repoint after the
    /// maps are rebuilt.
    pub fn attach_shadow_resources<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        composer: &DescriptorComposer,
        shadow_maps: &[ImageKey],
    ) -> RenderResult<()> {
        for instance in self.instances.values_mut() {
            instance.attach_shadow_maps(backend, composer, shadow_maps)?;
        }
        debug!(
            "Attached {} shadow maps to {} material instances",
            shadow_maps.len(),
            self.instances.len()
        );
        Ok(())
    }

    pub fn create_pipelines<B: GpuBackend>(&mut self, backend: &mut B, pass: RenderPassKey) -> RenderResult<()> {
        for base in self.base_materials.values_mut() {
            base.create_pipeline(backend, pass)?;
        }
        Ok(())
    }

    pub fn destroy_pipelines<B: GpuBackend>(&mut self, backend: &mut B) {
        for base in self.base_materials.values_mut() {
            base.destroy_pipeline(backend);
        }
    }

    pub fn base_key(&self, name: &str) -> Option<BaseMaterialKey> {
        self.base_materials
            .iter()
            .find(|(_, base)| base.name() == name)
            .map(|(key, _)| key)
    }

    pub fn base_material(&self, key: BaseMaterialKey) -> RenderResult<&BaseMaterial> {
        self.base_materials
            .get(key)
            .ok_or(RenderError::UnknownHandle("base material"))
    }

    pub fn object(&self, key: ObjectKey) -> RenderResult<&RenderObject> {
        self.objects
            .get(key)
            .ok_or(RenderError::UnknownHandle("render object"))
    }

    pub fn object_by_name(&self, name: &str) -> Option<ObjectKey> {
        self.objects
            .iter()
            .find(|(_, object)| object.name == name)
            .map(|(key, _)| key)
    }

    pub fn instance(&self, key: MaterialInstanceKey) -> RenderResult<&MaterialInstance> {
        self.instances
            .get(key)
            .ok_or(RenderError::UnknownHandle("material instance"))
    }

    /// The material instance of `object`.
    pub fn instance_of(&self, object: ObjectKey) -> RenderResult<&MaterialInstance> {
        self.instance(self.object(object)?.instance)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectKey, &RenderObject)> {
        self.objects.iter()
    }

    pub fn shadow_casters(&self) -> impl Iterator<Item = (ObjectKey, &RenderObject)> {
        self.objects.iter().filter(|(_, object)| object.casts_shadow)
    }

    #[inline]
    pub fn groups(&self) -> &[MaterialGroup] {
        &self.groups
    }

    pub fn shadow_layout(&self) -> RenderResult<LayoutKey> {
        self.shadow_layout
            .ok_or(RenderError::NotInitialized("shadow set layout"))
    }

    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn all_ready(&self) -> bool {
        self.instances
            .values()
            .all(|instance| instance.state() == MaterialState::Ready)
    }

    /// Frees instance uniforms and main pipelines. Layouts and sets belong
    /// to the composer.
    pub fn destroy<B: GpuBackend>(&mut self, store: &mut PerFrameUniformStore, backend: &mut B) {
        for instance in self.instances.values_mut() {
            instance.destroy(store, backend);
        }
        self.destroy_pipelines(backend);
        self.instances.clear();
        self.objects.clear();
        self.base_materials.clear();
        self.groups.clear();
        self.shadow_layout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ResourceRef;
    use crate::headless::{HeadlessBackend, ImageKind};
    use umbra_rhi::pipeline::CullMode;
    use umbra_resources::{BaseMaterialDescription, DirectoryAssets, ObjectDescription};
    use umbra_scene::Light;

    fn description() -> SceneDescription {
        SceneDescription {
            base_materials: vec![
                BaseMaterialDescription::new("lit", "lit.vert.spv", "lit.frag.spv")
                    .with_textures(1, Some("builtin:white")),
                BaseMaterialDescription::new("flat", "flat.vert.spv", "flat.frag.spv"),
            ],
            objects: vec![
                ObjectDescription::new("a", "lit", "builtin:cube"),
                ObjectDescription::new("b", "flat", "builtin:plane").with_shadow(false),
                ObjectDescription::new("c", "lit", "builtin:cube"),
            ],
            lights: vec![Light::default(), Light::default()],
        }
    }

    fn build(frames: usize) -> (HeadlessBackend, DescriptorComposer, SceneGraph) {
        let desc = description();
        let mut backend = HeadlessBackend::new(32, 32);
        let mut composer = DescriptorComposer::new();
        let mut store = PerFrameUniformStore::new();
        let mut loader = DirectoryAssets::new(".");
        let assets = GpuAssets::upload(&desc, &mut loader, &mut backend).unwrap();
        let lights = LightUniforms::new(&mut store, &mut backend, 2, frames).unwrap();
        let graph = SceneGraph::build(
            &desc,
            &assets,
            &mut backend,
            &mut composer,
            &mut store,
            &lights,
            frames,
            0,
        )
        .unwrap();
        (backend, composer, graph)
    }

    #[test]
    fn objects_are_grouped_by_base_material() {
        let (_, _, graph) = build(2);
        let names: Vec<Vec<&str>> = graph
            .groups()
            .iter()
            .map(|g| {
                g.objects
                    .iter()
                    .map(|&k| graph.object(k).unwrap().name.as_str())
                    .collect()
            })
            .collect();
        assert_eq!(names, vec![vec!["a", "c"], vec!["b"]]);
        assert_eq!(graph.shadow_casters().count(), 2);
    }

    #[test]
    fn demand_is_exact_per_instance_and_slot() {
        let (_, composer, graph) = build(3);
        let (sizes, sets) = graph.descriptor_demand(3);
        // lit: UB 2*2+3 = 7, CIS 2+1 = 3; flat: UB 7, CIS 2.
        assert_eq!(sizes, PoolSizes::new(7 * 3 * 3, (3 + 3 + 2) * 3));
        assert_eq!(sets, 3 * 2 * 3);
        assert_eq!(composer.allocated_sets(), sets);
    }

    #[test]
    fn built_graph_is_unattached_until_shadow_maps_arrive() {
        let (mut backend, composer, mut graph) = build(2);
        assert!(!graph.all_ready());
        let a = graph.object_by_name("a").unwrap();
        assert!(matches!(
            graph.instance_of(a).unwrap().descriptor_set(0),
            Err(RenderError::ReadSetBeforeReady { .. })
        ));

        let pass = backend.create_shadow_render_pass().unwrap();
        let extent = backend.surface_extent();
        let maps: Vec<_> = (0..2)
            .map(|_| backend.create_shadow_target(extent, pass).unwrap().image)
            .collect();
        graph
            .attach_shadow_resources(&mut backend, &composer, &maps)
            .unwrap();
        assert!(graph.all_ready());
    }

    #[test]
    fn scene_without_lights_is_rejected() {
        let mut desc = description();
        desc.lights.clear();
        let mut backend = HeadlessBackend::new(32, 32);
        let mut composer = DescriptorComposer::new();
        let mut store = PerFrameUniformStore::new();
        let mut loader = DirectoryAssets::new(".");
        let assets = GpuAssets::upload(&desc, &mut loader, &mut backend).unwrap();
        let lights = LightUniforms::new(&mut store, &mut backend, 0, 1).unwrap();
        let result = SceneGraph::build(
            &desc,
            &assets,
            &mut backend,
            &mut composer,
            &mut store,
            &lights,
            1,
            0,
        );
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn cubemap_materials_bind_a_cube_and_cull_front_faces() {
        let mut desc = description();
        desc.base_materials.push(
            BaseMaterialDescription::new("sky", "skybox.vert.spv", "skybox.frag.spv")
                .with_textures(1, Some("builtin:sky"))
                .with_cubemap(),
        );
        desc.objects
            .push(ObjectDescription::new("sky", "sky", "builtin:cube").with_shadow(false));

        let mut backend = HeadlessBackend::new(32, 32);
        let mut composer = DescriptorComposer::new();
        let mut store = PerFrameUniformStore::new();
        let mut loader = DirectoryAssets::new(".");
        let assets = GpuAssets::upload(&desc, &mut loader, &mut backend).unwrap();
        let lights = LightUniforms::new(&mut store, &mut backend, 2, 1).unwrap();
        let mut graph = SceneGraph::build(
            &desc,
            &assets,
            &mut backend,
            &mut composer,
            &mut store,
            &lights,
            1,
            0,
        )
        .unwrap();
        let pass = backend.create_shadow_render_pass().unwrap();
        let extent = backend.surface_extent();
        let map = backend.create_shadow_target(extent, pass).unwrap().image;
        graph
            .attach_shadow_resources(&mut backend, &composer, &[map])
            .unwrap();
        let main = backend.main_render_pass();
        graph.create_pipelines(&mut backend, main).unwrap();

        let sky = graph.object_by_name("sky").unwrap();
        let instance = graph.instance_of(sky).unwrap();
        let cube = assets.cubemap("builtin:sky").unwrap();
        let binding = instance.binding_layout().texture(0);
        assert_eq!(
            backend.set_binding(instance.descriptor_set(0).unwrap(), binding),
            Some(ResourceRef::Cubemap(cube))
        );
        assert_eq!(backend.image_kind(cube), Some(ImageKind::Cubemap));

        let base = graph.base_material(instance.base()).unwrap();
        let pipeline = backend.pipeline_desc(base.pipeline().unwrap()).unwrap();
        assert_eq!(pipeline.cull_mode, CullMode::Front);

        // 2D materials keep their flat texture binding.
        let a = graph.instance_of(graph.object_by_name("a").unwrap()).unwrap();
        assert_eq!(
            backend.set_binding(a.descriptor_set(0).unwrap(), a.binding_layout().texture(0)),
            Some(ResourceRef::Texture(assets.texture("builtin:white").unwrap()))
        );
    }
}

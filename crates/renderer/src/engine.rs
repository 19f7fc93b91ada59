//! The frame engine: scene load, frame resource setup, the per-frame loop,
//! resize and shutdown.
//!
//! # Example
//!
//! ```
//! use umbra_core::EngineConfig;
//! use umbra_platform::InputContext;
//! use umbra_renderer::{Engine, GpuBackend, HeadlessBackend};
//! use umbra_resources::{BaseMaterialDescription, DirectoryAssets, ObjectDescription, SceneDescription};
//! use umbra_scene::Light;
//!
//! # fn main() -> umbra_renderer::RenderResult<()> {
//! let scene = SceneDescription {
//!     base_materials: vec![BaseMaterialDescription::new("lit", "lit.vert.spv", "lit.frag.spv")],
//!     objects: vec![ObjectDescription::new("cube", "lit", "builtin:cube")],
//!     lights: vec![Light::default()],
//! };
//! let mut engine = Engine::new(HeadlessBackend::new(640, 480), EngineConfig::default())?;
//! engine.load_scene(scene, &mut DirectoryAssets::new("assets"))?;
//! engine.init_frame_resources(engine.backend().surface_extent(), 2)?;
//! let report = engine.render_frame(1.0 / 60.0, &InputContext::new())?;
//! assert_eq!(report.frame_slot, 0);
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

use tracing::{debug, error, info, warn};

use umbra_core::EngineConfig;
use umbra_platform::InputContext;
use umbra_resources::{AssetLoader, SceneDescription};
use umbra_rhi::vk;
use umbra_scene::{Camera, FlyController, Light};

use crate::assets::GpuAssets;
use crate::backend::{BufferKey, GpuBackend, ImageKey, PresentOutcome};
use crate::descriptor_composer::DescriptorComposer;
use crate::error::{RenderError, RenderResult};
use crate::frame_graph::FrameGraph;
use crate::frame_sync::{BeginFrame, FrameSynchronizer, FrameTicket};
use crate::light_uniforms::LightUniforms;
use crate::scene_graph::{ObjectKey, SceneGraph};
use crate::shadow::ShadowPassResources;
use crate::uniform_store::PerFrameUniformStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was drawn; the surface was stale and has been rebuilt.
    SkippedStale,
    /// The frame was presented, then the surface was rebuilt.
    PresentedStale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_slot: usize,
    /// `None` when no swap image was acquired.
    pub image_index: Option<u32>,
    pub status: FrameStatus,
}

/// Everything created by `init_frame_resources`, in creation order.
#[derive(Default)]
struct PartialFrame {
    sync: Option<FrameSynchronizer>,
    lights: Option<LightUniforms>,
    composer: DescriptorComposer,
    scene: Option<SceneGraph>,
    shadow: Option<ShadowPassResources>,
}

impl PartialFrame {
    /// Tears down in reverse creation order.
    fn destroy<B: GpuBackend>(mut self, backend: &mut B, store: &mut PerFrameUniformStore) {
        if let Some(scene) = self.scene.as_mut() {
            scene.destroy_pipelines(backend);
        }
        if let Some(mut shadow) = self.shadow.take() {
            shadow.destroy(backend);
        }
        if let Some(mut scene) = self.scene.take() {
            scene.destroy(store, backend);
        }
        self.composer.destroy(backend);
        if let Some(lights) = self.lights.take() {
            lights.destroy(store, backend);
        }
        if let Some(mut sync) = self.sync.take() {
            sync.destroy(backend);
        }
    }
}

struct FrameResources {
    sync: FrameSynchronizer,
    lights: LightUniforms,
    composer: DescriptorComposer,
    scene: SceneGraph,
    shadow: ShadowPassResources,
    graph: FrameGraph,
}

impl FrameResources {
    fn into_partial(self) -> PartialFrame {
        PartialFrame {
            sync: Some(self.sync),
            lights: Some(self.lights),
            composer: self.composer,
            scene: Some(self.scene),
            shadow: Some(self.shadow),
        }
    }
}

pub struct Engine<B: GpuBackend> {
    backend: B,
    config: EngineConfig,
    camera: Camera,
    controller: FlyController,
    scene_desc: Option<SceneDescription>,
    lights: Vec<Light>,
    assets: Option<GpuAssets>,
    store: PerFrameUniformStore,
    frame: Option<FrameResources>,
    extent: vk::Extent2D,
    /// Set while the surface awaits a rebuild (stale report or zero-size resize).
    surface_stale: bool,
    shut_down: bool,
}

impl<B: GpuBackend> Engine<B> {
    pub fn new(backend: B, config: EngineConfig) -> RenderResult<Self> {
        config.validate()?;
        let extent = backend.surface_extent();
        let camera = Camera::from_config(&config.camera, aspect(extent));
        let controller = FlyController::from_config(&config.camera);
        Ok(Self {
            backend,
            config,
            camera,
            controller,
            scene_desc: None,
            lights: Vec::new(),
            assets: None,
            store: PerFrameUniformStore::new(),
            frame: None,
            extent,
            surface_stale: false,
            shut_down: false,
        })
    }

    /// Validates `desc` and uploads its immutable meshes and textures.
    pub fn load_scene<L: AssetLoader + ?Sized>(
        &mut self,
        desc: SceneDescription,
        loader: &mut L,
    ) -> RenderResult<()> {
        if self.frame.is_some() {
            return Err(RenderError::Config(
                "scene must be loaded before frame resources are created".into(),
            ));
        }
        desc.validate()?;
        if desc.lights.is_empty() {
            return Err(RenderError::Config("scene needs at least one light".into()));
        }
        if self.config.shadow.light_index >= desc.lights.len() {
            return Err(RenderError::Config(format!(
                "shadow light {} out of range for {} lights",
                self.config.shadow.light_index,
                desc.lights.len()
            )));
        }

        if let Some(mut old) = self.assets.take() {
            old.destroy(&mut self.backend);
        }
        let assets = GpuAssets::upload(&desc, loader, &mut self.backend)?;
        info!(
            "Loaded scene: {} base materials, {} objects, {} lights",
            desc.base_materials.len(),
            desc.objects.len(),
            desc.lights.len()
        );
        self.lights = desc.lights.clone();
        self.assets = Some(assets);
        self.scene_desc = Some(desc);
        self.shut_down = false;
        Ok(())
    }

    /// Creates every per-slot resource and brings all material instances
    /// to `Ready`. On failure nothing created here is left behind.
    pub fn init_frame_resources(&mut self, extent: vk::Extent2D, frame_count: usize) -> RenderResult<()> {
        if self.frame.is_some() {
            return Err(RenderError::Config("frame resources already initialized".into()));
        }
        if frame_count == 0 {
            return Err(RenderError::Config("frame_count must be at least 1".into()));
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Config("cannot initialize at a zero extent".into()));
        }

        let mut partial = PartialFrame::default();
        match self.build_frame(&mut partial, extent, frame_count) {
            Ok(graph) => {
                let (Some(sync), Some(lights), Some(scene), Some(shadow)) = (
                    partial.sync.take(),
                    partial.lights.take(),
                    partial.scene.take(),
                    partial.shadow.take(),
                ) else {
                    return Err(RenderError::NotInitialized("frame resources"));
                };
                self.frame = Some(FrameResources {
                    sync,
                    lights,
                    composer: std::mem::take(&mut partial.composer),
                    scene,
                    shadow,
                    graph,
                });
                self.shut_down = false;
                info!(
                    "Frame resources ready: {} slots at {}x{}",
                    frame_count, self.extent.width, self.extent.height
                );
                Ok(())
            }
            Err(e) => {
                error!("Frame resource initialization failed: {}", e);
                partial.destroy(&mut self.backend, &mut self.store);
                Err(e)
            }
        }
    }

    fn build_frame(
        &mut self,
        partial: &mut PartialFrame,
        extent: vk::Extent2D,
        frame_count: usize,
    ) -> RenderResult<FrameGraph> {
        let desc = self
            .scene_desc
            .as_ref()
            .ok_or(RenderError::NotInitialized("init_frame_resources"))?;
        let assets = self
            .assets
            .as_ref()
            .ok_or(RenderError::NotInitialized("init_frame_resources"))?;
        let backend = &mut self.backend;
        let store = &mut self.store;

        let extent = if extent != backend.surface_extent() {
            backend.rebuild_surface(extent)?
        } else {
            extent
        };
        self.extent = extent;
        self.camera.set_viewport(extent.width, extent.height);

        let sync = partial.sync.insert(FrameSynchronizer::new(
            backend,
            frame_count,
            self.config.fence_timeout,
            self.config.acquire_timeout,
        )?);
        debug!("Step 1/6: {} frame slots", sync.slot_count());

        let lights = partial.lights.insert(LightUniforms::new(
            store,
            backend,
            desc.lights.len(),
            frame_count,
        )?);
        debug!("Step 2/6: {} light uniforms per slot", lights.light_count());

        let shadow_light = self.config.shadow.light_index;
        let scene = partial.scene.insert(SceneGraph::build(
            desc,
            assets,
            backend,
            &mut partial.composer,
            store,
            lights,
            frame_count,
            shadow_light,
        )?);
        debug!("Step 3/6: scene graph with {} objects", scene.object_count());

        let shadow = partial.shadow.insert(ShadowPassResources::new(
            backend,
            scene.shadow_layout()?,
            frame_count,
            extent,
            &self.config.shadow,
        )?);
        debug!("Step 4/6: shadow pass resources");

        scene.attach_shadow_resources(backend, &partial.composer, &shadow.shadow_maps())?;
        debug!("Step 5/6: shadow maps attached");

        let main_pass = backend.main_render_pass();
        scene.create_pipelines(backend, main_pass)?;
        debug!("Step 6/6: main pipelines");

        Ok(FrameGraph::new(main_pass, self.config.clear_color))
    }

    /// Runs one frame: wait, update this slot's uniforms, record, submit,
    /// present. Returns once presentation is queued.
    pub fn render_frame(&mut self, dt: f32, input: &InputContext) -> RenderResult<FrameReport> {
        let frame = self
            .frame
            .as_mut()
            .ok_or(RenderError::NotInitialized("render_frame"))?;

        if self.surface_stale {
            if self.extent.width == 0 || self.extent.height == 0 {
                return Ok(FrameReport {
                    frame_slot: frame.sync.current_slot(),
                    image_index: None,
                    status: FrameStatus::SkippedStale,
                });
            }
            let extent = self.extent;
            self.extent = rebuild_extent_resources(&mut self.backend, frame, extent)?;
            self.camera.set_viewport(self.extent.width, self.extent.height);
            self.surface_stale = false;
        }

        self.controller.update(&mut self.camera, input, dt);

        let ticket = match frame.sync.begin_frame(&mut self.backend)? {
            BeginFrame::Ready(ticket) => ticket,
            BeginFrame::Stale => {
                let slot = frame.sync.current_slot();
                warn!("Skipping frame on slot {}: surface is stale", slot);
                let extent = self.extent;
                self.extent = rebuild_extent_resources(&mut self.backend, frame, extent)?;
                self.camera.set_viewport(self.extent.width, self.extent.height);
                return Ok(FrameReport {
                    frame_slot: slot,
                    image_index: None,
                    status: FrameStatus::SkippedStale,
                });
            }
        };

        // The slot fence has been waited on; its uniforms are ours to write.
        update_uniforms(
            &mut self.backend,
            &self.store,
            frame,
            &ticket,
            &self.camera,
            &self.lights,
            self.config.shadow.light_index,
        )?;

        let commands = frame
            .graph
            .record(&ticket, &frame.scene, &frame.shadow, self.extent)?;
        self.backend.record(ticket.command_buffer, commands)?;
        frame.sync.submit(&mut self.backend, &ticket)?;
        let outcome = frame.sync.present(&mut self.backend, &ticket)?;

        let status = if outcome == PresentOutcome::Stale || ticket.suboptimal {
            let extent = self.extent;
            self.extent = rebuild_extent_resources(&mut self.backend, frame, extent)?;
            self.camera.set_viewport(self.extent.width, self.extent.height);
            FrameStatus::PresentedStale
        } else {
            FrameStatus::Presented
        };

        Ok(FrameReport {
            frame_slot: ticket.slot,
            image_index: Some(ticket.image_index),
            status,
        })
    }

    /// Rebuilds extent-sized resources at `extent`. A zero extent
    /// (minimized window) is deferred until a real size arrives.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        if extent.width == 0 || extent.height == 0 {
            warn!("Deferring resize to zero extent {}x{}", extent.width, extent.height);
            self.extent = extent;
            self.surface_stale = true;
            return Ok(());
        }
        let Some(frame) = self.frame.as_mut() else {
            self.extent = extent;
            self.camera.set_viewport(extent.width, extent.height);
            return Ok(());
        };
        self.extent = rebuild_extent_resources(&mut self.backend, frame, extent)?;
        self.camera.set_viewport(self.extent.width, self.extent.height);
        self.surface_stale = false;
        info!("Resized to {}x{}", self.extent.width, self.extent.height);
        Ok(())
    }

    /// Waits for the device, then destroys everything in reverse creation
    /// order. Calling it again does nothing until a scene is loaded or
    /// frame resources are created again.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.backend.wait_idle()?;
        if let Some(frame) = self.frame.take() {
            frame
                .into_partial()
                .destroy(&mut self.backend, &mut self.store);
        }
        if let Some(mut assets) = self.assets.take() {
            assets.destroy(&mut self.backend);
        }
        self.store.destroy_all(&mut self.backend);
        self.shut_down = true;
        info!("Engine shut down");
        Ok(())
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Scene lights; edits take effect from the next frame.
    pub fn lights_mut(&mut self) -> &mut [Light] {
        &mut self.lights
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn scene(&self) -> Option<&SceneGraph> {
        self.frame.as_ref().map(|f| &f.scene)
    }

    pub fn frame_slot_count(&self) -> usize {
        self.frame.as_ref().map_or(0, |f| f.sync.slot_count())
    }

    /// Shadow maps in slot order.
    pub fn shadow_maps(&self) -> Vec<ImageKey> {
        self.frame
            .as_ref()
            .map(|f| f.shadow.shadow_maps())
            .unwrap_or_default()
    }

    /// The MVP buffer `object` uses in `slot`.
    pub fn mvp_buffer(&self, object: ObjectKey, slot: usize) -> RenderResult<BufferKey> {
        let frame = self
            .frame
            .as_ref()
            .ok_or(RenderError::NotInitialized("mvp_buffer"))?;
        frame.scene.instance_of(object)?.mvp_buffer(slot)
    }
}

impl<B: GpuBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Engine shutdown failed during drop: {}", e);
        }
    }
}

/// Writes the camera, light and per-object uniforms of `ticket.slot`.
fn update_uniforms<B: GpuBackend>(
    backend: &mut B,
    store: &PerFrameUniformStore,
    frame: &FrameResources,
    ticket: &FrameTicket,
    camera: &Camera,
    lights: &[Light],
    shadow_light: usize,
) -> RenderResult<()> {
    let slot = ticket.slot;
    let view = camera.view_matrix();
    let proj = camera.projection_matrix();
    frame
        .lights
        .update(store, backend, slot, lights, &view, shadow_light)?;

    for (_, object) in frame.scene.objects() {
        let instance = frame.scene.instance(object.instance)?;
        let model = object.transform.model_matrix();
        instance.update_transform(store, backend, slot, model, view, proj)?;
        for (i, light) in lights.iter().enumerate() {
            let light_space = frame.shadow.compute_light_space_mvp(light, model);
            instance.update_light_space(store, backend, slot, i, &light_space)?;
        }
    }
    Ok(())
}

/// Rebuilds the surface and shadow targets at `extent`, then repoints the
/// shadow-map bindings. Returns the extent obtained.
fn rebuild_extent_resources<B: GpuBackend>(
    backend: &mut B,
    frame: &mut FrameResources,
    extent: vk::Extent2D,
) -> RenderResult<vk::Extent2D> {
    frame.sync.wait_all(backend)?;
    let actual = backend.rebuild_surface(extent)?;
    frame.shadow.rebuild(backend, actual)?;
    frame
        .scene
        .attach_shadow_resources(backend, &frame.composer, &frame.shadow.shadow_maps())?;
    debug!("Extent-sized resources rebuilt at {}x{}", actual.width, actual.height);
    Ok(actual)
}

fn aspect(extent: vk::Extent2D) -> f32 {
    extent.width.max(1) as f32 / extent.height.max(1) as f32
}

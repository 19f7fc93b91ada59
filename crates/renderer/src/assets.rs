//! Immutable meshes and textures uploaded once at scene load.

use std::collections::HashMap;

use tracing::{debug, info};

use umbra_resources::{AssetLoader, SceneDescription};

use crate::backend::{GpuBackend, GpuMesh, ImageKey};
use crate::error::{RenderError, RenderResult};

/// GPU copies of every mesh and texture a scene names, keyed by name.
///
/// Textures of cubemap base materials are loaded as six-layer cubes and
/// kept apart from 2D textures, so one name may exist in both forms.
#[derive(Debug, Default)]
pub struct GpuAssets {
    meshes: HashMap<String, GpuMesh>,
    textures: HashMap<String, ImageKey>,
    cubemaps: HashMap<String, ImageKey>,
}

impl GpuAssets {
    /// Loads and uploads each distinct mesh and texture of `desc` once.
    pub fn upload<B: GpuBackend, L: AssetLoader + ?Sized>(
        desc: &SceneDescription,
        loader: &mut L,
        backend: &mut B,
    ) -> RenderResult<Self> {
        let mut assets = Self::default();
        for object in &desc.objects {
            if !assets.meshes.contains_key(&object.mesh) {
                let mesh = loader.load_mesh(&object.mesh)?;
                let gpu = backend.upload_mesh(&mesh)?;
                debug!("Uploaded mesh '{}'", object.mesh);
                assets.meshes.insert(object.mesh.clone(), gpu);
            }
            let cubemap = desc
                .base_material(&object.base_material)
                .is_some_and(|base| base.cubemap);
            for name in desc.resolved_textures(object)? {
                let uploaded = if cubemap {
                    &mut assets.cubemaps
                } else {
                    &mut assets.textures
                };
                if uploaded.contains_key(&name) {
                    continue;
                }
                let texture = if cubemap {
                    loader.load_cubemap(&name)?
                } else {
                    loader.load_texture(&name)?
                };
                let image = backend.create_texture(&texture)?;
                debug!("Uploaded {} '{}'", if cubemap { "cubemap" } else { "texture" }, name);
                uploaded.insert(name, image);
            }
        }
        info!(
            "Uploaded {} meshes, {} textures and {} cubemaps",
            assets.meshes.len(),
            assets.textures.len(),
            assets.cubemaps.len()
        );
        Ok(assets)
    }

    pub fn mesh(&self, name: &str) -> RenderResult<GpuMesh> {
        self.meshes
            .get(name)
            .copied()
            .ok_or(RenderError::UnknownHandle("mesh"))
    }

    pub fn texture(&self, name: &str) -> RenderResult<ImageKey> {
        self.textures
            .get(name)
            .copied()
            .ok_or(RenderError::UnknownHandle("texture"))
    }

    pub fn cubemap(&self, name: &str) -> RenderResult<ImageKey> {
        self.cubemaps
            .get(name)
            .copied()
            .ok_or(RenderError::UnknownHandle("cubemap"))
    }

    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B) {
        for (_, mesh) in self.meshes.drain() {
            backend.destroy_buffer(mesh.vertex_buffer);
            backend.destroy_buffer(mesh.index_buffer);
        }
        for (_, image) in self.textures.drain().chain(self.cubemaps.drain()) {
            backend.destroy_image(image);
        }
    }
}

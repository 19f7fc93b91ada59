//! Declarative scene description consumed once at load.
//!
//! A description lists the base materials (shader pair plus texture
//! arity), the objects that instantiate them and the scene lights.
//! [`SceneDescription::validate`] checks cross references before anything
//! touches the GPU.

use std::collections::HashSet;
use std::path::PathBuf;

use umbra_scene::{Light, Transform};

use crate::error::{ResourceError, ResourceResult};
use crate::material::MaterialProperties;

/// Lights are read once and used as-is.
pub type LightDescription = Light;

#[derive(Clone, Debug, PartialEq)]
pub struct BaseMaterialDescription {
    pub name: String,
    /// SPIR-V vertex shader.
    pub vertex_shader: PathBuf,
    /// SPIR-V fragment shader.
    pub fragment_shader: PathBuf,
    /// Number of material texture bindings (T).
    pub texture_count: usize,
    /// Used for every texture slot of an object that lists none.
    pub default_texture: Option<String>,
    pub cull_back_faces: bool,
    /// Binds its single texture as a cubemap and culls front faces, for
    /// geometry viewed from inside (sky boxes).
    pub cubemap: bool,
}

impl BaseMaterialDescription {
    pub fn new(name: impl Into<String>, vertex_shader: impl Into<PathBuf>, fragment_shader: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            texture_count: 0,
            default_texture: None,
            cull_back_faces: true,
            cubemap: false,
        }
    }

    pub fn with_textures(mut self, count: usize, default_texture: Option<&str>) -> Self {
        self.texture_count = count;
        self.default_texture = default_texture.map(str::to_string);
        self
    }

    pub fn with_back_face_culling(mut self, enabled: bool) -> Self {
        self.cull_back_faces = enabled;
        self
    }

    /// Texture names of objects under this material name cubemap folders.
    pub fn with_cubemap(mut self) -> Self {
        self.cubemap = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectDescription {
    pub name: String,
    pub base_material: String,
    /// Mesh name resolved by the [`AssetLoader`](crate::AssetLoader).
    pub mesh: String,
    /// Texture names in binding order.
    pub textures: Vec<String>,
    pub properties: MaterialProperties,
    pub transform: Transform,
    pub casts_shadow: bool,
}

impl ObjectDescription {
    pub fn new(name: impl Into<String>, base_material: impl Into<String>, mesh: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_material: base_material.into(),
            mesh: mesh.into(),
            textures: Vec::new(),
            properties: MaterialProperties::default(),
            transform: Transform::default(),
            casts_shadow: true,
        }
    }

    pub fn with_textures<I, S>(mut self, textures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.textures = textures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_properties(mut self, properties: MaterialProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_shadow(mut self, casts_shadow: bool) -> Self {
        self.casts_shadow = casts_shadow;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneDescription {
    pub base_materials: Vec<BaseMaterialDescription>,
    pub objects: Vec<ObjectDescription>,
    pub lights: Vec<LightDescription>,
}

impl SceneDescription {
    pub fn base_material(&self, name: &str) -> Option<&BaseMaterialDescription> {
        self.base_materials.iter().find(|m| m.name == name)
    }

    fn base_of(&self, object: &ObjectDescription) -> ResourceResult<&BaseMaterialDescription> {
        self.base_material(&object.base_material).ok_or_else(|| {
            ResourceError::InvalidScene(format!(
                "object '{}' references unknown base material '{}'",
                object.name, object.base_material
            ))
        })
    }

    /// Texture names for `object`, substituting the base material default
    /// when the object lists none.
    pub fn resolved_textures(&self, object: &ObjectDescription) -> ResourceResult<Vec<String>> {
        let base = self.base_of(object)?;
        let textures = match (&object.textures[..], &base.default_texture) {
            ([], Some(default)) => vec![default.clone(); base.texture_count],
            _ => object.textures.clone(),
        };
        if textures.len() != base.texture_count {
            return Err(ResourceError::InvalidScene(format!(
                "object '{}' supplies {} texture(s) but base material '{}' binds {}",
                object.name,
                textures.len(),
                base.name,
                base.texture_count
            )));
        }
        Ok(textures)
    }

    /// The object's properties with `is_cubemap` taken from its base material.
    pub fn resolved_properties(&self, object: &ObjectDescription) -> ResourceResult<MaterialProperties> {
        let base = self.base_of(object)?;
        Ok(MaterialProperties {
            is_cubemap: base.cubemap,
            ..object.properties
        })
    }

    /// Checks names are unique and every object resolves against its base material.
    pub fn validate(&self) -> ResourceResult<()> {
        let mut names = HashSet::new();
        for material in &self.base_materials {
            if !names.insert(material.name.as_str()) {
                return Err(ResourceError::InvalidScene(format!(
                    "duplicate base material '{}'",
                    material.name
                )));
            }
            if material.cubemap && material.texture_count != 1 {
                return Err(ResourceError::InvalidScene(format!(
                    "cubemap base material '{}' binds {} textures, expected 1",
                    material.name, material.texture_count
                )));
            }
        }

        let mut names = HashSet::new();
        for object in &self.objects {
            if !names.insert(object.name.as_str()) {
                return Err(ResourceError::InvalidScene(format!(
                    "duplicate object '{}'",
                    object.name
                )));
            }
            self.resolved_textures(object)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> SceneDescription {
        SceneDescription {
            base_materials: vec![
                BaseMaterialDescription::new("lit", "lit.vert.spv", "lit.frag.spv")
                    .with_textures(1, Some("builtin:white")),
            ],
            objects: vec![ObjectDescription::new("crate", "lit", "builtin:cube")],
            lights: vec![Light::default()],
        }
    }

    #[test]
    fn default_texture_fills_every_slot() {
        let mut desc = scene();
        desc.base_materials[0].texture_count = 2;
        let textures = desc.resolved_textures(&desc.objects[0]).unwrap();
        assert_eq!(textures, ["builtin:white", "builtin:white"]);
    }

    #[test]
    fn explicit_textures_win() {
        let mut desc = scene();
        desc.objects[0].textures = vec!["bricks.png".into()];
        assert_eq!(
            desc.resolved_textures(&desc.objects[0]).unwrap(),
            ["bricks.png"]
        );
    }

    #[test]
    fn missing_default_is_a_count_mismatch() {
        let mut desc = scene();
        desc.base_materials[0].default_texture = None;
        assert!(matches!(
            desc.validate(),
            Err(ResourceError::InvalidScene(_))
        ));
    }

    #[test]
    fn cubemap_materials_bind_one_texture() {
        let mut desc = scene();
        desc.base_materials.push(
            BaseMaterialDescription::new("sky", "skybox.vert.spv", "skybox.frag.spv")
                .with_textures(2, Some("builtin:sky"))
                .with_cubemap(),
        );
        assert!(matches!(
            desc.validate(),
            Err(ResourceError::InvalidScene(_))
        ));
        desc.base_materials[1].texture_count = 1;
        desc.validate().unwrap();
    }

    #[test]
    fn cubemap_flag_comes_from_the_base_material() {
        let mut desc = scene();
        desc.base_materials.push(
            BaseMaterialDescription::new("sky", "skybox.vert.spv", "skybox.frag.spv")
                .with_textures(1, Some("builtin:sky"))
                .with_cubemap(),
        );
        desc.objects.push(ObjectDescription::new("sky", "sky", "builtin:cube"));
        assert!(!desc.resolved_properties(&desc.objects[0]).unwrap().is_cubemap);
        assert!(desc.resolved_properties(&desc.objects[1]).unwrap().is_cubemap);
    }
}

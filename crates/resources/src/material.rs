//! Per-object material properties.

use glam::Vec3;

/// Immutable shading parameters of one material instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialProperties {
    pub specular_power: f32,
    pub specular_color: Vec3,
    pub diffuse_color: Vec3,
    /// Textures are sampled as a cubemap. Scene loading overrides this with
    /// the base material's flag.
    pub is_cubemap: bool,
}

impl Default for MaterialProperties {
    fn default() -> Self {
        Self {
            specular_power: 32.0,
            specular_color: Vec3::ONE,
            diffuse_color: Vec3::ONE,
            is_cubemap: false,
        }
    }
}

impl MaterialProperties {
    pub fn blinn_phong(diffuse_color: Vec3, specular_color: Vec3, specular_power: f32) -> Self {
        Self {
            specular_power,
            specular_color,
            diffuse_color,
            is_cubemap: false,
        }
    }
}

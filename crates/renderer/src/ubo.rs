//! Uniform buffer layouts shared with the GLSL shaders.
//!
//! All structures are `#[repr(C)]`, std140-compatible and `Pod`, so they
//! can be written to host-mapped buffers with `bytemuck::bytes_of`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use umbra_resources::MaterialProperties;
use umbra_scene::Light;

/// Binding 0 of every material set.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 64   | model |
/// | 64     | 64   | view  |
/// | 128    | 64   | proj  |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MvpUniform {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl MvpUniform {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self { model, view, proj }
    }
}

/// One light, in the camera's view space.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub position: Vec4,
    pub direction: Vec4,
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    /// 0 directional, 1 point, 2 spot.
    pub kind: u32,
    /// Non-zero for the light the shadow map is rendered from.
    pub casts_shadow: u32,
    pub inner_cutoff: f32,
    pub outer_cutoff: f32,
}

impl LightUniform {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn from_light(light: &Light, view: &Mat4, casts_shadow: bool) -> Self {
        let (position, direction) = light.to_view_space(view);
        let (inner_cutoff, outer_cutoff) = light.kind.cutoffs();
        Self {
            position: position.extend(1.0),
            direction: direction.extend(0.0),
            ambient: light.ambient.extend(1.0),
            diffuse: light.diffuse.extend(1.0),
            specular: light.specular.extend(1.0),
            kind: light.kind.code(),
            casts_shadow: casts_shadow as u32,
            inner_cutoff,
            outer_cutoff,
        }
    }
}

/// Object transform as seen from a light.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightSpaceUniform {
    pub model: Mat4,
    pub light_view: Mat4,
    pub light_proj: Mat4,
}

impl LightSpaceUniform {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(model: Mat4, light_view: Mat4, light_proj: Mat4) -> Self {
        Self {
            model,
            light_view,
            light_proj,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialPropertiesUniform {
    pub specular_power: f32,
    pub is_cubemap: u32,
    pub _padding: [u32; 2],
    pub specular_color: Vec4,
    pub diffuse_color: Vec4,
}

impl MaterialPropertiesUniform {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

impl From<&MaterialProperties> for MaterialPropertiesUniform {
    fn from(props: &MaterialProperties) -> Self {
        Self {
            specular_power: props.specular_power,
            is_cubemap: props.is_cubemap as u32,
            _padding: [0; 2],
            specular_color: props.specular_color.extend(1.0),
            diffuse_color: props.diffuse_color.extend(1.0),
        }
    }
}

//! Per-slot light uniforms shared by every material instance.

use glam::Mat4;

use umbra_scene::Light;

use crate::backend::GpuBackend;
use crate::error::{RenderError, RenderResult};
use crate::ubo::LightUniform;
use crate::uniform_store::{PerFrameUniform, PerFrameUniformStore, UniformHandle};

#[derive(Debug)]
pub struct LightUniforms {
    per_light: Vec<PerFrameUniform<LightUniform>>,
}

impl LightUniforms {
    pub fn new<B: GpuBackend>(
        store: &mut PerFrameUniformStore,
        backend: &mut B,
        light_count: usize,
        frame_count: usize,
    ) -> RenderResult<Self> {
        let per_light = (0..light_count)
            .map(|_| PerFrameUniform::new(store, backend, frame_count))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self { per_light })
    }

    /// Rewrites slot `slot` of every light in the space of `view`.
    /// `shadow_light` gets its `casts_shadow` flag set.
    pub fn update<B: GpuBackend>(
        &self,
        store: &PerFrameUniformStore,
        backend: &mut B,
        slot: usize,
        lights: &[Light],
        view: &Mat4,
        shadow_light: usize,
    ) -> RenderResult<()> {
        if lights.len() != self.per_light.len() {
            return Err(RenderError::Config(format!(
                "{} lights for {} light uniforms",
                lights.len(),
                self.per_light.len()
            )));
        }
        for (i, (light, uniform)) in lights.iter().zip(&self.per_light).enumerate() {
            let value = LightUniform::from_light(light, view, i == shadow_light);
            uniform.write(store, backend, slot, &value)?;
        }
        Ok(())
    }

    pub fn handle(&self, light: usize, slot: usize) -> RenderResult<UniformHandle> {
        self.per_light
            .get(light)
            .ok_or(RenderError::UnknownHandle("light"))?
            .handle(slot)
    }

    #[inline]
    pub fn light_count(&self) -> usize {
        self.per_light.len()
    }

    pub fn destroy<B: GpuBackend>(self, store: &mut PerFrameUniformStore, backend: &mut B) {
        for uniform in self.per_light {
            uniform.destroy(store, backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use glam::Vec3;
    use umbra_scene::LightKind;

    #[test]
    fn only_the_caster_is_flagged() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut store = PerFrameUniformStore::new();
        let uniforms = LightUniforms::new(&mut store, &mut backend, 2, 2).unwrap();
        let lights = [
            Light::default(),
            Light {
                kind: LightKind::Directional,
                direction: Vec3::NEG_Z,
                ..Light::default()
            },
        ];

        uniforms
            .update(&store, &mut backend, 1, &lights, &Mat4::IDENTITY, 1)
            .unwrap();

        let read = |light: usize| {
            let buffer = uniforms.handle(light, 1).unwrap().buffer();
            bytemuck::pod_read_unaligned::<LightUniform>(&backend.read_host_buffer(buffer).unwrap())
        };
        assert_eq!(read(0).casts_shadow, 0);
        assert_eq!(read(1).casts_shadow, 1);
        assert_eq!(read(1).kind, 0);
        assert_eq!(read(1).direction, Vec3::NEG_Z.extend(0.0));
    }

    #[test]
    fn light_count_must_match() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut store = PerFrameUniformStore::new();
        let uniforms = LightUniforms::new(&mut store, &mut backend, 1, 1).unwrap();
        assert!(
            uniforms
                .update(&store, &mut backend, 0, &[], &Mat4::IDENTITY, 0)
                .is_err()
        );
    }
}

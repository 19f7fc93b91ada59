//! Declarative descriptor layouts.
//!
//! Every material set follows one convention, a pure function of the light
//! count `L` and the material texture count `T`:
//!
//! | Binding            | Contents                         | Stage    |
//! |--------------------|----------------------------------|----------|
//! | 0                  | MVP transform                    | vertex   |
//! | 1 ..= L            | light uniforms                   | fragment |
//! | L+1 ..= 2L         | light-space MVP uniforms         | vertex   |
//! | 2L+1 ..= 3L        | shadow depth maps                | fragment |
//! | 3L+1               | material properties              | fragment |
//! | 3L+2 .. 3L+2+T     | material textures                | fragment |
//!
//! The shadow pass uses a separate one-binding set holding the light-space
//! MVP of the shadow-casting light.

use crate::backend::PoolSizes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    Vertex,
    Fragment,
    VertexFragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingSpec {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub visibility: ShaderVisibility,
}

/// Ordered list of bindings making up one set layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorBindingSpec {
    bindings: Vec<BindingSpec>,
}

impl DescriptorBindingSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uniform_buffer(mut self, binding: u32, visibility: ShaderVisibility) -> Self {
        self.bindings.push(BindingSpec {
            binding,
            kind: DescriptorKind::UniformBuffer,
            visibility,
        });
        self
    }

    pub fn combined_image_sampler(mut self, binding: u32, visibility: ShaderVisibility) -> Self {
        self.bindings.push(BindingSpec {
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            visibility,
        });
        self
    }

    #[inline]
    pub fn bindings(&self) -> &[BindingSpec] {
        &self.bindings
    }

    pub fn get(&self, binding: u32) -> Option<&BindingSpec> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// Descriptors consumed by one set of this layout.
    pub fn demand(&self) -> PoolSizes {
        self.bindings
            .iter()
            .fold(PoolSizes::default(), |acc, b| match b.kind {
                DescriptorKind::UniformBuffer => acc + PoolSizes::new(1, 0),
                DescriptorKind::CombinedImageSampler => acc + PoolSizes::new(0, 1),
            })
    }
}

/// Binding indices of a material set for `L` lights and `T` textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingLayout {
    light_count: u32,
    texture_count: u32,
}

impl BindingLayout {
    pub const MVP: u32 = 0;

    pub const fn new(light_count: u32, texture_count: u32) -> Self {
        Self {
            light_count,
            texture_count,
        }
    }

    #[inline]
    pub const fn light_count(&self) -> u32 {
        self.light_count
    }

    #[inline]
    pub const fn texture_count(&self) -> u32 {
        self.texture_count
    }

    #[inline]
    pub const fn light(&self, i: u32) -> u32 {
        1 + i
    }

    #[inline]
    pub const fn light_space(&self, i: u32) -> u32 {
        self.light_count + 1 + i
    }

    #[inline]
    pub const fn shadow_map(&self, i: u32) -> u32 {
        2 * self.light_count + 1 + i
    }

    #[inline]
    pub const fn properties(&self) -> u32 {
        3 * self.light_count + 1
    }

    #[inline]
    pub const fn texture(&self, i: u32) -> u32 {
        3 * self.light_count + 2 + i
    }

    #[inline]
    pub const fn binding_count(&self) -> u32 {
        3 * self.light_count + 2 + self.texture_count
    }

    pub fn spec(&self) -> DescriptorBindingSpec {
        let mut spec = DescriptorBindingSpec::new()
            .uniform_buffer(Self::MVP, ShaderVisibility::Vertex);
        for i in 0..self.light_count {
            spec = spec.uniform_buffer(self.light(i), ShaderVisibility::Fragment);
        }
        for i in 0..self.light_count {
            spec = spec.uniform_buffer(self.light_space(i), ShaderVisibility::Vertex);
        }
        for i in 0..self.light_count {
            spec = spec.combined_image_sampler(self.shadow_map(i), ShaderVisibility::Fragment);
        }
        spec = spec.uniform_buffer(self.properties(), ShaderVisibility::Fragment);
        for i in 0..self.texture_count {
            spec = spec.combined_image_sampler(self.texture(i), ShaderVisibility::Fragment);
        }
        spec
    }

    /// Descriptors consumed by one main set plus one shadow set.
    pub fn demand_per_slot(&self) -> PoolSizes {
        PoolSizes::new(
            2 * self.light_count + 2,
            self.light_count + self.texture_count,
        ) + shadow_spec().demand()
    }
}

/// Set layout bound by the depth-only pipeline.
pub fn shadow_spec() -> DescriptorBindingSpec {
    DescriptorBindingSpec::new().uniform_buffer(0, ShaderVisibility::Vertex)
}

/// Sets consumed per material instance per frame slot.
pub const SETS_PER_INSTANCE_SLOT: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_lights_one_texture() {
        let layout = BindingLayout::new(2, 1);
        assert_eq!(layout.light(0), 1);
        assert_eq!(layout.light(1), 2);
        assert_eq!(layout.light_space(0), 3);
        assert_eq!(layout.shadow_map(1), 6);
        assert_eq!(layout.properties(), 7);
        assert_eq!(layout.texture(0), 8);
        assert_eq!(layout.binding_count(), 9);
    }

    #[test]
    fn spec_is_contiguous_and_typed() {
        let layout = BindingLayout::new(2, 1);
        let spec = layout.spec();
        let indices: Vec<u32> = spec.bindings().iter().map(|b| b.binding).collect();
        assert_eq!(indices, (0..9).collect::<Vec<_>>());
        assert_eq!(
            spec.get(layout.shadow_map(0)).map(|b| b.kind),
            Some(DescriptorKind::CombinedImageSampler)
        );
        assert_eq!(
            spec.get(layout.properties()).map(|b| b.kind),
            Some(DescriptorKind::UniformBuffer)
        );
    }

    #[test]
    fn equal_inputs_give_equal_specs() {
        assert_eq!(BindingLayout::new(3, 2).spec(), BindingLayout::new(3, 2).spec());
        assert_ne!(BindingLayout::new(3, 2).spec(), BindingLayout::new(2, 3).spec());
    }

    #[test]
    fn demand_counts_main_and_shadow_sets() {
        let layout = BindingLayout::new(1, 1);
        assert_eq!(layout.spec().demand(), PoolSizes::new(4, 2));
        assert_eq!(layout.demand_per_slot(), PoolSizes::new(5, 2));
    }

    #[test]
    fn no_lights_no_textures() {
        let layout = BindingLayout::new(0, 0);
        assert_eq!(layout.properties(), 1);
        assert_eq!(layout.spec().bindings().len(), 2);
    }
}

//! Vertex input layout for mesh pipelines.
//!
//! Meshes are uploaded as interleaved `position | normal | tex_coord`
//! records (32 bytes). The CPU-side vertex struct lives with the asset
//! types; this module only describes the layout to Vulkan.
//!
//! # Shader Locations
//!
//! - location 0: position (vec3)
//! - location 1: normal (vec3)
//! - location 2: tex_coord (vec2)

use ash::vk;

/// Byte offsets and stride of the interleaved mesh vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Offset of the position.
    pub position_offset: u32,
    /// Offset of the normal.
    pub normal_offset: u32,
    /// Offset of the texture coordinate.
    pub tex_coord_offset: u32,
}

impl VertexLayout {
    /// `vec3 position, vec3 normal, vec2 tex_coord`, tightly packed.
    pub const POSITION_NORMAL_UV: Self = Self {
        stride: 32,
        position_offset: 0,
        normal_offset: 12,
        tex_coord_offset: 24,
    };

    /// Single per-vertex binding at index 0.
    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attributes at locations 0 to 2, all read from binding 0.
    pub fn attribute_descriptions(&self) -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: self.position_offset,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: self.normal_offset,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: self.tex_coord_offset,
            },
        ]
    }
}

impl Default for VertexLayout {
    fn default() -> Self {
        Self::POSITION_NORMAL_UV
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_description() {
        let binding = VertexLayout::POSITION_NORMAL_UV.binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_descriptions() {
        let attrs = VertexLayout::default().attribute_descriptions();

        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[0].offset, 0);

        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);

        // UV is two floats after the normal.
        assert_eq!(attrs[2].location, 2);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[2].offset, 24);
    }

    #[test]
    fn test_attributes_fit_in_stride() {
        let layout = VertexLayout::POSITION_NORMAL_UV;
        assert!(layout.tex_coord_offset + 8 <= layout.stride);
    }
}

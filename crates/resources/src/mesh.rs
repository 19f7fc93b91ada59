//! Indexed triangle meshes and built-in primitives.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::error::{ResourceError, ResourceResult};

/// Interleaved vertex: position, normal, UV (32 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }
}

/// CPU-side mesh, uploaded once at scene load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Checks the mesh is a non-empty triangle list with in-range indices.
    pub fn validate(&self, name: &str) -> ResourceResult<()> {
        let invalid = |message: String| ResourceError::InvalidMesh {
            name: name.to_string(),
            message,
        };
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(invalid("mesh has no geometry".into()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} indices is not a whole number of triangles",
                self.indices.len()
            )));
        }
        let vertex_count = self.vertices.len();
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(invalid(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }
        Ok(())
    }

    /// Unit cube centred on the origin, faces wound counter-clockwise from outside.
    pub fn cube() -> Self {
        // (normal, u, v) with u x v = normal.
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let mut mesh = MeshData::default();
        for (normal, u, v) in faces {
            push_quad(&mut mesh, normal * 0.5, normal, u * 0.5, v * 0.5);
        }
        mesh
    }

    /// Unit quad in the XZ plane facing +Y.
    pub fn plane() -> Self {
        let mut mesh = MeshData::default();
        push_quad(&mut mesh, Vec3::ZERO, Vec3::Y, Vec3::X * 0.5, Vec3::NEG_Z * 0.5);
        mesh
    }
}

fn push_quad(mesh: &mut MeshData, center: Vec3, normal: Vec3, half_u: Vec3, half_v: Vec3) {
    let base = mesh.vertices.len() as u32;
    let corners = [
        (-half_u - half_v, Vec2::new(0.0, 1.0)),
        (half_u - half_v, Vec2::new(1.0, 1.0)),
        (half_u + half_v, Vec2::new(1.0, 0.0)),
        (-half_u + half_v, Vec2::new(0.0, 0.0)),
    ];
    for (offset, uv) in corners {
        mesh.vertices.push(Vertex::new(center + offset, normal, uv));
    }
    mesh.indices
        .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn vertex_layout_is_interleaved() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, normal), 12);
        assert_eq!(offset_of!(Vertex, tex_coord), 24);
    }

    #[test]
    fn cube_is_closed_and_outward() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
        cube.validate("cube").unwrap();

        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[tri[i] as usize]);
            let winding = (b.position - a.position).cross(c.position - a.position);
            // Counter-clockwise seen from outside means the face normal agrees.
            assert!(winding.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn plane_faces_up() {
        let plane = MeshData::plane();
        plane.validate("plane").unwrap();
        let [a, b, c] = [0, 1, 2].map(|i| plane.vertices[plane.indices[i] as usize].position);
        assert!((b - a).cross(c - a).y > 0.0);
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let mut mesh = MeshData::plane();
        mesh.indices[5] = 99;
        assert!(matches!(
            mesh.validate("broken"),
            Err(ResourceError::InvalidMesh { .. })
        ));
    }

    #[test]
    fn byte_views_cover_all_data() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_bytes().len(), 24 * 32);
        assert_eq!(cube.index_bytes().len(), 36 * 4);
    }
}

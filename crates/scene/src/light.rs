//! Scene lights.
//!
//! Light kinds form a closed set; each kind has one pure function for its
//! view matrix, its projection and its view-space placement.

use glam::{Mat4, Vec3};

use crate::camera::flip_y;

/// Below this length the world-up cross product is treated as degenerate.
const DEGENERATE_EPSILON: f32 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    Directional,
    Point,
    /// Cutoffs are cosines of the cone half-angles.
    Spot { inner_cutoff: f32, outer_cutoff: f32 },
}

impl LightKind {
    /// Tag written to the light uniform.
    pub fn code(self) -> u32 {
        match self {
            LightKind::Directional => 0,
            LightKind::Point => 1,
            LightKind::Spot { .. } => 2,
        }
    }

    /// `(inner, outer)` cosines; zero for lights without a cone.
    pub fn cutoffs(self) -> (f32, f32) {
        match self {
            LightKind::Spot {
                inner_cutoff,
                outer_cutoff,
            } => (inner_cutoff, outer_cutoff),
            LightKind::Directional | LightKind::Point => (0.0, 0.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            position: Vec3::new(0.0, 5.0, 0.0),
            direction: Vec3::NEG_Y,
            ambient: Vec3::splat(0.1),
            diffuse: Vec3::splat(0.8),
            specular: Vec3::ONE,
        }
    }
}

/// Frustum parameters for rendering a shadow map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowProjection {
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Light {
    /// Eye at the light position, looking along `direction`.
    pub fn view_matrix(&self) -> Mat4 {
        let direction = self.direction.normalize_or(Vec3::NEG_Y);
        let mut right = Vec3::Y.cross(direction);
        if right.length() < DEGENERATE_EPSILON {
            right = Vec3::Z.cross(direction);
        }
        let up = direction.cross(right.normalize());
        Mat4::look_at_rh(self.position, self.position + direction, up)
    }

    /// Light projection with the same Y flip as the camera.
    pub fn projection_matrix(&self, frustum: &ShadowProjection) -> Mat4 {
        let proj = match self.kind {
            LightKind::Directional => directional_projection(frustum),
            LightKind::Point | LightKind::Spot { .. } => perspective_projection(frustum),
        };
        flip_y(proj)
    }

    /// Position and direction moved into the space of `view`, per kind.
    ///
    /// Directional lights only carry a direction (w = 0), point lights only
    /// a position (w = 1), spot lights both. Unused members pass through.
    pub fn to_view_space(&self, view: &Mat4) -> (Vec3, Vec3) {
        match self.kind {
            LightKind::Directional => (self.position, view.transform_vector3(self.direction)),
            LightKind::Point => (view.transform_point3(self.position), self.direction),
            LightKind::Spot { .. } => (
                view.transform_point3(self.position),
                view.transform_vector3(self.direction),
            ),
        }
    }
}

fn perspective_projection(frustum: &ShadowProjection) -> Mat4 {
    Mat4::perspective_rh(
        frustum.fov_degrees.to_radians(),
        frustum.aspect,
        frustum.near,
        frustum.far,
    )
}

fn directional_projection(frustum: &ShadowProjection) -> Mat4 {
    let half = frustum.far * 0.5;
    Mat4::orthographic_rh(
        -half * frustum.aspect,
        half * frustum.aspect,
        -half,
        half,
        frustum.near,
        frustum.far,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frustum() -> ShadowProjection {
        ShadowProjection {
            fov_degrees: 90.0,
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        }
    }

    #[test]
    fn view_looks_along_direction() {
        let light = Light {
            position: Vec3::new(0.0, 0.0, 10.0),
            direction: Vec3::NEG_Z,
            ..Light::default()
        };
        // A point in front of the light lands on the view-space -Z axis.
        let p = light.view_matrix().transform_point3(Vec3::ZERO);
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
        assert!((p.z + 10.0).abs() < 1e-4);
    }

    #[test]
    fn straight_down_light_is_not_degenerate() {
        let light = Light {
            direction: Vec3::NEG_Y,
            ..Light::default()
        };
        let view = light.view_matrix();
        assert!(view.is_finite());
        let p = view.transform_point3(Vec3::ZERO);
        assert!((p.z + 5.0).abs() < 1e-4);
    }

    #[test]
    fn projections_flip_y() {
        let point = Light::default();
        let unflipped = perspective_projection(&frustum());
        assert_eq!(
            point.projection_matrix(&frustum()).y_axis.y,
            -unflipped.y_axis.y
        );

        let sun = Light {
            kind: LightKind::Directional,
            ..Light::default()
        };
        let ortho = directional_projection(&frustum());
        assert_eq!(sun.projection_matrix(&frustum()).y_axis.y, -ortho.y_axis.y);
        // Orthographic: no perspective divide.
        assert_eq!(sun.projection_matrix(&frustum()).w_axis.w, 1.0);
    }

    #[test]
    fn view_space_transform_depends_on_kind() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0));
        let base = Light {
            position: Vec3::new(1.0, 2.0, 3.0),
            direction: Vec3::NEG_Z,
            ..Light::default()
        };

        let sun = Light {
            kind: LightKind::Directional,
            ..base
        };
        let (pos, dir) = sun.to_view_space(&view);
        assert_eq!(pos, base.position);
        assert_eq!(dir, Vec3::NEG_Z); // translation ignored for vectors

        let (pos, dir) = base.to_view_space(&view);
        assert_eq!(pos, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(dir, base.direction);

        let spot = Light {
            kind: LightKind::Spot {
                inner_cutoff: 0.9,
                outer_cutoff: 0.8,
            },
            ..base
        };
        let (pos, dir) = spot.to_view_space(&view);
        assert_eq!(pos, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(dir, Vec3::NEG_Z);
        assert_eq!(spot.kind.cutoffs(), (0.9, 0.8));
        assert_eq!(spot.kind.code(), 2);
    }
}

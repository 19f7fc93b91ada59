//! World transform of a render object.
//!
//! # Example
//!
//! ```
//! use umbra_scene::Transform;
//! use glam::Vec3;
//!
//! let t = Transform::new()
//!     .with_position(Vec3::new(1.0, 0.0, 0.0))
//!     .with_uniform_scale(2.0);
//! let moved = t.model_matrix().transform_point3(Vec3::ONE);
//! assert_eq!(moved, Vec3::new(3.0, 2.0, 2.0));
//! ```

use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale, composed as `T * R * S`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_uniform_scale(self, scale: f32) -> Self {
        self.with_scale(Vec3::splat(scale))
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_by_default() {
        assert_eq!(Transform::default().model_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn scale_applies_before_translation() {
        let t = Transform::new()
            .with_position(Vec3::new(0.0, -1.0, 0.0))
            .with_scale(Vec3::new(10.0, 1.0, 10.0));
        let p = t.model_matrix().transform_point3(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(p, Vec3::new(10.0, -1.0, 10.0));
    }

    #[test]
    fn rotation_about_y() {
        let t = Transform::new().with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let p = t.model_matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::NEG_Z).length() < 1e-5);
    }
}

//! Perspective camera and a fly-through controller.

use glam::{Mat4, Vec3};
use umbra_core::CameraConfig;
use umbra_platform::{InputContext, KeyCode, MouseButton};

/// Pitch stays just short of straight up/down so `look_at` keeps a valid up vector.
const MAX_PITCH: f32 = 89.0_f32 * std::f32::consts::PI / 180.0;

/// Applies the Vulkan clip-space Y flip shared by the main and shadow passes.
#[inline]
pub fn flip_y(mut proj: Mat4) -> Mat4 {
    proj.y_axis.y *= -1.0;
    proj
}

/// Yaw/pitch camera. Yaw 0, pitch 0 looks down -Z.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Radians about +Y.
    pub yaw: f32,
    /// Radians, clamped to +-89 degrees.
    pub pitch: f32,
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default(), 16.0 / 9.0)
    }
}

impl Camera {
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 5.0),
            yaw: 0.0,
            pitch: 0.0,
            fov_degrees: config.fov_degrees,
            aspect,
            near: config.near,
            far: config.far,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, -cos_pitch * cos_yaw)
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize_or(Vec3::X)
    }

    /// Adds to yaw/pitch, clamping pitch.
    pub fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw += delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    /// Ignores degenerate sizes (minimized window).
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        flip_y(Mat4::perspective_rh(
            self.fov_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        ))
    }
}

/// WASD + Space/LeftShift movement, right-mouse-drag look.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlyController {
    /// World units per second.
    pub move_speed: f32,
    /// Radians per pixel of mouse travel.
    pub turn_speed: f32,
}

impl FlyController {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            move_speed: config.move_speed,
            turn_speed: config.turn_speed,
        }
    }

    pub fn update(&self, camera: &mut Camera, input: &InputContext, dt: f32) {
        if input.is_mouse_pressed(MouseButton::Right) {
            let (dx, dy) = input.mouse_delta();
            camera.rotate(dx * self.turn_speed, -dy * self.turn_speed);
        }

        let forward = camera.forward();
        let right = camera.right();
        let mut direction = Vec3::ZERO;
        let axes = [
            (KeyCode::KeyW, forward),
            (KeyCode::KeyS, -forward),
            (KeyCode::KeyD, right),
            (KeyCode::KeyA, -right),
            (KeyCode::Space, Vec3::Y),
            (KeyCode::ShiftLeft, Vec3::NEG_Y),
        ];
        for (key, axis) in axes {
            if input.is_key_pressed(key) {
                direction += axis;
            }
        }
        if direction != Vec3::ZERO {
            camera.position += direction.normalize() * self.move_speed * dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn default_looks_down_negative_z() {
        let camera = Camera::default();
        assert!(approx(camera.forward(), Vec3::NEG_Z));
        assert!(approx(camera.right(), Vec3::X));
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::default();
        let unflipped = Mat4::perspective_rh(
            camera.fov_degrees.to_radians(),
            camera.aspect,
            camera.near,
            camera.far,
        );
        assert_eq!(camera.projection_matrix().y_axis.y, -unflipped.y_axis.y);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate(0.0, 10.0);
        assert!(camera.pitch <= MAX_PITCH);
        camera.rotate(0.0, -20.0);
        assert!(camera.pitch >= -MAX_PITCH);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 400);
        assert_eq!(camera.aspect, 2.0);
        camera.set_viewport(0, 400);
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn fly_forward_moves_at_speed() {
        let controller = FlyController::from_config(&CameraConfig::default());
        let mut camera = Camera::default().with_position(Vec3::ZERO);
        let mut input = InputContext::new();
        input.on_key_pressed(KeyCode::KeyW);

        controller.update(&mut camera, &input, 0.5);
        assert!(approx(camera.position, Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn mouse_turns_only_while_right_button_held() {
        let controller = FlyController {
            move_speed: 1.0,
            turn_speed: 0.01,
        };
        let mut camera = Camera::default();
        let mut input = InputContext::new();
        input.on_cursor_moved(0.0, 0.0);
        input.on_cursor_moved(100.0, 0.0);

        controller.update(&mut camera, &input, 0.016);
        assert_eq!(camera.yaw, 0.0);

        input.on_mouse_pressed(MouseButton::Right);
        controller.update(&mut camera, &input, 0.016);
        assert!((camera.yaw - 1.0).abs() < 1e-5);
    }
}

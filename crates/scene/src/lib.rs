//! Scene-side math: transforms, the camera and its controller, lights.

pub mod camera;
pub mod light;
pub mod transform;

pub use camera::{Camera, FlyController, flip_y};
pub use light::{Light, LightKind, ShadowProjection};
pub use transform::Transform;

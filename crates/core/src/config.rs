//! Engine configuration.
//!
//! [`EngineConfig`] gathers every tunable the frame engine reads at
//! initialization: how many frames may be in flight, the bounded waits of the
//! frame loop, and the camera/shadow projection parameters.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding [`EngineConfig::frames_in_flight`].
pub const ENV_FRAMES_IN_FLIGHT: &str = "UMBRA_FRAMES_IN_FLIGHT";
/// Environment variable overriding [`EngineConfig::enable_validation`].
pub const ENV_VALIDATION: &str = "UMBRA_VALIDATION";

/// Shadow pass projection settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowConfig {
    /// Index of the light the shadow map is rendered from.
    pub light_index: usize,
    /// Vertical field of view for perspective light projections.
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Constant depth bias applied while rasterizing the shadow map.
    pub depth_bias_constant: f32,
    /// Slope-scaled depth bias applied while rasterizing the shadow map.
    pub depth_bias_slope: f32,
    /// SPIR-V vertex shader of the depth-only pipeline.
    pub vertex_shader: PathBuf,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            light_index: 0,
            fov_degrees: 90.0,
            near: 0.1,
            far: 100.0,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
            vertex_shader: PathBuf::from("shaders/shadow.vert.spv"),
        }
    }
}

/// Main camera settings.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// World units per second.
    pub move_speed: f32,
    /// Radians per pixel of mouse motion.
    pub turn_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 90.0,
            near: 0.1,
            far: 100.0,
            move_speed: 10.0,
            turn_speed: 0.002,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Number of frames the CPU may prepare ahead of GPU completion.
    pub frames_in_flight: usize,
    /// Upper bound on the per-slot fence wait in `begin_frame`.
    pub fence_timeout: Duration,
    /// Upper bound on swap image acquisition in `begin_frame`.
    pub acquire_timeout: Duration,
    /// Clear color of the main pass.
    pub clear_color: [f32; 4],
    pub shadow: ShadowConfig,
    pub camera: CameraConfig,
    /// Request the Khronos validation layer.
    pub enable_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            clear_color: [0.02, 0.02, 0.03, 1.0],
            shadow: ShadowConfig::default(),
            camera: CameraConfig::default(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied, validated.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_FRAMES_IN_FLIGHT) {
            config.frames_in_flight = value.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_FRAMES_IN_FLIGHT}={value:?} is not an integer"))
            })?;
        }

        if let Ok(value) = std::env::var(ENV_VALIDATION) {
            config.enable_validation = parse_flag(&value).ok_or_else(|| {
                Error::Config(format!("{ENV_VALIDATION}={value:?} is not a boolean"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_camera(mut self, camera: CameraConfig) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.fence_timeout.is_zero() || self.acquire_timeout.is_zero() {
            return Err(Error::Config("frame wait timeouts must be non-zero".into()));
        }
        check_planes("shadow", self.shadow.near, self.shadow.far)?;
        check_planes("camera", self.camera.near, self.camera.far)?;
        check_fov("shadow", self.shadow.fov_degrees)?;
        check_fov("camera", self.camera.fov_degrees)?;
        Ok(())
    }
}

fn check_planes(what: &str, near: f32, far: f32) -> Result<()> {
    if near <= 0.0 || far <= near {
        return Err(Error::Config(format!(
            "{what} clip planes must satisfy 0 < near < far (near={near}, far={far})"
        )));
    }
    Ok(())
}

fn check_fov(what: &str, fov: f32) -> Result<()> {
    if !(fov > 0.0 && fov < 180.0) {
        return Err(Error::Config(format!(
            "{what} field of view must be in (0, 180) degrees, got {fov}"
        )));
    }
    Ok(())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.shadow.light_index, 0);
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let config = EngineConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn inverted_clip_planes_are_rejected() {
        let shadow = ShadowConfig {
            near: 10.0,
            far: 1.0,
            ..ShadowConfig::default()
        };
        let config = EngineConfig::default().with_shadow(shadow);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("shadow"), "{err}");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = EngineConfig::default().with_fence_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}

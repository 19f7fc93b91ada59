//! Core utilities shared across the engine crates:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Engine configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{CameraConfig, EngineConfig, ShadowConfig, ENV_FRAMES_IN_FLIGHT, ENV_VALIDATION};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{MAX_FRAME_DELTA, Timer};

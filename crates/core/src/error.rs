//! Error types shared by the engine crates.

use thiserror::Error;

/// Main error type for engine setup and platform glue.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors raised outside the RHI layer (surface creation, extension queries)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for asset loading and scene descriptions.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    /// Mesh name the loader cannot produce.
    #[error("Unknown mesh '{0}'")]
    UnknownMesh(String),

    /// Mesh data failed validation.
    #[error("Invalid mesh '{name}': {message}")]
    InvalidMesh { name: String, message: String },

    /// Texture data failed validation.
    #[error("Invalid texture '{name}': {message}")]
    InvalidTexture { name: String, message: String },

    /// Scene description failed validation.
    #[error("Invalid scene description: {0}")]
    InvalidScene(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

pub type ResourceResult<T> = Result<T, ResourceError>;

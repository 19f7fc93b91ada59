//! Asset data and the scene-description interface.
//!
//! - Scene descriptions (base materials, objects, lights) and their validation
//! - Mesh and texture data, with built-in primitives
//! - The [`AssetLoader`] trait and a directory-backed implementation

mod error;

pub mod loader;
pub mod material;
pub mod mesh;
pub mod scene;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use loader::{AssetLoader, BUILTIN_PREFIX, DirectoryAssets};
pub use material::MaterialProperties;
pub use mesh::{MeshData, Vertex};
pub use scene::{BaseMaterialDescription, LightDescription, ObjectDescription, SceneDescription};
pub use texture::{CUBE_FACES, TextureData};

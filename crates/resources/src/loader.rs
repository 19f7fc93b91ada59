//! Mesh and texture loaders.
//!
//! The engine only sees the [`AssetLoader`] trait. [`DirectoryAssets`]
//! serves built-in primitives by name and decodes texture files relative
//! to a root directory. A cubemap is a folder holding one image per face,
//! named after [`CUBE_FACES`].

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};
use crate::mesh::MeshData;
use crate::texture::{CUBE_FACES, TextureData};

/// Prefix for assets generated in code rather than read from disk.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Resolves asset names from a scene description to CPU-side data.
pub trait AssetLoader {
    fn load_mesh(&mut self, name: &str) -> ResourceResult<MeshData>;
    fn load_texture(&mut self, name: &str) -> ResourceResult<TextureData>;
    /// Loads six faces into one cubemap ([`TextureData::is_cube`]).
    fn load_cubemap(&mut self, name: &str) -> ResourceResult<TextureData>;
}

/// Built-in meshes/textures plus image files under `root`.
///
/// Meshes: `builtin:cube`, `builtin:plane`. Textures: `builtin:white`,
/// `builtin:checker`, or any path relative to `root`. Cubemaps:
/// `builtin:sky`, or a folder relative to `root` containing `px.png`,
/// `nx.png`, `py.png`, `ny.png`, `pz.png` and `nz.png`.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("Asset root: {:?}", root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn builtin_mesh(name: &str) -> Option<MeshData> {
        match name {
            "cube" => Some(MeshData::cube()),
            "plane" => Some(MeshData::plane()),
            _ => None,
        }
    }

    fn builtin_texture(name: &str) -> Option<TextureData> {
        match name {
            "white" => Some(TextureData::white()),
            "checker" => Some(TextureData::checker(
                64,
                8,
                [200, 200, 200, 255],
                [60, 60, 60, 255],
            )),
            _ => None,
        }
    }

    fn builtin_cubemap(name: &str) -> Option<[TextureData; 6]> {
        match name {
            // Sky-blue sides, lighter zenith, darker ground.
            "sky" => Some(std::array::from_fn(|face| {
                let rgba = match CUBE_FACES[face] {
                    "py" => [180, 210, 255, 255],
                    "ny" => [70, 70, 80, 255],
                    _ => [120, 160, 230, 255],
                };
                TextureData::solid(16, 16, rgba)
            })),
            _ => None,
        }
    }

    fn read_image(&self, name: &str) -> ResourceResult<TextureData> {
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(ResourceError::FileNotFound(path));
        }
        TextureData::decode(&std::fs::read(&path)?)
    }
}

impl AssetLoader for DirectoryAssets {
    fn load_mesh(&mut self, name: &str) -> ResourceResult<MeshData> {
        let mesh = name
            .strip_prefix(BUILTIN_PREFIX)
            .and_then(Self::builtin_mesh)
            .ok_or_else(|| ResourceError::UnknownMesh(name.to_string()))?;
        mesh.validate(name)?;
        debug!(
            "Loaded mesh '{}' ({} vertices, {} indices)",
            name,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    fn load_texture(&mut self, name: &str) -> ResourceResult<TextureData> {
        let texture = match name.strip_prefix(BUILTIN_PREFIX) {
            Some(builtin) => Self::builtin_texture(builtin).ok_or_else(|| {
                ResourceError::InvalidTexture {
                    name: name.to_string(),
                    message: "no such built-in texture".into(),
                }
            })?,
            None => self.read_image(name)?,
        };
        texture.validate(name)?;
        debug!(
            "Loaded texture '{}' ({}x{})",
            name, texture.width, texture.height
        );
        Ok(texture)
    }

    fn load_cubemap(&mut self, name: &str) -> ResourceResult<TextureData> {
        let faces = match name.strip_prefix(BUILTIN_PREFIX) {
            Some(builtin) => Self::builtin_cubemap(builtin).ok_or_else(|| {
                ResourceError::InvalidTexture {
                    name: name.to_string(),
                    message: "no such built-in cubemap".into(),
                }
            })?,
            None => {
                let mut faces = Vec::with_capacity(CUBE_FACES.len());
                for stem in CUBE_FACES {
                    faces.push(self.read_image(&format!("{name}/{stem}.png"))?);
                }
                faces.try_into().map_err(|_| ResourceError::InvalidTexture {
                    name: name.to_string(),
                    message: "expected six faces".into(),
                })?
            }
        };
        let cube = TextureData::cube(name, faces)?;
        cube.validate(name)?;
        debug!("Loaded cubemap '{}' ({}x{} faces)", name, cube.width, cube.height);
        Ok(cube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let mut assets = DirectoryAssets::new(".");
        assert_eq!(assets.load_mesh("builtin:cube").unwrap().index_count(), 36);
        assert_eq!(assets.load_texture("builtin:white").unwrap().width, 1);
    }

    #[test]
    fn mesh_files_are_not_parsed() {
        let mut assets = DirectoryAssets::new(".");
        assert!(matches!(
            assets.load_mesh("models/teapot.obj"),
            Err(ResourceError::UnknownMesh(_))
        ));
    }

    #[test]
    fn missing_texture_file() {
        let mut assets = DirectoryAssets::new("/definitely/not/here");
        assert!(matches!(
            assets.load_texture("bricks.png"),
            Err(ResourceError::FileNotFound(_))
        ));
    }

    #[test]
    fn builtin_sky_is_a_cube() {
        let mut assets = DirectoryAssets::new(".");
        let sky = assets.load_cubemap("builtin:sky").unwrap();
        assert!(sky.is_cube());
        assert!(matches!(
            assets.load_cubemap("builtin:nope"),
            Err(ResourceError::InvalidTexture { .. })
        ));
    }

    #[test]
    fn cubemap_folder_reads_every_face() {
        let root = std::env::temp_dir().join(format!("umbra-cubemap-{}", std::process::id()));
        let folder = root.join("clouds");
        std::fs::create_dir_all(&folder).unwrap();
        for (i, stem) in CUBE_FACES.iter().enumerate() {
            image::RgbaImage::from_pixel(2, 2, image::Rgba([i as u8, 0, 0, 255]))
                .save(folder.join(format!("{stem}.png")))
                .unwrap();
        }

        let mut assets = DirectoryAssets::new(&root);
        let cube = assets.load_cubemap("clouds").unwrap();
        assert_eq!((cube.width, cube.height, cube.layers), (2, 2, 6));
        assert_eq!(cube.pixels[cube.layer_size() * 5], 5);

        std::fs::remove_file(folder.join("nz.png")).unwrap();
        assert!(matches!(
            assets.load_cubemap("clouds"),
            Err(ResourceError::FileNotFound(_))
        ));
        std::fs::remove_dir_all(&root).unwrap();
    }
}

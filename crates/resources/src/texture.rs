//! RGBA8 texture data and procedural textures.
//!
//! A [`TextureData`] is either a single 2D image (`layers == 1`) or the six
//! faces of a cubemap (`layers == 6`) stored back to back in
//! [`CUBE_FACES`] order.

use crate::error::{ResourceError, ResourceResult};

/// Cubemap face file stems in layer order: +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACES: [&str; 6] = ["px", "nx", "py", "ny", "pz", "nz"];

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// 1 for a 2D texture, 6 for a cubemap.
    pub layers: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decodes any format the `image` crate was built with.
    pub fn decode(bytes: &[u8]) -> ResourceResult<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            layers: 1,
            pixels: rgba.into_raw(),
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            layers: 1,
            pixels,
        }
    }

    /// 1x1 opaque white.
    pub fn white() -> Self {
        Self::solid(1, 1, [255; 4])
    }

    /// `size`x`size` checkerboard of `cell`-pixel squares.
    pub fn checker(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let even = ((x / cell) + (y / cell)) % 2 == 0;
                pixels.extend_from_slice(if even { &a } else { &b });
            }
        }
        Self {
            width: size,
            height: size,
            layers: 1,
            pixels,
        }
    }

    /// Stacks six square faces, given in [`CUBE_FACES`] order, into one
    /// cubemap.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidTexture`] if a face is not square,
    /// is itself layered, or differs in size from the first face.
    pub fn cube(name: &str, faces: [TextureData; 6]) -> ResourceResult<Self> {
        let (width, height) = (faces[0].width, faces[0].height);
        let invalid = |message: String| ResourceError::InvalidTexture {
            name: name.to_string(),
            message,
        };
        if width != height {
            return Err(invalid(format!("cubemap faces must be square, got {width}x{height}")));
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4 * 6);
        for (face, stem) in faces.iter().zip(CUBE_FACES) {
            face.validate(name)?;
            if face.layers != 1 || face.width != width || face.height != height {
                return Err(invalid(format!(
                    "face '{stem}' is {}x{}x{}, expected {width}x{height}x1",
                    face.width, face.height, face.layers
                )));
            }
            pixels.extend_from_slice(&face.pixels);
        }
        Ok(Self {
            width,
            height,
            layers: 6,
            pixels,
        })
    }

    #[inline]
    pub fn is_cube(&self) -> bool {
        self.layers == 6
    }

    /// Bytes in one layer.
    #[inline]
    pub fn layer_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn validate(&self, name: &str) -> ResourceResult<()> {
        if self.layers != 1 && self.layers != 6 {
            return Err(ResourceError::InvalidTexture {
                name: name.to_string(),
                message: format!("{} layers, expected 1 or 6", self.layers),
            });
        }
        let expected = self.layer_size() * self.layers as usize;
        if self.width == 0 || self.height == 0 || self.pixels.len() != expected {
            return Err(ResourceError::InvalidTexture {
                name: name.to_string(),
                message: format!(
                    "{}x{}x{} needs {} bytes, got {}",
                    self.width,
                    self.height,
                    self.layers,
                    expected,
                    self.pixels.len()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checker_alternates() {
        let black = [0, 0, 0, 255];
        let white = [255; 4];
        let tex = TextureData::checker(4, 2, black, white);
        tex.validate("checker").unwrap();
        let texel = |x: usize, y: usize| &tex.pixels[(y * 4 + x) * 4..][..4];
        assert_eq!(texel(0, 0), black);
        assert_eq!(texel(2, 0), white);
        assert_eq!(texel(2, 2), black);
    }

    #[test]
    fn decode_png() {
        let mut png = Vec::new();
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let tex = TextureData::decode(&png).unwrap();
        assert_eq!((tex.width, tex.height), (3, 2));
        assert_eq!(&tex.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            TextureData::decode(b"not an image"),
            Err(ResourceError::Image(_))
        ));
    }

    #[test]
    fn validate_catches_short_buffers() {
        let mut tex = TextureData::white();
        tex.pixels.pop();
        assert!(tex.validate("white").is_err());
    }

    #[test]
    fn cube_stacks_faces_in_order() {
        let faces = std::array::from_fn(|i| TextureData::solid(2, 2, [i as u8, 0, 0, 255]));
        let cube = TextureData::cube("sky", faces).unwrap();
        cube.validate("sky").unwrap();
        assert!(cube.is_cube());
        assert_eq!(cube.pixels.len(), cube.layer_size() * 6);
        for layer in 0..6 {
            assert_eq!(cube.pixels[layer * cube.layer_size()], layer as u8);
        }
    }

    #[test]
    fn cube_faces_must_match() {
        let mut faces = std::array::from_fn(|_| TextureData::solid(4, 4, [255; 4]));
        faces[3] = TextureData::solid(2, 2, [255; 4]);
        assert!(matches!(
            TextureData::cube("sky", faces),
            Err(ResourceError::InvalidTexture { .. })
        ));

        let wide = std::array::from_fn(|_| TextureData::solid(4, 2, [255; 4]));
        assert!(TextureData::cube("sky", wide).is_err());
    }

    #[test]
    fn validate_rejects_odd_layer_counts() {
        let mut tex = TextureData::solid(1, 1, [255; 4]);
        tex.layers = 3;
        tex.pixels = vec![255; 12];
        assert!(tex.validate("odd").is_err());
    }
}

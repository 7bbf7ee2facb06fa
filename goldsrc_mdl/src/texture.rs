use image::RgbaImage;
use rgb::{FromSlice, RGB8};

use crate::mdl::{self, TextureFlags, TextureRef};
use crate::{Error, Result};

pub const PALETTE_SIZE: usize = 256;
/// Palette index rendered fully transparent in masked textures.
pub const TRANSPARENT_INDEX: u8 = 255;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Texture {
    pub name: String,
    pub flags: TextureFlags,
    pub width: u32,
    pub height: u32,
    /// One palette index per pixel, row-major.
    pub pixels: Vec<u8>,
    pub palette: Vec<RGB8>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub rgba: RgbaImage,
}

impl Texture {
    pub(crate) fn from_ref(texture: TextureRef) -> Result<Self> {
        let raw = texture.texture();
        let width = texture.width()?;
        let height = texture.height()?;
        let (pixels, palette) = texture.pixels_and_palette()?;

        let flags = TextureFlags::from_bits_retain(raw.flags.get());
        let palette = palette.as_rgb().to_vec();

        let rgba = RgbaImage::from_raw(
            width,
            height,
            decode_rgba(pixels, &palette, flags.contains(TextureFlags::MASKED)),
        )
        .ok_or(Error::Corrupted {
            error: "texture pixel data does not match dimensions",
        })?;

        Ok(Self {
            name: mdl::string(&raw.name),
            flags,
            width,
            height,
            pixels: pixels.to_vec(),
            palette,
            rgba,
        })
    }

    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.flags.contains(TextureFlags::MASKED)
    }

    #[must_use]
    pub fn palette_color(&self, index: u8) -> Option<RGB8> {
        self.palette.get(usize::from(index)).copied()
    }
}

/// Expands palette indices to RGBA bytes.
///
/// Alpha is 0 only for [`TRANSPARENT_INDEX`] in a masked texture. Indices
/// missing from a short palette decode as black.
#[must_use]
pub fn decode_rgba(pixels: &[u8], palette: &[RGB8], masked: bool) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(pixels.len() * 4);

    for &index in pixels {
        let color = palette.get(usize::from(index)).copied().unwrap_or_default();
        let alpha = if masked && index == TRANSPARENT_INDEX {
            0
        } else {
            255
        };

        rgba.extend_from_slice(&[color.r, color.g, color.b, alpha]);
    }

    rgba
}

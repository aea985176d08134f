//! Image loading: decode via the `image` crate, keep the file's own
//! channel count, hand the pixels to the caller.

use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;

/// Decoding options.
#[derive(Clone, Copy, Debug)]
pub struct ImageLoadSettings {
    /// Flip rows so the first pixel is the bottom-left one (GL convention).
    pub flip_vertically: bool,
}

impl Default for ImageLoadSettings {
    fn default() -> Self {
        Self {
            flip_vertically: true,
        }
    }
}

/// Decoded pixel data, 8 bits per channel. Pixels are released on drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// Channels per pixel as stored in the file (1, 2, 3 or 4).
    pub color_channels: u8,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Returns `true` if the dimensions and the pixel buffer agree.
    pub fn is_valid(&self) -> bool {
        let expected =
            self.width as usize * self.height as usize * usize::from(self.color_channels);
        self.width > 0 && self.height > 0 && self.pixels.len() == expected
    }

    /// Reshape an already-decoded image: optional vertical flip, native
    /// channel count, samples narrowed to 8 bits.
    pub fn from_dynamic(img: DynamicImage, settings: &ImageLoadSettings) -> Self {
        let img = if settings.flip_vertically {
            img.flipv()
        } else {
            img
        };
        let (width, height) = (img.width(), img.height());
        let color_channels = img.color().channel_count();
        let pixels = match color_channels {
            1 => img.into_luma8().into_raw(),
            2 => img.into_luma_alpha8().into_raw(),
            3 => img.into_rgb8().into_raw(),
            _ => img.into_rgba8().into_raw(),
        };
        Self {
            width,
            height,
            color_channels,
            pixels,
        }
    }
}

/// Load an image from a file path.
pub fn load_image(path: impl AsRef<Path>, settings: &ImageLoadSettings) -> Result<ImageData> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?;
    let data = ImageData::from_dynamic(img, settings);
    log::info!(
        "Loaded image {}x{}, {} channels, {} bytes",
        data.width,
        data.height,
        data.color_channels,
        data.byte_len()
    );
    Ok(data)
}

/// Load an image from encoded bytes already in memory.
pub fn load_image_from_memory(bytes: &[u8], settings: &ImageLoadSettings) -> Result<ImageData> {
    let img = image::load_from_memory(bytes).context("Failed to decode image from memory")?;
    Ok(ImageData::from_dynamic(img, settings))
}

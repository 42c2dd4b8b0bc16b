//! JPEG tile rendering.
//!
//! A DZI tile rarely lines up with a single source tile: it is cut from a
//! region of some pyramid level that can straddle several source tiles and
//! usually needs scaling. Rendering happens in three steps:
//!
//! 1. decode the overlapping source tiles and paste them onto a canvas the
//!    size of the region
//! 2. resize the canvas to the output tile size (Triangle filter)
//! 3. optionally pad edge tiles to the full tile size, then encode as JPEG
//!
//! Everything here is CPU-bound and synchronous; callers run it on the
//! blocking pool.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageReader, Rgb, RgbImage};

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Fill for pixels with no image data.
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

// =============================================================================
// Render Plan
// =============================================================================

/// An encoded source tile and where its top-left corner lands on the canvas.
///
/// Offsets may be negative when the tile starts before the region.
#[derive(Debug, Clone)]
pub struct SourceTile {
    pub x: i64,
    pub y: i64,
    pub jpeg: Bytes,
}

/// Everything needed to render one output tile.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    /// Size of the source region in source-level pixels
    pub region_width: u32,
    pub region_height: u32,
    /// Size of the output tile before padding
    pub out_width: u32,
    pub out_height: u32,
    pub tiles: Vec<SourceTile>,
}

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Composites, scales and encodes DZI tiles.
#[derive(Debug, Clone, Copy)]
pub struct JpegTileEncoder {
    quality: u8,
    pad_to: Option<u32>,
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegTileEncoder {
    /// Create an encoder; `quality` is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
            pad_to: None,
        }
    }

    /// Pad tiles smaller than `tile_size` with [`BACKGROUND`].
    pub fn with_padding(mut self, tile_size: u32) -> Self {
        self.pad_to = Some(tile_size);
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Render a planned tile to JPEG bytes.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if a source tile is not a readable JPEG and `Encode`
    /// if the output cannot be written.
    pub fn render(&self, plan: &RenderPlan) -> Result<Bytes, TileError> {
        let mut canvas = RgbImage::from_pixel(
            plan.region_width.max(1),
            plan.region_height.max(1),
            BACKGROUND,
        );
        for tile in &plan.tiles {
            let decoded = decode(&tile.jpeg)?;
            imageops::replace(&mut canvas, &decoded, tile.x, tile.y);
        }

        let (out_width, out_height) = (plan.out_width.max(1), plan.out_height.max(1));
        let mut img = if canvas.dimensions() == (out_width, out_height) {
            canvas
        } else {
            imageops::resize(&canvas, out_width, out_height, FilterType::Triangle)
        };

        if let Some(size) = self.pad_to {
            if out_width < size || out_height < size {
                let mut padded = RgbImage::from_pixel(
                    size.max(out_width),
                    size.max(out_height),
                    BACKGROUND,
                );
                imageops::replace(&mut padded, &img, 0, 0);
                img = padded;
            }
        }

        self.encode(&img)
    }

    /// Encode an image as JPEG at this encoder's quality.
    pub fn encode(&self, img: &RgbImage) -> Result<Bytes, TileError> {
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, self.quality)
            .encode_image(img)
            .map_err(|e| TileError::Encode {
                message: e.to_string(),
            })?;
        Ok(Bytes::from(output))
    }
}

/// Decode a standalone JPEG to RGB.
pub fn decode(source: &[u8]) -> Result<RgbImage, TileError> {
    let img = ImageReader::with_format(Cursor::new(source), image::ImageFormat::Jpeg)
        .decode()
        .map_err(|e| TileError::Decode {
            message: e.to_string(),
        })?;
    Ok(img.to_rgb8())
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================

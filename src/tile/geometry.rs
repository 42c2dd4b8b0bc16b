//! Deep Zoom pyramid geometry.
//!
//! DZI numbers its levels from the bottom: level 0 is the whole image shrunk
//! to 1×1 pixels and every following level doubles both dimensions until
//! `max_level`, which is the base resolution. Each level is cut into a grid
//! of `tile_size` tiles; the last row and column hold whatever is left.

use serde::Serialize;

use crate::error::TileError;

/// Edge length of a DZI tile.
pub const DZI_TILE_SIZE: u32 = 512;

/// Tiles do not overlap.
pub const DZI_OVERLAP: u32 = 0;

/// Tile file extension advertised in the descriptor.
pub const DZI_FORMAT: &str = "jpg";

/// Geometry of one slide's Deep Zoom pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PyramidDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: &'static str,
    pub max_level: u32,
}

/// Pixel rectangle of a tile within its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PyramidDescriptor {
    /// Describe a `width`×`height` base image cut into [`DZI_TILE_SIZE`] tiles.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_tile_size(width, height, DZI_TILE_SIZE)
    }

    pub fn with_tile_size(width: u32, height: u32, tile_size: u32) -> Self {
        Self {
            width,
            height,
            tile_size: tile_size.max(1),
            overlap: DZI_OVERLAP,
            format: DZI_FORMAT,
            max_level: max_level(width, height),
        }
    }

    /// Number of levels, `max_level + 1`.
    pub fn level_count(&self) -> u32 {
        self.max_level + 1
    }

    /// Pixel dimensions of `level`, or `None` past `max_level`.
    pub fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        if level > self.max_level {
            return None;
        }
        let shift = self.max_level - level;
        Some((shrink(self.width, shift), shrink(self.height, shift)))
    }

    /// Factor between the base resolution and `level`.
    pub fn downsample(&self, level: u32) -> Option<f64> {
        if level > self.max_level {
            return None;
        }
        Some(2f64.powi((self.max_level - level) as i32))
    }

    /// Tile grid (columns, rows) of `level`.
    pub fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        let (width, height) = self.level_dimensions(level)?;
        Some((
            width.div_ceil(self.tile_size),
            height.div_ceil(self.tile_size),
        ))
    }

    /// Pixel rectangle covered by tile (`col`, `row`) at `level`.
    ///
    /// # Errors
    ///
    /// `LevelOutOfRange` past `max_level` and `TileOutOfBounds` outside the
    /// level's grid.
    pub fn tile_rect(&self, level: u32, col: u32, row: u32) -> Result<TileRect, TileError> {
        let (width, height) = self
            .level_dimensions(level)
            .ok_or(TileError::LevelOutOfRange {
                level,
                max_level: self.max_level,
            })?;
        let cols = width.div_ceil(self.tile_size);
        let rows = height.div_ceil(self.tile_size);
        if col >= cols || row >= rows {
            return Err(TileError::TileOutOfBounds {
                level,
                col,
                row,
                cols,
                rows,
            });
        }

        let x = col * self.tile_size;
        let y = row * self.tile_size;
        Ok(TileRect {
            x,
            y,
            width: self.tile_size.min(width - x),
            height: self.tile_size.min(height - y),
        })
    }

    /// The `.dzi` XML document.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008" TileSize="{}" Overlap="{}" Format="{}">
  <Size Width="{}" Height="{}"/>
</Image>"#,
            self.tile_size, self.overlap, self.format, self.width, self.height
        )
    }
}

/// `ceil(log2(max(width, height)))`, the level at which the image is full size.
pub fn max_level(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest <= 1 {
        0
    } else {
        u32::BITS - (largest - 1).leading_zeros()
    }
}

/// Halve `size` `shift` times, rounding up, never below 1.
fn shrink(size: u32, shift: u32) -> u32 {
    if shift >= u32::BITS {
        return 1;
    }
    size.div_ceil(1 << shift).max(1)
}

/// Parse a tile file name such as `3_5.jpg` into (column, row).
pub fn parse_tile_name(name: &str) -> Option<(u32, u32)> {
    let stem = name
        .strip_suffix(".jpg")
        .or_else(|| name.strip_suffix(".jpeg"))
        .unwrap_or(name);
    let (col, row) = stem.split_once('_')?;
    Some((col.parse().ok()?, row.parse().ok()?))
}

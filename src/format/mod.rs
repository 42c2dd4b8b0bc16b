//! Slide file formats.
//!
//! Slides are tiled pyramidal TIFF or BigTIFF files (Aperio SVS included)
//! whose tiles are JPEG-compressed.

pub mod jpeg;
mod pyramid;
pub mod tiff;

pub use pyramid::{PyramidLevel, SlidePyramid};

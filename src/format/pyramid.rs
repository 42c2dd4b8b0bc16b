//! Pyramid level discovery for tiled TIFF slides.
//!
//! A whole-slide file holds several images: the pyramid levels (full
//! resolution plus successively smaller copies) and usually a label, a macro
//! overview and a thumbnail. Aperio SVS stores the extra images stripped, so
//! only tiled directories are pyramid candidates. Candidates are ordered by
//! area and kept while they keep the base aspect ratio and shrink.

use bytes::Bytes;
use tracing::debug;

use super::jpeg::prepare_tile_jpeg;
use super::tiff::{
    read_entry_bytes, read_entry_integers, read_ifd, tag, Ifd, TiffHeader, BIGTIFF_HEADER_SIZE,
    COMPRESSION_JPEG, PHOTOMETRIC_RGB, TIFF_HEADER_SIZE,
};
use crate::error::TiffError;
use crate::io::RangeReader;

/// Maximum number of IFDs to walk
const MAX_IFDS: usize = 100;

/// Allowed relative difference between a level's x and y downsample
const ASPECT_TOLERANCE: f64 = 0.1;

/// One resolution of the source image.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_across: u32,
    pub tiles_down: u32,
    /// Downsample relative to the base level (1.0 for the base)
    pub downsample: f64,
    /// PhotometricInterpretation (2 = RGB, 6 = YCbCr)
    pub photometric: u16,
    tile_offsets: Vec<u64>,
    tile_byte_counts: Vec<u64>,
    jpeg_tables: Option<Bytes>,
}

impl PyramidLevel {
    /// Byte range of a tile in the file, or `None` outside the grid.
    ///
    /// A zero length means the tile is absent from the file.
    pub fn tile_location(&self, col: u32, row: u32) -> Option<(u64, u64)> {
        if col >= self.tiles_across || row >= self.tiles_down {
            return None;
        }
        let index = row as usize * self.tiles_across as usize + col as usize;
        Some((
            *self.tile_offsets.get(index)?,
            *self.tile_byte_counts.get(index)?,
        ))
    }
}

/// Candidate found while walking the IFD chain, before its arrays are loaded.
struct Candidate {
    ifd: Ifd,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    compression: u16,
}

impl Candidate {
    fn from_ifd(ifd: Ifd, header: &TiffHeader) -> Option<Self> {
        let tile_width = ifd.scalar(tag::TILE_WIDTH, header)? as u32;
        let tile_height = ifd.scalar(tag::TILE_LENGTH, header)? as u32;
        let width = ifd.scalar(tag::IMAGE_WIDTH, header)? as u32;
        let height = ifd.scalar(tag::IMAGE_LENGTH, header)? as u32;
        if tile_width == 0 || tile_height == 0 || width == 0 || height == 0 {
            return None;
        }
        ifd.entry(tag::TILE_OFFSETS)?;
        ifd.entry(tag::TILE_BYTE_COUNTS)?;
        let compression = ifd.scalar(tag::COMPRESSION, header).unwrap_or(1) as u16;
        Some(Self {
            ifd,
            width,
            height,
            tile_width,
            tile_height,
            compression,
        })
    }

    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// The pyramid of a tiled JPEG TIFF, ready for tile reads.
#[derive(Debug, Clone)]
pub struct SlidePyramid {
    pub header: TiffHeader,
    levels: Vec<PyramidLevel>,
}

impl SlidePyramid {
    /// Parse the file behind `reader` and load every level's tile index.
    ///
    /// # Errors
    /// - `NoPyramid` if no tiled image directory exists
    /// - `UnsupportedCompression` if the base level is not JPEG
    pub async fn open<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let head_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        if head_len < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: reader.size(),
            });
        }
        let head = reader.read_exact_at(0, head_len).await?;
        let header = TiffHeader::parse(&head, reader.size())?;

        let mut candidates = Vec::new();
        let mut offset = header.first_ifd_offset;
        let mut walked = 0;
        while offset != 0 && walked < MAX_IFDS {
            let ifd = read_ifd(reader, &header, offset).await?;
            offset = ifd.next_ifd_offset;
            walked += 1;
            if let Some(candidate) = Candidate::from_ifd(ifd, &header) {
                candidates.push(candidate);
            }
        }

        candidates.sort_by_key(|c| std::cmp::Reverse(c.area()));
        let base = candidates.first().ok_or(TiffError::NoPyramid)?;
        if base.compression != COMPRESSION_JPEG {
            return Err(TiffError::UnsupportedCompression(base.compression));
        }
        let (base_width, base_height) = (base.width as f64, base.height as f64);

        let mut levels: Vec<PyramidLevel> = Vec::new();
        for candidate in candidates {
            let downsample_x = base_width / candidate.width as f64;
            let downsample_y = base_height / candidate.height as f64;
            let consistent = (downsample_x - downsample_y).abs()
                <= ASPECT_TOLERANCE * downsample_x.max(downsample_y);
            let shrinks = levels
                .last()
                .map_or(true, |prev| candidate.width < prev.width);

            if !consistent || !shrinks || candidate.compression != COMPRESSION_JPEG {
                debug!(
                    width = candidate.width,
                    height = candidate.height,
                    compression = candidate.compression,
                    "Skipping non-pyramid image"
                );
                continue;
            }

            let level =
                Self::load_level(reader, &header, candidate, downsample_x, downsample_y).await?;
            levels.push(level);
        }

        Ok(Self { header, levels })
    }

    async fn load_level<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        candidate: Candidate,
        downsample_x: f64,
        downsample_y: f64,
    ) -> Result<PyramidLevel, TiffError> {
        let ifd = &candidate.ifd;
        let tiles_across = candidate.width.div_ceil(candidate.tile_width);
        let tiles_down = candidate.height.div_ceil(candidate.tile_height);
        let expected = tiles_across as usize * tiles_down as usize;

        let offsets_entry = ifd
            .entry(tag::TILE_OFFSETS)
            .ok_or(TiffError::MissingTag("TileOffsets"))?;
        let counts_entry = ifd
            .entry(tag::TILE_BYTE_COUNTS)
            .ok_or(TiffError::MissingTag("TileByteCounts"))?;

        let tile_offsets = read_entry_integers(reader, header, offsets_entry, "TileOffsets").await?;
        let tile_byte_counts =
            read_entry_integers(reader, header, counts_entry, "TileByteCounts").await?;
        if tile_offsets.len() < expected || tile_byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "expected {} tiles, found {} offsets and {} byte counts",
                    expected,
                    tile_offsets.len(),
                    tile_byte_counts.len()
                ),
            });
        }

        let jpeg_tables = match ifd.entry(tag::JPEG_TABLES) {
            Some(entry) => Some(read_entry_bytes(reader, header, entry).await?),
            None => None,
        };

        Ok(PyramidLevel {
            width: candidate.width,
            height: candidate.height,
            tile_width: candidate.tile_width,
            tile_height: candidate.tile_height,
            tiles_across,
            tiles_down,
            downsample: (downsample_x + downsample_y) / 2.0,
            photometric: ifd
                .scalar(tag::PHOTOMETRIC_INTERPRETATION, header)
                .unwrap_or(6) as u16,
            tile_offsets,
            tile_byte_counts,
            jpeg_tables,
        })
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    /// Base (full-resolution) dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        self.levels
            .first()
            .map(|l| (l.width, l.height))
            .unwrap_or((0, 0))
    }

    /// Index of the level with the largest downsample not above `downsample`.
    ///
    /// Falls back to the base level when every level is finer.
    pub fn best_level_for_downsample(&self, downsample: f64) -> usize {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, level)| level.downsample <= downsample * 1.001)
            .max_by(|(_, a), (_, b)| a.downsample.total_cmp(&b.downsample))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Read one source tile as a standalone JPEG.
    ///
    /// Returns `Ok(None)` for coordinates outside the level or tiles absent
    /// from the file.
    pub async fn read_tile<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        level: usize,
        col: u32,
        row: u32,
    ) -> Result<Option<Bytes>, TiffError> {
        let Some(pyramid_level) = self.levels.get(level) else {
            return Ok(None);
        };
        let Some((offset, length)) = pyramid_level.tile_location(col, row) else {
            return Ok(None);
        };
        if length == 0 {
            return Ok(None);
        }

        let raw = reader.read_exact_at(offset, length as usize).await?;
        Ok(Some(prepare_tile_jpeg(
            pyramid_level.jpeg_tables.as_deref(),
            &raw,
            pyramid_level.photometric == PHOTOMETRIC_RGB,
        )))
    }
}

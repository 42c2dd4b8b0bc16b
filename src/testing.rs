//! Fixtures shared by unit tests.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

/// Solid colour used for every tile of a pyramid level.
pub const LEVEL_COLOURS: [[u8; 3]; 4] = [
    [200, 40, 40],
    [40, 200, 40],
    [40, 40, 200],
    [200, 200, 40],
];

pub fn solid_jpeg(width: u32, height: u32, colour: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(colour));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Split a JPEG into a JPEGTables stream and an abbreviated stream.
pub fn split_jpeg_tables(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut tables = vec![0xFF, 0xD8];
    let mut tile = vec![0xFF, 0xD8];
    let mut pos = 2;
    while pos + 3 < jpeg.len() {
        let code = jpeg[pos + 1];
        if code == 0xDA {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let segment = &jpeg[pos..pos + 2 + len];
        if code == 0xDB || code == 0xC4 {
            tables.extend_from_slice(segment);
        } else {
            tile.extend_from_slice(segment);
        }
        pos += 2 + len;
    }
    tables.extend_from_slice(&[0xFF, 0xD9]);
    tile.extend_from_slice(&jpeg[pos..]);
    (tables, tile)
}

/// Builds little-endian pyramidal TIFFs with solid-colour JPEG tiles.
pub struct PyramidTiffBuilder {
    levels: Vec<(u32, u32)>,
    tile_size: u32,
    bigtiff: bool,
    abbreviated: bool,
    missing: Vec<(usize, u32, u32)>,
    stripped: Option<(u32, u32)>,
}

impl PyramidTiffBuilder {
    pub fn new(levels: &[(u32, u32)], tile_size: u32) -> Self {
        Self {
            levels: levels.to_vec(),
            tile_size,
            bigtiff: false,
            abbreviated: false,
            missing: Vec::new(),
            stripped: None,
        }
    }

    pub fn bigtiff(mut self) -> Self {
        self.bigtiff = true;
        self
    }

    /// Store tables once per level in JPEGTables.
    pub fn abbreviated(mut self) -> Self {
        self.abbreviated = true;
        self
    }

    /// Leave a tile out of the file (offset and byte count 0).
    pub fn missing_tile(mut self, level: usize, col: u32, row: u32) -> Self {
        self.missing.push((level, col, row));
        self
    }

    /// Append an untiled image, like the label of an SVS file.
    pub fn with_stripped_image(mut self, width: u32, height: u32) -> Self {
        self.stripped = Some((width, height));
        self
    }

    fn offset_bytes(&self, value: u64) -> Vec<u8> {
        if self.bigtiff {
            value.to_le_bytes().to_vec()
        } else {
            (value as u32).to_le_bytes().to_vec()
        }
    }

    fn array_type(&self) -> u16 {
        if self.bigtiff {
            16
        } else {
            4
        }
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = if self.bigtiff {
            vec![0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]
        } else {
            vec![0x49, 0x49, 0x2A, 0x00, 0, 0, 0, 0]
        };
        let mut next_pointer = if self.bigtiff { 8 } else { 4 };

        let mut images: Vec<Vec<(u16, u16, u64, Vec<u8>)>> = Vec::new();
        for (level, &(width, height)) in self.levels.iter().enumerate() {
            let colour = LEVEL_COLOURS[level % LEVEL_COLOURS.len()];
            let full = solid_jpeg(self.tile_size, self.tile_size, colour);
            let (tables, abbreviated) = split_jpeg_tables(&full);
            let tile = if self.abbreviated { &abbreviated } else { &full };

            let across = width.div_ceil(self.tile_size);
            let down = height.div_ceil(self.tile_size);
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for row in 0..down {
                for col in 0..across {
                    if self.missing.contains(&(level, col, row)) {
                        offsets.push(0u64);
                        counts.push(0u64);
                    } else {
                        offsets.push(data.len() as u64);
                        counts.push(tile.len() as u64);
                        data.extend_from_slice(tile);
                    }
                }
            }

            let mut entries = vec![
                (256, 4, 1, width.to_le_bytes().to_vec()),
                (257, 4, 1, height.to_le_bytes().to_vec()),
                (259, 3, 1, 7u16.to_le_bytes().to_vec()),
                (262, 3, 1, 6u16.to_le_bytes().to_vec()),
                (322, 3, 1, (self.tile_size as u16).to_le_bytes().to_vec()),
                (323, 3, 1, (self.tile_size as u16).to_le_bytes().to_vec()),
                (
                    324,
                    self.array_type(),
                    offsets.len() as u64,
                    offsets.iter().flat_map(|v| self.offset_bytes(*v)).collect(),
                ),
                (
                    325,
                    self.array_type(),
                    counts.len() as u64,
                    counts.iter().flat_map(|v| self.offset_bytes(*v)).collect(),
                ),
            ];
            if self.abbreviated {
                entries.push((347, 7, tables.len() as u64, tables));
            }
            images.push(entries);
        }
        if let Some((width, height)) = self.stripped {
            images.push(vec![
                (256, 4, 1, width.to_le_bytes().to_vec()),
                (257, 4, 1, height.to_le_bytes().to_vec()),
                (259, 3, 1, 7u16.to_le_bytes().to_vec()),
            ]);
        }

        for entries in images {
            next_pointer = self.write_ifd(&mut data, next_pointer, entries);
        }
        data
    }

    /// Write one IFD, link it from `pointer_at` and return its next-pointer position.
    fn write_ifd(
        &self,
        data: &mut Vec<u8>,
        pointer_at: usize,
        entries: Vec<(u16, u16, u64, Vec<u8>)>,
    ) -> usize {
        if data.len() % 2 == 1 {
            data.push(0);
        }
        let ifd_offset = data.len() as u64;
        let pointer = self.offset_bytes(ifd_offset);
        data[pointer_at..pointer_at + pointer.len()].copy_from_slice(&pointer);

        let (count_size, entry_size, value_size) = if self.bigtiff {
            (8, 20, 8)
        } else {
            (2, 12, 4)
        };
        let ifd_size = count_size + entries.len() * entry_size + value_size;
        let external_base = ifd_offset + ifd_size as u64;

        let mut ifd = Vec::new();
        let mut external = Vec::new();
        if self.bigtiff {
            ifd.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        } else {
            ifd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        }
        for (tag, field_type, count, payload) in entries {
            ifd.extend_from_slice(&tag.to_le_bytes());
            ifd.extend_from_slice(&field_type.to_le_bytes());
            if self.bigtiff {
                ifd.extend_from_slice(&count.to_le_bytes());
            } else {
                ifd.extend_from_slice(&(count as u32).to_le_bytes());
            }
            let mut field = if payload.len() <= value_size {
                payload
            } else {
                let at = external_base + external.len() as u64;
                external.extend_from_slice(&payload);
                if external.len() % 2 == 1 {
                    external.push(0);
                }
                self.offset_bytes(at)
            };
            field.resize(value_size, 0);
            ifd.extend_from_slice(&field);
        }
        let next_at = data.len() + ifd.len();
        ifd.extend(std::iter::repeat(0).take(value_size));

        data.extend_from_slice(&ifd);
        data.extend_from_slice(&external);
        next_at
    }
}

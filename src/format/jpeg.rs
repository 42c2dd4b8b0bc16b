//! JPEG stream fix-ups for tiles stored inside TIFF files.
//!
//! TIFF writers usually store the quantization and Huffman tables once, in
//! the JPEGTables tag, and each tile as an "abbreviated" stream without them.
//! Before a tile can be decoded the tables have to be spliced back in.

use bytes::{BufMut, Bytes, BytesMut};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;
const APP14: u8 = 0xEE;

/// Adobe APP14 segment with transform = 0 (components are RGB, not YCbCr).
const ADOBE_RGB_SEGMENT: [u8; 16] = [
    0xFF, APP14, 0x00, 0x0E, b'A', b'd', b'o', b'b', b'e', 0x00, 0x64, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Find the first segment with the given marker before the scan data starts.
///
/// Returns the offset of the segment's 0xFF byte.
fn find_segment(data: &[u8], marker: u8) -> Option<usize> {
    if data.len() < 4 || data[0..2] != SOI {
        return None;
    }

    let mut pos = 2;
    while pos + 3 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let code = data[pos + 1];
        if code == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        if code == marker {
            return Some(pos);
        }
        if code == SOS {
            return None;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + length;
    }
    None
}

/// Whether the stream carries its own quantization tables.
pub fn has_tables(data: &[u8]) -> bool {
    find_segment(data, DQT).is_some()
}

/// Splice a JPEGTables stream into an abbreviated tile stream.
///
/// `tables` is itself a JPEG stream (SOI, tables, EOI). Its EOI and the
/// tile's SOI are dropped and the rest concatenated.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() || tile.is_empty() {
        return Bytes::copy_from_slice(tile);
    }

    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut out = BytesMut::with_capacity(tables.len() + tile.len());
    out.extend_from_slice(tables);
    out.extend_from_slice(tile);
    out.freeze()
}

/// Insert an Adobe APP14 segment right after SOI unless one is present.
///
/// Without it, decoders assume 3-component streams are YCbCr and apply a
/// colour transform to tiles whose samples are already RGB.
pub fn mark_rgb(data: &[u8]) -> Bytes {
    if data.len() < 2 || data[0..2] != SOI || find_segment(data, APP14).is_some() {
        return Bytes::copy_from_slice(data);
    }

    let mut out = BytesMut::with_capacity(data.len() + ADOBE_RGB_SEGMENT.len());
    out.put_slice(&SOI);
    out.put_slice(&ADOBE_RGB_SEGMENT);
    out.put_slice(&data[2..]);
    out.freeze()
}

/// Turn raw tile bytes from a TIFF into a standalone, decodable JPEG.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: &[u8], rgb: bool) -> Bytes {
    let complete = match tables {
        Some(tables) if !has_tables(tile) => merge_jpeg_tables(tables, tile),
        _ => Bytes::copy_from_slice(tile),
    };

    if rgb {
        mark_rgb(&complete)
    } else {
        complete
    }
}

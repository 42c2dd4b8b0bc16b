//! TIFF and BigTIFF container parsing.
//!
//! Only what tile serving needs: the header, image file directories (IFDs)
//! and the values of a handful of tags.
//!
//! ## Classic TIFF header (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = "II" little-endian, 0x4D4D = "MM" big-endian)
//! Bytes 2-3: Version (42)
//! Bytes 4-7: Offset to first IFD
//! ```
//!
//! ## BigTIFF header (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Version (43)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved
//! Bytes 8-15: Offset to first IFD
//! ```

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries in a single IFD
const MAX_IFD_ENTRIES: u64 = 4096;

/// Tag numbers used by the pyramid reader.
pub mod tag {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC_INTERPRETATION: u16 = 262;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const JPEG_TABLES: u16 = 347;
}

/// TIFF compression code for "new-style" JPEG
pub const COMPRESSION_JPEG: u16 = 7;

/// PhotometricInterpretation value for RGB samples
pub const PHOTOMETRIC_RGB: u16 = 2;

// =============================================================================
// ByteOrder
// =============================================================================

/// Endianness declared by the first two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II" (Intel)
    LittleEndian,
    /// "MM" (Motorola)
    BigEndian,
}

impl ByteOrder {
    /// # Panics
    /// Panics if the slice has fewer than 2 bytes.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    /// # Panics
    /// Panics if the slice has fewer than 4 bytes.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    /// # Panics
    /// Panics if the slice has fewer than 8 bytes.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    /// BigTIFF uses 64-bit offsets and counts
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (8 for classic TIFF, 16 for BigTIFF)
    /// * `file_size` - Total file size, used to validate the first IFD offset
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Width of the IFD entry count field.
    #[inline]
    pub const fn count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of one IFD entry.
    #[inline]
    pub const fn entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Width of offsets, including the inline value field of an entry.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IFD entries
// =============================================================================

/// Size in bytes of one value of a TIFF field type, if the type is known.
fn field_type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),         // BYTE, ASCII, SBYTE, UNDEFINED
        3 | 8 => Some(2),                 // SHORT, SSHORT
        4 | 9 | 11 | 13 => Some(4),       // LONG, SLONG, FLOAT, IFD
        5 | 10 | 12 | 16 | 17 | 18 => Some(8), // RATIONAL, SRATIONAL, DOUBLE, LONG8, SLONG8, IFD8
        _ => None,
    }
}

/// One tag entry of an IFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u64,
    /// The raw value/offset field (4 bytes for TIFF, 8 for BigTIFF)
    value_field: [u8; 8],
}

impl IfdEntry {
    fn value_size(&self) -> Result<u64, TiffError> {
        let size =
            field_type_size(self.field_type).ok_or(TiffError::UnknownFieldType(self.field_type))?;
        Ok(self.count.saturating_mul(size as u64))
    }

    fn is_inline(&self, header: &TiffHeader) -> Result<bool, TiffError> {
        Ok(self.value_size()? <= header.offset_size() as u64)
    }

    fn decode_integers(
        &self,
        bytes: &[u8],
        order: ByteOrder,
        name: &'static str,
    ) -> Result<Vec<u64>, TiffError> {
        let step = match self.field_type {
            1 | 7 => 1,
            3 => 2,
            4 | 13 => 4,
            16 | 18 => 8,
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: name,
                    message: format!("field type {} is not an unsigned integer", other),
                })
            }
        };
        Ok(bytes
            .chunks_exact(step)
            .take(self.count as usize)
            .map(|chunk| match step {
                1 => chunk[0] as u64,
                2 => order.read_u16(chunk) as u64,
                4 => order.read_u32(chunk) as u64,
                _ => order.read_u64(chunk),
            })
            .collect())
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed image file directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Bytes occupied by an IFD with `count` entries, count and next offset included.
    pub fn size_for(count: u64, header: &TiffHeader) -> usize {
        header.count_size() + count as usize * header.entry_size() + header.offset_size()
    }

    /// Parse an IFD from bytes starting at its entry count.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let order = header.byte_order;
        let count_size = header.count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let count = if header.is_bigtiff {
            order.read_u64(bytes)
        } else {
            order.read_u16(bytes) as u64
        };
        let required = Self::size_for(count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.entry_size();
        let offset_size = header.offset_size();
        let entries = (0..count as usize)
            .map(|i| {
                let raw = &bytes[count_size + i * entry_size..][..entry_size];
                let count = if header.is_bigtiff {
                    order.read_u64(&raw[4..12])
                } else {
                    order.read_u32(&raw[4..8]) as u64
                };
                let mut value_field = [0u8; 8];
                value_field[..offset_size].copy_from_slice(&raw[entry_size - offset_size..]);
                IfdEntry {
                    tag: order.read_u16(&raw[0..2]),
                    field_type: order.read_u16(&raw[2..4]),
                    count,
                    value_field,
                }
            })
            .collect();

        let next_at = count_size + count as usize * entry_size;
        let next_ifd_offset = header.read_offset(&bytes[next_at..next_at + offset_size]);

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    pub fn entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// First value of an inline integer tag.
    pub fn scalar(&self, tag: u16, header: &TiffHeader) -> Option<u64> {
        let entry = self.entry(tag)?;
        if entry.count == 0 || !entry.is_inline(header).ok()? {
            return None;
        }
        entry
            .decode_integers(&entry.value_field, header.byte_order, "scalar")
            .ok()?
            .first()
            .copied()
    }
}

/// Read the IFD located at `offset`.
pub async fn read_ifd<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    offset: u64,
) -> Result<Ifd, TiffError> {
    if offset >= reader.size() {
        return Err(TiffError::InvalidIfdOffset(offset));
    }

    let count_bytes = reader.read_exact_at(offset, header.count_size()).await?;
    let count = if header.is_bigtiff {
        header.byte_order.read_u64(&count_bytes)
    } else {
        header.byte_order.read_u16(&count_bytes) as u64
    };
    if count > MAX_IFD_ENTRIES {
        return Err(TiffError::InvalidTagValue {
            tag: "IFD",
            message: format!("{} entries at offset {}", count, offset),
        });
    }

    let bytes = reader
        .read_exact_at(offset, Ifd::size_for(count, header))
        .await?;
    Ifd::parse(&bytes, header)
}

/// Raw bytes of an entry's value, wherever they are stored.
pub async fn read_entry_bytes<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<Bytes, TiffError> {
    let size = entry.value_size()?;
    if entry.is_inline(header)? {
        return Ok(Bytes::copy_from_slice(&entry.value_field[..size as usize]));
    }
    let offset = header.read_offset(&entry.value_field);
    Ok(reader.read_exact_at(offset, size as usize).await?)
}

/// Values of an unsigned integer array entry (tile offsets, byte counts).
pub async fn read_entry_integers<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
    name: &'static str,
) -> Result<Vec<u64>, TiffError> {
    let bytes = read_entry_bytes(reader, header, entry).await?;
    entry.decode_integers(&bytes, header.byte_order, name)
}

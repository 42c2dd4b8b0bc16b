use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Random-access reads over a remote resource.
///
/// The TIFF parser and tile renderer only ever read byte ranges, so a slide
/// of many gigabytes is never downloaded in full.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Identifier used in logs (the object key for stored slides).
    fn identifier(&self) -> &str;
}

/// [`RangeReader`] over a buffer already in memory.
pub struct BytesReader {
    data: Bytes,
    identifier: String,
}

impl BytesReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for BytesReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        Ok(self.data.slice(offset as usize..end as usize))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

use async_trait::async_trait;
use bytes::Bytes;

use super::RangeReader;
use crate::error::IoError;
use crate::storage::StorageGateway;

/// [`RangeReader`] over an object in the store.
///
/// The object size is fetched once via HEAD when the reader is opened; every
/// read is a ranged GET through the gateway and so inherits its retries.
#[derive(Clone)]
pub struct ObjectRangeReader {
    gateway: StorageGateway,
    key: String,
    size: u64,
}

impl ObjectRangeReader {
    /// Open `key` for range reads.
    ///
    /// # Errors
    /// Returns [`IoError::NotFound`] if the object does not exist.
    pub async fn open(gateway: StorageGateway, key: impl Into<String>) -> Result<Self, IoError> {
        let key = key.into();
        let meta = gateway.head(&key).await?;
        Ok(Self {
            gateway,
            key,
            size: meta.size,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for ObjectRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let data = self
            .gateway
            .get_object(&self.key, offset, len as u64)
            .await?;
        if data.len() != len {
            return Err(IoError::Storage(format!(
                "short read on {}: wanted {} bytes at {}, got {}",
                self.key,
                len,
                offset,
                data.len()
            )));
        }
        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.key
    }
}

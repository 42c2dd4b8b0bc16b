use std::num::NonZeroUsize;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::Mutex;

use super::{RangeReader, SingleFlight};
use crate::error::IoError;

/// Default block size: 256KB
/// Large enough to amortize request latency, small enough not to waste bandwidth.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in number of blocks (25.6MB at the default block size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 100;

/// Block-aligned read cache wrapping any [`RangeReader`].
///
/// TIFF parsing issues many small reads at scattered offsets. Each read is
/// served from fixed-size blocks fetched once and kept in an LRU, so a
/// directory walk costs a handful of range requests instead of hundreds.
/// Concurrent misses on the same block share one fetch.
pub struct BlockCache<R> {
    inner: R,
    block_size: usize,
    blocks: Mutex<LruCache<u64, Bytes>>,
    fetches: SingleFlight<u64, Result<Bytes, IoError>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Wrap `inner` with the default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Wrap `inner` with a custom block size and capacity.
    ///
    /// # Arguments
    /// * `inner` - The underlying reader to wrap
    /// * `block_size` - Size of each cached block in bytes (at least 1)
    /// * `capacity` - Maximum number of blocks to keep (at least 1)
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            block_size: block_size.max(1),
            blocks: Mutex::new(LruCache::new(capacity)),
            fetches: SingleFlight::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        if let Some(block) = self.blocks.lock().await.get(&index) {
            return Ok(block.clone());
        }

        let (result, _) = self
            .fetches
            .run(index, || async {
                let result = self.fetch(index).await;
                if let Ok(block) = &result {
                    self.blocks.lock().await.put(index, block.clone());
                }
                result
            })
            .await;
        result
    }

    async fn fetch(&self, index: u64) -> Result<Bytes, IoError> {
        let offset = index * self.block_size as u64;
        let size = self.inner.size();
        let len = (self.block_size as u64).min(size.saturating_sub(offset));
        if len == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }
        self.inner.read_exact_at(offset, len as usize).await
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        if offset.saturating_add(len as u64) > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (offset + len as u64 - 1) / block_size;
        let start = (offset % block_size) as usize;

        if first == last {
            let block = self.block(first).await?;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut skip = start;
        for index in first..=last {
            let block = self.block(index).await?;
            let take = (block.len() - skip).min(len - out.len());
            out.extend_from_slice(&block[skip..skip + take]);
            skip = 0;
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

//! Open slide pyramids, cached by slide id.
//!
//! Opening a slide costs a HEAD plus a walk of the TIFF directory chain, so
//! parsed pyramids are kept in an LRU. Each keeps its own block cache over
//! the object, which makes repeated tile reads from the same region cheap.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::cache::Generations;
use super::geometry::PyramidDescriptor;
use crate::error::TileError;
use crate::format::SlidePyramid;
use crate::io::{
    BlockCache, ObjectRangeReader, SingleFlight, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE,
};
use crate::slide::{Slide, SlideId};
use crate::storage::StorageGateway;

/// Default number of open slides to keep.
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 50;

/// A parsed slide ready for tile reads.
pub struct OpenSlide {
    reader: BlockCache<ObjectRangeReader>,
    pyramid: SlidePyramid,
    descriptor: PyramidDescriptor,
}

impl OpenSlide {
    pub fn descriptor(&self) -> &PyramidDescriptor {
        &self.descriptor
    }

    pub fn pyramid(&self) -> &SlidePyramid {
        &self.pyramid
    }

    /// Read one source tile as a standalone JPEG; `None` if absent.
    pub async fn read_tile(
        &self,
        level: usize,
        col: u32,
        row: u32,
    ) -> Result<Option<Bytes>, TileError> {
        Ok(self
            .pyramid
            .read_tile(&self.reader, level, col, row)
            .await?)
    }
}

/// LRU of open slides with single-flight opening.
pub struct SlideSources {
    gateway: StorageGateway,
    block_size: usize,
    block_capacity: usize,
    slides: Mutex<LruCache<SlideId, Arc<OpenSlide>>>,
    opening: SingleFlight<SlideId, Result<Arc<OpenSlide>, TileError>>,
    generations: Generations,
}

impl SlideSources {
    pub fn new(gateway: StorageGateway) -> Self {
        Self::with_capacity(
            gateway,
            DEFAULT_SLIDE_CACHE_CAPACITY,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CAPACITY,
        )
    }

    /// # Arguments
    /// * `capacity` - Open slides to keep (at least 1)
    /// * `block_size` - Block size of each slide's read cache
    /// * `block_capacity` - Blocks kept per slide
    pub fn with_capacity(
        gateway: StorageGateway,
        capacity: usize,
        block_size: usize,
        block_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            gateway,
            block_size,
            block_capacity,
            slides: Mutex::new(LruCache::new(capacity)),
            opening: SingleFlight::new(),
            generations: Generations::default(),
        }
    }

    /// The open pyramid of `slide`, opening it on first use.
    ///
    /// # Errors
    ///
    /// `Io` if the object cannot be read and `Slide` if it is not a tiled
    /// JPEG pyramid.
    pub async fn open(&self, slide: &Slide) -> Result<Arc<OpenSlide>, TileError> {
        if let Some(open) = self.slides.lock().await.get(&slide.id) {
            return Ok(Arc::clone(open));
        }

        let (result, _) = self
            .opening
            .run(slide.id, || async {
                let ticket = self.generations.start(slide.id);
                let open = Arc::new(self.load(slide).await?);
                if ticket.is_current() {
                    self.slides.lock().await.put(slide.id, Arc::clone(&open));
                }
                Ok::<_, TileError>(open)
            })
            .await;
        result
    }

    async fn load(&self, slide: &Slide) -> Result<OpenSlide, TileError> {
        let object = ObjectRangeReader::open(self.gateway.clone(), &slide.storage_key).await?;
        let reader = BlockCache::with_capacity(object, self.block_size, self.block_capacity);
        let pyramid = SlidePyramid::open(&reader).await?;
        let (width, height) = pyramid.dimensions();
        let descriptor = PyramidDescriptor::new(width, height);
        info!(
            slide_id = %slide.id,
            width,
            height,
            levels = pyramid.levels().len(),
            dzi_levels = descriptor.level_count(),
            "Opened slide"
        );
        Ok(OpenSlide {
            reader,
            pyramid,
            descriptor,
        })
    }

    /// Forget an open slide; running opens will not be cached.
    pub async fn invalidate(&self, slide_id: SlideId) {
        self.generations.bump(slide_id);
        self.opening.forget(|id| *id == slide_id);
        if self.slides.lock().await.pop(&slide_id).is_some() {
            debug!(slide_id = %slide_id, "Dropped open slide");
        }
    }

    pub async fn len(&self) -> usize {
        self.slides.lock().await.len()
    }
}

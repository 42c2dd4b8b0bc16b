//! Tile cache for encoded JPEG tiles.
//!
//! An LRU bounded both by total bytes and by entry count. Lookups that miss
//! go through [`TileCache::get_or_compute`], which collapses concurrent
//! requests for the same tile into a single render.
//!
//! # Invalidation
//!
//! Each slide carries a generation number. A render records the generation
//! when it starts and only stores its result if the generation is unchanged
//! when it ends, so [`TileCache::invalidate_slide`] also keeps renders that
//! were already running from repopulating the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::TileError;
use crate::io::SingleFlight;
use crate::slide::SlideId;

/// Default cache capacity: 256MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Addresses exactly one DZI tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub slide_id: SlideId,
    pub level: u32,
    pub col: u32,
    pub row: u32,
}

impl TileKey {
    pub fn new(slide_id: SlideId, level: u32, col: u32, row: u32) -> Self {
        Self {
            slide_id,
            level,
            col,
            row,
        }
    }
}

/// Point-in-time cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileCacheStats {
    /// Bytes currently cached
    pub size: usize,
    /// Maximum bytes
    pub capacity: usize,
    pub entries: usize,
    pub max_entries: usize,
    /// Renders currently running
    pub in_flight: usize,
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Per-slide invalidation counters.
///
/// Work that may outlive an invalidation takes a [`GenerationTicket`] before
/// starting and only publishes its result if the ticket is still current.
/// A slide is tracked only while some ticket for it is alive.
#[derive(Default)]
pub(crate) struct Generations(Mutex<HashMap<SlideId, Generation>>);

#[derive(Default)]
struct Generation {
    value: u64,
    active: usize,
}

impl Generations {
    fn lock(&self) -> MutexGuard<'_, HashMap<SlideId, Generation>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start(&self, slide_id: SlideId) -> GenerationTicket<'_> {
        let mut slides = self.lock();
        let generation = slides.entry(slide_id).or_default();
        generation.active += 1;
        GenerationTicket {
            generations: self,
            slide_id,
            value: generation.value,
        }
    }

    /// Invalidate every ticket currently held for the slide.
    pub(crate) fn bump(&self, slide_id: SlideId) {
        if let Some(generation) = self.lock().get_mut(&slide_id) {
            generation.value += 1;
        }
    }

    /// Number of slides with work in progress.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.lock().len()
    }
}

pub(crate) struct GenerationTicket<'a> {
    generations: &'a Generations,
    slide_id: SlideId,
    value: u64,
}

impl GenerationTicket<'_> {
    /// Whether the slide was not invalidated since the ticket was taken.
    pub(crate) fn is_current(&self) -> bool {
        self.generations
            .lock()
            .get(&self.slide_id)
            .is_some_and(|generation| generation.value == self.value)
    }
}

impl Drop for GenerationTicket<'_> {
    fn drop(&mut self) {
        let mut slides = self.generations.lock();
        if let Some(generation) = slides.get_mut(&self.slide_id) {
            generation.active -= 1;
            if generation.active == 0 {
                slides.remove(&self.slide_id);
            }
        }
    }
}

struct Entries {
    lru: LruCache<TileKey, Bytes>,
    size: usize,
}

/// Shared, bounded cache of encoded tiles.
pub struct TileCache {
    entries: AsyncMutex<Entries>,
    max_size: usize,
    max_entries: usize,
    renders: SingleFlight<TileKey, Result<Bytes, TileError>>,
    generations: Generations,
}

impl TileCache {
    /// Create a tile cache with the default capacity.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_MAX_ENTRIES)
    }

    /// Create a tile cache holding at most `max_size` bytes in at most
    /// `max_entries` tiles.
    pub fn with_limits(max_size: usize, max_entries: usize) -> Self {
        Self {
            // LruCache::unbounded since eviction is driven by both limits below
            entries: AsyncMutex::new(Entries {
                lru: LruCache::unbounded(),
                size: 0,
            }),
            max_size,
            max_entries: max_entries.max(1),
            renders: SingleFlight::new(),
            generations: Generations::default(),
        }
    }

    /// Get a cached tile, marking it recently used.
    pub async fn get(&self, key: &TileKey) -> Option<Bytes> {
        self.entries.lock().await.lru.get(key).cloned()
    }

    /// Store a tile, evicting least-recently-used tiles to stay in bounds.
    ///
    /// Tiles larger than the whole capacity are not stored.
    pub async fn put(&self, key: TileKey, data: Bytes) {
        let len = data.len();
        if len > self.max_size {
            debug!(len, capacity = self.max_size, "Tile larger than cache, not storing");
            return;
        }

        let mut entries = self.entries.lock().await;
        if let Some(old) = entries.lru.put(key, data) {
            entries.size -= old.len();
        }
        entries.size += len;

        while entries.size > self.max_size || entries.lru.len() > self.max_entries {
            match entries.lru.pop_lru() {
                Some((_, evicted)) => entries.size -= evicted.len(),
                None => break,
            }
        }
    }

    /// Return the cached tile for `key`, or run `compute` to produce it.
    ///
    /// Concurrent callers for the same uncached key share one `compute`.
    /// Errors are returned to every waiting caller but never cached.
    ///
    /// The flag is `true` when the tile came from the cache.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: TileKey,
        compute: F,
    ) -> Result<(Bytes, bool), TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, TileError>>,
    {
        if let Some(data) = self.get(&key).await {
            return Ok((data, true));
        }
        self.render(key, compute).await
    }

    /// Render through the single flight.
    ///
    /// The leader looks the tile up again first, since a render that
    /// finished after the caller's miss will have stored it.
    async fn render<F, Fut>(&self, key: TileKey, compute: F) -> Result<(Bytes, bool), TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, TileError>>,
    {
        let cached = AtomicBool::new(false);
        let (result, shared) = self
            .renders
            .run(key, || async {
                if let Some(data) = self.get(&key).await {
                    cached.store(true, Ordering::Relaxed);
                    return Ok(data);
                }
                let ticket = self.generations.start(key.slide_id);
                let result = compute().await;
                if let Ok(data) = &result {
                    if ticket.is_current() {
                        self.put(key, data.clone()).await;
                    }
                }
                result
            })
            .await;
        if shared {
            debug!(
                slide_id = %key.slide_id,
                level = key.level,
                col = key.col,
                row = key.row,
                "Joined in-flight render"
            );
        }
        let cached = cached.load(Ordering::Relaxed);
        result.map(|data| (data, cached))
    }

    /// Drop every cached tile of a slide and detach its running renders.
    pub async fn invalidate_slide(&self, slide_id: SlideId) {
        self.generations.bump(slide_id);
        self.renders.forget(|key| key.slide_id == slide_id);

        let mut entries = self.entries.lock().await;
        let keys: Vec<TileKey> = entries
            .lru
            .iter()
            .filter(|(key, _)| key.slide_id == slide_id)
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            if let Some(data) = entries.lru.pop(key) {
                entries.size -= data.len();
            }
        }
        debug!(slide_id = %slide_id, removed = keys.len(), "Invalidated cached tiles");
    }

    /// Clear all entries from the cache.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.lru.clear();
        entries.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current total size of cached tiles in bytes.
    pub async fn size(&self) -> usize {
        self.entries.lock().await.size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub async fn stats(&self) -> TileCacheStats {
        let entries = self.entries.lock().await;
        TileCacheStats {
            size: entries.size,
            capacity: self.max_size,
            entries: entries.lru.len(),
            max_entries: self.max_entries,
            in_flight: self.renders.in_flight(),
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

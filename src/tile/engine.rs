//! The tile engine: slide id + DZI coordinates in, JPEG bytes out.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, instrument};

use super::cache::{
    TileCache, TileCacheStats, TileKey, DEFAULT_MAX_ENTRIES, DEFAULT_TILE_CACHE_CAPACITY,
};
use super::encoder::{JpegTileEncoder, RenderPlan, SourceTile, DEFAULT_JPEG_QUALITY};
use super::geometry::{PyramidDescriptor, TileRect, DZI_TILE_SIZE};
use super::source::{OpenSlide, SlideSources, DEFAULT_SLIDE_CACHE_CAPACITY};
use crate::error::TileError;
use crate::io::{DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::slide::{SlideId, SlideListener, SlideRegistry};
use crate::storage::StorageGateway;

/// Tuning for [`TileEngine`].
#[derive(Debug, Clone)]
pub struct TileEngineConfig {
    pub jpeg_quality: u8,
    /// Pad edge tiles to the full tile size
    pub pad_edge_tiles: bool,
    /// Open slides to keep
    pub slide_cache_capacity: usize,
    pub block_size: usize,
    /// Blocks kept per open slide
    pub block_cache_capacity: usize,
    /// Bytes of encoded tiles to keep
    pub tile_cache_bytes: usize,
    pub tile_cache_entries: usize,
}

impl Default for TileEngineConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            pad_edge_tiles: false,
            slide_cache_capacity: DEFAULT_SLIDE_CACHE_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
            block_cache_capacity: DEFAULT_BLOCK_CAPACITY,
            tile_cache_bytes: DEFAULT_TILE_CACHE_CAPACITY,
            tile_cache_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// An encoded tile.
#[derive(Debug, Clone)]
pub struct TileResponse {
    pub data: Bytes,
    /// Served from the tile cache
    pub cache_hit: bool,
}

/// Occupancy of the engine's caches.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub open_slides: usize,
    pub tiles: TileCacheStats,
}

/// Serves Deep Zoom descriptors and tiles for registered slides.
pub struct TileEngine {
    registry: Arc<SlideRegistry>,
    sources: SlideSources,
    tiles: TileCache,
    encoder: JpegTileEncoder,
}

impl TileEngine {
    pub fn new(
        registry: Arc<SlideRegistry>,
        gateway: StorageGateway,
        config: TileEngineConfig,
    ) -> Self {
        let mut encoder = JpegTileEncoder::new(config.jpeg_quality);
        if config.pad_edge_tiles {
            encoder = encoder.with_padding(DZI_TILE_SIZE);
        }
        Self {
            registry,
            sources: SlideSources::with_capacity(
                gateway,
                config.slide_cache_capacity,
                config.block_size,
                config.block_cache_capacity,
            ),
            tiles: TileCache::with_limits(config.tile_cache_bytes, config.tile_cache_entries),
            encoder,
        }
    }

    /// Build an engine and subscribe it to slide deletions.
    pub fn attach(
        registry: Arc<SlideRegistry>,
        gateway: StorageGateway,
        config: TileEngineConfig,
    ) -> Arc<Self> {
        let engine = Arc::new(Self::new(Arc::clone(&registry), gateway, config));
        let listener: Arc<dyn SlideListener> = engine.clone();
        registry.subscribe(Arc::downgrade(&listener));
        engine
    }

    async fn open(&self, slide_id: SlideId) -> Result<Arc<OpenSlide>, TileError> {
        let slide = self
            .registry
            .lookup(slide_id)
            .await?
            .ok_or_else(|| TileError::SlideNotFound {
                slide_id: slide_id.to_string(),
            })?;
        self.sources.open(&slide).await
    }

    /// Deep Zoom geometry of a slide.
    ///
    /// # Errors
    ///
    /// `SlideNotFound` for unknown slides; `Io`/`Slide` if the file cannot be
    /// opened.
    #[instrument(skip(self))]
    pub async fn get_descriptor(&self, slide_id: SlideId) -> Result<PyramidDescriptor, TileError> {
        Ok(*self.open(slide_id).await?.descriptor())
    }

    /// Render (or fetch from cache) one DZI tile.
    ///
    /// # Errors
    ///
    /// `SlideNotFound`, `LevelOutOfRange` and `TileOutOfBounds` for bad
    /// addresses; `Io`, `Slide`, `Decode` or `Encode` if rendering fails.
    #[instrument(skip(self))]
    pub async fn get_tile(
        &self,
        slide_id: SlideId,
        level: u32,
        col: u32,
        row: u32,
    ) -> Result<TileResponse, TileError> {
        let slide = self.open(slide_id).await?;
        let rect = slide.descriptor().tile_rect(level, col, row)?;

        let key = TileKey::new(slide_id, level, col, row);
        let (data, cache_hit) = self
            .tiles
            .get_or_compute(key, || self.render(slide, level, rect))
            .await?;
        Ok(TileResponse { data, cache_hit })
    }

    async fn render(
        &self,
        slide: Arc<OpenSlide>,
        level: u32,
        rect: TileRect,
    ) -> Result<Bytes, TileError> {
        let descriptor = slide.descriptor();
        let downsample = descriptor
            .downsample(level)
            .ok_or(TileError::LevelOutOfRange {
                level,
                max_level: descriptor.max_level,
            })?;

        let source_index = slide.pyramid().best_level_for_downsample(downsample);
        let Some(source) = slide.pyramid().level(source_index) else {
            return Err(TileError::LevelOutOfRange {
                level,
                max_level: descriptor.max_level,
            });
        };

        // Tile rectangle in base pixels, clipped to the image
        let base_x0 = rect.x as f64 * downsample;
        let base_y0 = rect.y as f64 * downsample;
        let base_x1 = ((rect.x + rect.width) as f64 * downsample).min(descriptor.width as f64);
        let base_y1 = ((rect.y + rect.height) as f64 * downsample).min(descriptor.height as f64);

        // The same rectangle in source-level pixels
        let x0 = ((base_x0 / source.downsample).floor() as u32).min(source.width.saturating_sub(1));
        let y0 =
            ((base_y0 / source.downsample).floor() as u32).min(source.height.saturating_sub(1));
        let x1 = ((base_x1 / source.downsample).ceil() as u32)
            .clamp(x0 + 1, source.width.max(x0 + 1));
        let y1 = ((base_y1 / source.downsample).ceil() as u32)
            .clamp(y0 + 1, source.height.max(y0 + 1));

        let tile_width = source.tile_width.max(1);
        let tile_height = source.tile_height.max(1);
        let mut tiles = Vec::new();
        for row in y0 / tile_height..=(y1 - 1) / tile_height {
            for col in x0 / tile_width..=(x1 - 1) / tile_width {
                if let Some(jpeg) = slide.read_tile(source_index, col, row).await? {
                    tiles.push(SourceTile {
                        x: (col * tile_width) as i64 - x0 as i64,
                        y: (row * tile_height) as i64 - y0 as i64,
                        jpeg,
                    });
                }
            }
        }
        debug!(
            level,
            source_level = source_index,
            source_tiles = tiles.len(),
            "Rendering tile"
        );

        let plan = RenderPlan {
            region_width: x1 - x0,
            region_height: y1 - y0,
            out_width: rect.width,
            out_height: rect.height,
            tiles,
        };
        let encoder = self.encoder;
        tokio::task::spawn_blocking(move || encoder.render(&plan))
            .await
            .map_err(|e| TileError::Encode {
                message: format!("render task failed: {}", e),
            })?
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            open_slides: self.sources.len().await,
            tiles: self.tiles.stats().await,
        }
    }

    /// Drop everything cached for a slide.
    pub async fn invalidate(&self, slide_id: SlideId) {
        self.sources.invalidate(slide_id).await;
        self.tiles.invalidate_slide(slide_id).await;
    }
}

#[async_trait]
impl SlideListener for TileEngine {
    async fn slide_deleted(&self, slide_id: SlideId) {
        self.invalidate(slide_id).await;
    }
}

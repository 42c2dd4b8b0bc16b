//! Deep Zoom tile serving.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │ slide id, level, col, row
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileEngine                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │ JpegTileEncoder │  │
//! │  │  (encoded    │  │ (composite →    │  │
//! │  │   tiles)     │  │  resize → JPEG) │  │
//! │  └──────────────┘  └─────────────────┘  │
//! │  ┌───────────────────────────────────┐  │
//! │  │ SlideSources (open pyramids, LRU) │  │
//! │  └───────────────────────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            ▼                     ▼
//!     SlideRegistry         StorageGateway
//!     (id → object)         (range reads)
//! ```
//!
//! # Components
//!
//! - [`TileEngine`]: resolves the slide, validates the address and renders
//! - [`PyramidDescriptor`]: DZI geometry, including the `.dzi` XML
//! - [`TileCache`]: byte- and entry-bounded LRU with single-flight renders
//! - [`JpegTileEncoder`]: composites source tiles into an output JPEG
//! - [`SlideSources`]: parsed slide pyramids with per-slide block caches

mod cache;
mod encoder;
mod engine;
mod geometry;
mod source;

pub use cache::{
    TileCache, TileCacheStats, TileKey, DEFAULT_MAX_ENTRIES, DEFAULT_TILE_CACHE_CAPACITY,
};
pub use encoder::{
    clamp_quality, JpegTileEncoder, RenderPlan, SourceTile, BACKGROUND, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use engine::{EngineStats, TileEngine, TileEngineConfig, TileResponse};
pub use geometry::{
    max_level, parse_tile_name, PyramidDescriptor, TileRect, DZI_FORMAT, DZI_OVERLAP,
    DZI_TILE_SIZE,
};
pub use source::{OpenSlide, SlideSources, DEFAULT_SLIDE_CACHE_CAPACITY};

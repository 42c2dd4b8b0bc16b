//! # WSI Slide Service
//!
//! Backend for Whole Slide Images (WSI) kept in S3-compatible object storage.
//!
//! Gigabyte-sized slides arrive as resumable multipart uploads, become slide
//! records owned by the uploading user, and are viewed through Deep Zoom
//! tiles rendered on demand from the stored pyramid using HTTP range
//! requests. Analysis runs on an external inference service; this crate
//! tracks the task lifecycle and accepts its status callbacks.
//!
//! ## Architecture
//!
//! - [`storage`] - Object store gateway with retries, S3 and in-memory backends
//! - [`upload`] - Upload sessions over multipart uploads
//! - [`slide`] - Slide records, owner-scoped, with cascading delete
//! - [`io`] - Range readers, block cache, singleflight
//! - [`mod@format`] - Pyramidal TIFF/SVS parsing and JPEG tile extraction
//! - [`tile`] - Deep Zoom geometry, tile rendering and caching
//! - [`inference`] - Inference task state machine and service client
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_slide_service::{
//!     create_router, AppState, InferenceService, MemoryCatalog, MemoryObjectStore,
//!     RetryPolicy, RouterConfig, SlideRegistry, StorageGateway, TileEngine,
//!     TileEngineConfig, UploadManager, UploadPolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = StorageGateway::new(Arc::new(MemoryObjectStore::new()), RetryPolicy::default());
//!     let registry = Arc::new(SlideRegistry::new(Arc::new(MemoryCatalog::new()), gateway.clone()));
//!     let state = AppState {
//!         uploads: Arc::new(UploadManager::new(
//!             gateway.clone(),
//!             registry.clone(),
//!             UploadPolicy::default(),
//!         )),
//!         tiles: TileEngine::attach(registry.clone(), gateway, TileEngineConfig::default()),
//!         inference: Arc::new(InferenceService::new(registry.clone(), None)),
//!         registry,
//!         cache_max_age: 3600,
//!     };
//!
//!     let router = create_router(state, RouterConfig::new("auth-secret", "webhook-key"));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod inference;
pub mod io;
pub mod server;
pub mod slide;
pub mod storage;
pub mod tile;
pub mod upload;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{Cli, Command, ServeConfig, StorageBackend, TokenConfig, TokenOutputFormat};
pub use error::{
    ErrorKind, InferenceError, IoError, RegistryError, StorageError, TiffError, TileError,
    UploadError,
};
pub use inference::{
    HttpInferenceClient, InferenceClient, InferenceService, InferenceTask, TaskState,
};
pub use server::{
    create_router, AppState, AuthError, AuthUser, ErrorResponse, RouterConfig, TokenAuth,
};
pub use slide::{CatalogStore, MemoryCatalog, Slide, SlideId, SlideRegistry};
pub use storage::{
    MemoryObjectStore, ObjectStore, RetryPolicy, S3ObjectStore, StorageGateway,
};
pub use tile::{PyramidDescriptor, TileCache, TileEngine, TileEngineConfig, TileResponse};
pub use upload::{UploadId, UploadManager, UploadPolicy, UploadStatus};

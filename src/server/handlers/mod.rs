//! Axum handlers, grouped by resource.
//!
//! Every handler except [`health_handler`] and the webhook runs behind the
//! bearer middleware and reads the caller from [`AuthUser`](super::auth::AuthUser).

mod inference;
mod slides;
mod uploads;
mod viewer;

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::inference::InferenceService;
use crate::slide::SlideRegistry;
use crate::tile::{EngineStats, TileEngine};
use crate::upload::UploadManager;

pub use inference::{
    callback_handler, cancel_task_handler, get_task_handler, list_tasks_handler,
    start_inference_handler, CallbackResponse, StartInference, TaskListQuery,
};
pub use slides::{
    bulk_delete_handler, delete_slide_handler, get_slide_handler, list_slides_handler,
    rename_slide_handler, slide_tasks_handler, BulkDeleteRequest, RenameSlide,
};
pub use uploads::{
    abort_upload_handler, finish_upload_handler, get_upload_handler, start_upload_handler,
    upload_part_handler, AbortedUpload,
};
pub use viewer::{dzi_handler, tile_handler, TILE_CACHE_HIT_HEADER};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState {
    pub uploads: Arc<UploadManager>,
    pub registry: Arc<SlideRegistry>,
    pub tiles: Arc<TileEngine>,
    pub inference: Arc<InferenceService>,

    /// Cache-Control max-age in seconds for viewer responses
    pub cache_max_age: u32,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            uploads: Arc::clone(&self.uploads),
            registry: Arc::clone(&self.registry),
            tiles: Arc::clone(&self.tiles),
            inference: Arc::clone(&self.inference),
            cache_max_age: self.cache_max_age,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    pub upload_sessions: usize,
    pub cache: EngineStats,
}

/// `GET /health`
///
/// ```json
/// { "status": "healthy", "version": "0.1.0", "upload_sessions": 0, "cache": { ... } }
/// ```
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upload_sessions: state.uploads.session_count().await,
        cache: state.tiles.stats().await,
    })
}

//! `/slides` handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

use super::AppState;
use crate::error::{InferenceError, RegistryError};
use crate::inference::InferenceTask;
use crate::server::auth::AuthUser;
use crate::slide::{BulkDeleteOutcome, Page, Pagination, Slide, SlideId};

/// Body of `PATCH /slides/{id}`.
#[derive(Debug, Deserialize)]
pub struct RenameSlide {
    pub name: String,
}

/// Body of `POST /slides/bulk-delete`.
#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub slide_ids: Vec<String>,
}

fn slide_id(raw: &str) -> Result<SlideId, RegistryError> {
    SlideId::parse(raw).ok_or_else(|| RegistryError::NotFound(raw.to_string()))
}

/// `GET /slides?limit=20&offset=0`, newest first.
pub async fn list_slides_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<Slide>>, RegistryError> {
    Ok(Json(
        state.registry.list_by_owner(user.id(), pagination).await?,
    ))
}

/// `GET /slides/{id}`
pub async fn get_slide_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Slide>, RegistryError> {
    Ok(Json(state.registry.get(user.id(), slide_id(&id)?).await?))
}

/// `PATCH /slides/{id}` with `{ "name": "..." }`
pub async fn rename_slide_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<RenameSlide>,
) -> Result<Json<Slide>, RegistryError> {
    let slide = state
        .registry
        .rename(user.id(), slide_id(&id)?, &body.name)
        .await?;
    Ok(Json(slide))
}

/// `DELETE /slides/{id}`
///
/// Removes the slide object, its record, its inference tasks and its cached
/// tiles. Returns 204.
pub async fn delete_slide_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.delete(user.id(), slide_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /slides/bulk-delete` with `{ "slide_ids": [...] }`
///
/// Each id succeeds or fails independently:
///
/// ```json
/// { "deleted_ids": ["..."], "failed": [{ "id": "...", "error": "Slide not found: ..." }] }
/// ```
pub async fn bulk_delete_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteOutcome>, RegistryError> {
    Ok(Json(
        state
            .registry
            .bulk_delete(user.id(), &body.slide_ids)
            .await?,
    ))
}

/// `GET /slides/{id}/tasks`
pub async fn slide_tasks_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<InferenceTask>>, InferenceError> {
    let slide_id = SlideId::parse(&id)
        .ok_or_else(|| InferenceError::NotFound(format!("slide {}", id)))?;
    Ok(Json(
        state.inference.list_slide_tasks(user.id(), slide_id).await?,
    ))
}

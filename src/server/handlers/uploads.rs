//! `/uploads` handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;

use super::AppState;
use crate::error::UploadError;
use crate::server::auth::AuthUser;
use crate::upload::{
    FinishedUpload, PartReceipt, StartUpload, StartedUpload, UploadId, UploadSnapshot,
    UploadStatus,
};

/// Response of an abort.
#[derive(Debug, Serialize)]
pub struct AbortedUpload {
    pub session_id: UploadId,
    pub status: UploadStatus,
}

fn session_id(raw: &str) -> Result<UploadId, UploadError> {
    UploadId::parse(raw).ok_or_else(|| UploadError::NotFound(raw.to_string()))
}

/// `POST /uploads`
///
/// Body: `{ "filename": "a.svs", "name": "Case 12", "size": 123456789, "model_id": null }`
///
/// Returns 201 with the session id, the recommended `part_size` and the
/// `max_part_size` limit on part bodies.
pub async fn start_upload_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<StartUpload>,
) -> Result<(StatusCode, Json<StartedUpload>), UploadError> {
    let started = state.uploads.start_upload(user.id(), request).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// `GET /uploads/{session_id}`
pub async fn get_upload_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<UploadSnapshot>, UploadError> {
    let snapshot = state.uploads.get_session(user.id(), session_id(&id)?).await?;
    Ok(Json(snapshot))
}

/// `PUT /uploads/{session_id}/parts/{part_number}` with the raw part as body.
pub async fn upload_part_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, part_number)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<PartReceipt>, UploadError> {
    let part_number: u32 = part_number.parse().map_err(|_| {
        UploadError::Validation(format!("Invalid part number: {}", part_number))
    })?;
    let receipt = state
        .uploads
        .upload_part(user.id(), session_id(&id)?, part_number, body)
        .await?;
    Ok(Json(receipt))
}

/// `POST /uploads/{session_id}/finish`
///
/// Returns 201 with `{ "session_id", "slide_id", "status": "completed" }`.
pub async fn finish_upload_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<FinishedUpload>), UploadError> {
    let finished = state
        .uploads
        .finish_upload(user.id(), session_id(&id)?)
        .await?;
    Ok((StatusCode::CREATED, Json(finished)))
}

/// `POST /uploads/{session_id}/abort`
pub async fn abort_upload_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AbortedUpload>, UploadError> {
    let session_id = session_id(&id)?;
    let status = state.uploads.abort_upload(user.id(), session_id).await?;
    Ok(Json(AbortedUpload { session_id, status }))
}

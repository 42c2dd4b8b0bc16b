//! `/inference` handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::AppState;
use crate::error::InferenceError;
use crate::inference::{
    CallbackOutcome, CancelOutcome, InferenceTask, TaskState, Transition, WebhookCallback,
    MSG_STATUS_UPDATED,
};
use crate::server::auth::AuthUser;
use crate::slide::{Page, Pagination, SlideId};

/// Body of `POST /inference`.
#[derive(Debug, Deserialize)]
pub struct StartInference {
    pub slide_id: String,
    /// Defaults to 0.5; must lie in [0, 0.9]
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Query of `GET /inference/tasks`.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    /// PENDING, STARTED, SUCCESS, FAILURE or REVOKED (any case)
    pub state: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Acknowledgement of a webhook callback.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub inference_task_id: String,
    /// The reported state, echoed back
    pub state: TaskState,
    pub updated: bool,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

/// `POST /inference` with `{ "slide_id": "...", "confidence": 0.5 }`
///
/// Returns 201 with the new task.
pub async fn start_inference_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<StartInference>,
) -> Result<(StatusCode, Json<InferenceTask>), InferenceError> {
    let slide_id = SlideId::parse(&body.slide_id)
        .ok_or_else(|| InferenceError::NotFound(format!("slide {}", body.slide_id)))?;
    let task = state
        .inference
        .start(user.id(), slide_id, body.confidence)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `GET /inference/tasks?state=&limit=&offset=`
pub async fn list_tasks_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Page<InferenceTask>>, InferenceError> {
    let pagination = Pagination {
        limit: query.limit,
        offset: query.offset,
    };
    let page = state
        .inference
        .list_tasks(user.id(), query.state.as_deref(), pagination)
        .await?;
    Ok(Json(page))
}

/// `GET /inference/tasks/{id}`
pub async fn get_task_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<InferenceTask>, InferenceError> {
    Ok(Json(state.inference.get_task(user.id(), &id).await?))
}

/// `POST /inference/tasks/{id}/cancel`
///
/// Cancelling a finished task is not an error; the response says so.
pub async fn cancel_task_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<CancelOutcome>, InferenceError> {
    Ok(Json(state.inference.cancel(user.id(), &id).await?))
}

/// `POST /inference/webhook/callback`, authenticated by `X-API-Key`.
///
/// Unknown task ids are acknowledged with `updated: false` so the inference
/// service does not keep retrying them.
pub async fn callback_handler(
    State(state): State<AppState>,
    Json(callback): Json<WebhookCallback>,
) -> Result<Json<CallbackResponse>, InferenceError> {
    let received_at = OffsetDateTime::now_utc();
    let inference_task_id = callback.inference_task_id.clone();
    let reported = callback.state;
    let outcome = state.inference.handle_callback(callback).await?;
    let message = match outcome {
        CallbackOutcome::UnknownTask => "Unknown task",
        CallbackOutcome::Processed(Transition::Applied) => MSG_STATUS_UPDATED,
        CallbackOutcome::Processed(Transition::Unchanged) => "Task already in that state",
        CallbackOutcome::Processed(Transition::Rejected) => "Stale state report ignored",
    };
    Ok(Json(CallbackResponse {
        inference_task_id,
        state: reported,
        updated: outcome.updated(),
        message: message.to_string(),
        received_at,
    }))
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{format_description, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, warn};

use crate::error::{InferenceError, RegistryError};
use crate::slide::{Page, Pagination, SlideId, SlideRegistry};

use super::client::{InferenceClient, Submission};
use super::task::{InferenceTask, TaskId, TaskState, Transition, MSG_CANCELLED};

/// Confidence threshold used when the request does not give one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Highest confidence threshold accepted.
pub const MAX_CONFIDENCE: f64 = 0.9;

/// Timestamp layout used by the inference service's callbacks.
const CALLBACK_TIMESTAMP_FORMAT: &str = "[year]/[month]/[day] [hour]:[minute]:[second]";

/// State report posted by the inference service.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCallback {
    pub inference_task_id: String,
    pub state: TaskState,
    /// "YYYY/MM/DD HH:MM:SS" in UTC, or RFC 3339
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// What a callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// No task has this external id
    UnknownTask,
    Processed(Transition),
}

impl CallbackOutcome {
    pub fn updated(&self) -> bool {
        matches!(self, CallbackOutcome::Processed(Transition::Applied))
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub id: TaskId,
    pub state: TaskState,
    pub message: String,
}

/// Parse a callback timestamp, accepting the service's own layout or RFC 3339.
pub fn parse_callback_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(at) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(at);
    }
    let format = format_description::parse(CALLBACK_TIMESTAMP_FORMAT).ok()?;
    PrimitiveDateTime::parse(value, &format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

fn validate_confidence(confidence: Option<f64>) -> Result<f64, InferenceError> {
    let confidence = confidence.unwrap_or(DEFAULT_CONFIDENCE);
    if !(0.0..=MAX_CONFIDENCE).contains(&confidence) {
        return Err(InferenceError::Validation(format!(
            "confidence must be between 0.0 and {}",
            MAX_CONFIDENCE
        )));
    }
    Ok(confidence)
}

fn not_found(err: RegistryError, what: &str) -> InferenceError {
    match err {
        RegistryError::NotFound(_) => InferenceError::NotFound(what.to_string()),
        other => InferenceError::Registry(other),
    }
}

/// Tracks inference tasks for slides.
///
/// Tasks are only created here and only change state through [`cancel`]
/// or the service's callbacks.
///
/// [`cancel`]: InferenceService::cancel
pub struct InferenceService {
    registry: Arc<SlideRegistry>,
    client: Option<Arc<dyn InferenceClient>>,
}

impl InferenceService {
    pub fn new(registry: Arc<SlideRegistry>, client: Option<Arc<dyn InferenceClient>>) -> Self {
        Self { registry, client }
    }

    fn client(&self) -> Result<&Arc<dyn InferenceClient>, InferenceError> {
        self.client.as_ref().ok_or(InferenceError::NotConfigured)
    }

    /// Queue an analysis of one of the owner's slides.
    ///
    /// # Errors
    /// - `Validation` if `confidence` is outside [0, 0.9]
    /// - `NotFound` if the slide does not exist or belongs to someone else
    /// - `Upstream` if the inference service refuses or cannot be reached
    pub async fn start(
        &self,
        owner: &str,
        slide_id: SlideId,
        confidence: Option<f64>,
    ) -> Result<InferenceTask, InferenceError> {
        let confidence = validate_confidence(confidence)?;
        let slide = self
            .registry
            .get(owner, slide_id)
            .await
            .map_err(|e| not_found(e, &format!("slide {}", slide_id)))?;
        let client = self.client()?;

        let submitted = client
            .submit(&Submission {
                slide_id: slide.id.to_string(),
                file_extension: slide.slide_type.clone(),
                confidence,
            })
            .await?;

        let task = InferenceTask::new(
            submitted.inference_task_id,
            slide.id,
            owner.to_string(),
            confidence,
            submitted.state,
            OffsetDateTime::now_utc(),
        );
        self.registry
            .catalog()
            .insert_task(task.clone())
            .await
            .map_err(|e| not_found(e, &format!("slide {}", slide_id)))?;

        info!(
            task_id = %task.id,
            external_id = %task.external_id,
            slide_id = %slide_id,
            confidence,
            "Inference task queued"
        );
        Ok(task)
    }

    /// Owner's tasks, newest first.
    ///
    /// # Errors
    /// `Validation` for an unknown state name or bad pagination.
    pub async fn list_tasks(
        &self,
        owner: &str,
        state: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<InferenceTask>, InferenceError> {
        let state = match state {
            Some(raw) => Some(TaskState::parse(raw).ok_or_else(|| {
                InferenceError::Validation(format!(
                    "Invalid state '{}'. Must be one of: {}",
                    raw,
                    TaskState::ALL.map(|s| s.as_str()).join(", ")
                ))
            })?),
            None => None,
        };
        let (limit, offset) = pagination.resolve().map_err(InferenceError::Validation)?;
        let (items, total) = self
            .registry
            .catalog()
            .list_tasks(owner, state, limit, offset)
            .await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Every task of one of the owner's slides.
    pub async fn list_slide_tasks(
        &self,
        owner: &str,
        slide_id: SlideId,
    ) -> Result<Vec<InferenceTask>, InferenceError> {
        self.registry
            .get(owner, slide_id)
            .await
            .map_err(|e| not_found(e, &format!("slide {}", slide_id)))?;
        Ok(self.registry.catalog().list_slide_tasks(slide_id).await?)
    }

    /// One of the owner's tasks. Malformed ids are reported as not found.
    pub async fn get_task(&self, owner: &str, task_id: &str) -> Result<InferenceTask, InferenceError> {
        let missing = || InferenceError::NotFound(format!("task {}", task_id));
        let id = TaskId::parse(task_id).ok_or_else(missing)?;
        match self.registry.catalog().get_task(id).await? {
            Some(task) if task.owner == owner => Ok(task),
            _ => Err(missing()),
        }
    }

    /// Cancel one of the owner's tasks.
    ///
    /// A task that already finished is returned as is, without contacting
    /// the inference service.
    pub async fn cancel(&self, owner: &str, task_id: &str) -> Result<CancelOutcome, InferenceError> {
        let task = self.get_task(owner, task_id).await?;
        if task.state.is_terminal() {
            return Ok(already_finished(&task));
        }

        let state = self.client()?.cancel(&task.external_id).await?;
        let updated = self
            .registry
            .catalog()
            .apply_task_state(task.id, state, Some(MSG_CANCELLED.to_string()), OffsetDateTime::now_utc())
            .await?;

        match updated {
            Some((task, Transition::Applied)) => {
                info!(task_id = %task.id, state = %task.state, "Inference task cancelled");
                Ok(CancelOutcome {
                    id: task.id,
                    state: task.state,
                    message: MSG_CANCELLED.to_string(),
                })
            }
            // A callback finished the task while the cancel was in flight
            Some((task, _)) => Ok(already_finished(&task)),
            None => Err(InferenceError::NotFound(format!("task {}", task_id))),
        }
    }

    /// Apply a state report from the inference service.
    ///
    /// Redelivered reports are no-ops and reports for unknown tasks are
    /// ignored, so the service never sees an error for either.
    pub async fn handle_callback(
        &self,
        callback: WebhookCallback,
    ) -> Result<CallbackOutcome, InferenceError> {
        let catalog = self.registry.catalog();
        let Some(task) = catalog.find_task_by_external(&callback.inference_task_id).await? else {
            warn!(
                external_id = %callback.inference_task_id,
                state = %callback.state,
                "Callback for unknown inference task ignored"
            );
            return Ok(CallbackOutcome::UnknownTask);
        };

        let at = callback
            .timestamp
            .as_deref()
            .and_then(parse_callback_timestamp)
            .unwrap_or_else(OffsetDateTime::now_utc);

        let Some((task, transition)) = catalog
            .apply_task_state(task.id, callback.state, callback.message, at)
            .await?
        else {
            warn!(external_id = %callback.inference_task_id, "Task removed before callback applied");
            return Ok(CallbackOutcome::UnknownTask);
        };

        match transition {
            Transition::Applied => info!(task_id = %task.id, state = %task.state, "Inference task updated"),
            Transition::Unchanged => debug!(task_id = %task.id, state = %task.state, "Duplicate callback ignored"),
            Transition::Rejected => warn!(
                task_id = %task.id,
                current = %task.state,
                reported = %callback.state,
                "Out-of-order callback ignored"
            ),
        }
        Ok(CallbackOutcome::Processed(transition))
    }
}

fn already_finished(task: &InferenceTask) -> CancelOutcome {
    CancelOutcome {
        id: task.id,
        state: task.state,
        message: format!("Task already {}", task.state.as_str().to_lowercase()),
    }
}

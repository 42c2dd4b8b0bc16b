use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::error::InferenceError;

use super::task::TaskState;

/// Timeout for submitting a task.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for cancelling a task.
pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a submission to the inference service.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub slide_id: String,
    /// Slide type, e.g. "svs"
    pub file_extension: String,
    pub confidence: f64,
}

/// The inference service's answer to a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedTask {
    pub inference_task_id: String,
    pub state: TaskState,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    state: TaskState,
}

/// The external inference service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Queue an analysis run.
    async fn submit(&self, submission: &Submission) -> Result<SubmittedTask, InferenceError>;

    /// Revoke a queued or running analysis and return its new state.
    async fn cancel(&self, external_id: &str) -> Result<TaskState, InferenceError>;
}

/// [`InferenceClient`] speaking the service's JSON API.
pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpInferenceClient {
    /// # Errors
    /// `Validation` if `base_url` does not parse.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, InferenceError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| InferenceError::Validation(format!("Invalid inference URL: {}", e)))?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InferenceError> {
        self.base_url.join(path).map_err(|e| InferenceError::Upstream {
            message: format!("Invalid endpoint {}: {}", path, e),
            transient: false,
        })
    }
}

fn request_error(err: reqwest::Error) -> InferenceError {
    InferenceError::Upstream {
        transient: err.is_timeout() || err.is_connect() || err.is_request(),
        message: err.to_string(),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::Upstream {
        message: format!("inference service returned {}: {}", status, body.trim()),
        transient: status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
    })
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    #[instrument(skip(self), fields(slide_id = %submission.slide_id))]
    async fn submit(&self, submission: &Submission) -> Result<SubmittedTask, InferenceError> {
        let response = self
            .http
            .post(self.endpoint("inference")?)
            .header("X-API-Key", &self.api_key)
            .json(submission)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;
        let task: SubmittedTask = check_status(response)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        debug!(external_id = %task.inference_task_id, state = %task.state, "Inference task submitted");
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, external_id: &str) -> Result<TaskState, InferenceError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("inference/tasks/{}", external_id))?)
            .header("X-API-Key", &self.api_key)
            .timeout(CANCEL_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;
        let body: CancelResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        Ok(body.state)
    }
}

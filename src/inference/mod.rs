//! Inference task tracking.
//!
//! The inference service itself is external. This module submits work to it,
//! records one [`InferenceTask`] per submission and moves tasks through their
//! states as the service reports progress through its webhook.
//!
//! States only move forward (PENDING → STARTED → SUCCESS/FAILURE/REVOKED),
//! so callbacks can be redelivered or arrive out of order without
//! corrupting a task.

mod client;
mod service;
mod task;

pub use client::{
    HttpInferenceClient, InferenceClient, Submission, SubmittedTask, CANCEL_TIMEOUT,
    SUBMIT_TIMEOUT,
};
pub use service::{
    parse_callback_timestamp, CallbackOutcome, CancelOutcome, InferenceService, WebhookCallback,
    DEFAULT_CONFIDENCE, MAX_CONFIDENCE,
};
pub use task::{
    InferenceTask, TaskId, TaskState, Transition, MSG_CANCELLED, MSG_QUEUED, MSG_STATUS_UPDATED,
};

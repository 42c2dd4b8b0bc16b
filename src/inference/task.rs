use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::slide::SlideId;

/// Message recorded when a task is queued.
pub const MSG_QUEUED: &str = "Inference task queued";

/// Message recorded when a task is cancelled.
pub const MSG_CANCELLED: &str = "Inference task cancelled";

/// Message returned to the webhook caller.
pub const MSG_STATUS_UPDATED: &str = "Task status updated";

/// Internal identifier of an inference task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string; `None` if it is not a UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of an inference task, as reported by the inference service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
    /// Cancelled by the user
    Revoked,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Pending,
        TaskState::Started,
        TaskState::Success,
        TaskState::Failure,
        TaskState::Revoked,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Position in the PENDING → STARTED → terminal order.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Started => 1,
            Self::Success | Self::Failure | Self::Revoked => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Revoked => "REVOKED",
        }
    }

    /// Parse a state name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying a state report to a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The task moved to the new state
    Applied,
    /// The task was already in that state; nothing changed
    Unchanged,
    /// The report would move the task backwards or out of a terminal state
    Rejected,
}

/// One external analysis run bound to a slide.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceTask {
    pub id: TaskId,
    /// Task id assigned by the inference service
    pub external_id: String,
    pub slide_id: SlideId,
    pub owner: String,
    pub confidence: f64,
    pub state: TaskState,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl InferenceTask {
    pub fn new(
        external_id: String,
        slide_id: SlideId,
        owner: String,
        confidence: f64,
        state: TaskState,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: TaskId::new(),
            external_id,
            slide_id,
            owner,
            confidence,
            state,
            message: Some(MSG_QUEUED.to_string()),
            created_at: now,
            updated_at: now,
            completed_at: state.is_terminal().then_some(now),
        }
    }

    /// Apply a state report.
    ///
    /// States only move forward: PENDING → STARTED → terminal, or straight
    /// from PENDING to a terminal state. Re-reporting the current state is a
    /// no-op, so redelivered webhooks leave the task untouched, and
    /// `completed_at` is set once, on the first terminal transition.
    pub fn apply(
        &mut self,
        state: TaskState,
        message: Option<String>,
        at: OffsetDateTime,
    ) -> Transition {
        if state == self.state {
            return Transition::Unchanged;
        }
        if self.state.is_terminal() || state.rank() < self.state.rank() {
            return Transition::Rejected;
        }

        self.state = state;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = at;
        if state.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(at);
        }
        Transition::Applied
    }
}

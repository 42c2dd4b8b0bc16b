//! Upload Session Manager.
//!
//! A slide arrives as a resumable multipart transfer:
//!
//! ```text
//! start_upload ──▶ OPEN ──upload_part (any order, in parallel)──▶ OPEN
//!                   │                                             │
//!                   │ abort / reaper                  finish_upload
//!                   ▼                                             ▼
//!           ABORTED / EXPIRED ◀── storage refuses ── COMPLETING ──▶ COMPLETED
//!                                                        │            (slide created)
//!                                                        └─ transient failure ─▶ OPEN
//! ```

mod manager;
mod session;

pub use manager::{
    FinishedUpload, StartUpload, StartedUpload, UploadManager, DEFAULT_REAPER_INTERVAL,
};
pub use session::{
    validate_part_number, PartReceipt, ReceivedPart, UploadId, UploadPolicy, UploadSession,
    UploadSnapshot, UploadStatus, DEFAULT_MAX_PART_SIZE, DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE,
    DEFAULT_PART_SIZE, DEFAULT_SESSION_TTL,
};

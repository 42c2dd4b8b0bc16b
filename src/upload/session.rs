use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::UploadError;
use crate::slide::SlideId;
use crate::storage::{CompletedPart, MultipartUpload, MAX_PART_NUMBER};

/// Smallest slide accepted (1 MiB).
pub const DEFAULT_MIN_SIZE: u64 = 1024 * 1024;

/// Largest slide accepted (50 GiB).
pub const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// Part size recommended to clients (100 MiB).
pub const DEFAULT_PART_SIZE: u64 = 100 * 1024 * 1024;

/// Largest part body accepted (1 GiB). Parts are buffered in memory.
pub const DEFAULT_MAX_PART_SIZE: u64 = 1024 * 1024 * 1024;

/// How long an untouched session stays open.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Identifier of an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string; `None` if it is not a UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an upload session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Accepting parts
    Open,
    /// Storage is assembling the parts
    Completing,
    Completed,
    Aborted,
    Expired,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied to new uploads.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    /// Lowercase extensions without the dot
    pub allowed_extensions: Vec<String>,
    pub min_size: u64,
    pub max_size: u64,
    /// Recommended part size
    pub part_size: u64,
    /// Largest part body accepted
    pub max_part_size: u64,
    pub session_ttl: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["svs".to_string()],
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            part_size: DEFAULT_PART_SIZE,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl UploadPolicy {
    /// Check the filename against the allow-list and return its extension.
    pub fn validate_filename(&self, filename: &str) -> Result<String, UploadError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(stem, ext)| (stem.trim(), ext.to_ascii_lowercase()))
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
            .map(|(_, ext)| ext)
            .ok_or_else(|| {
                UploadError::Validation(format!("Filename '{}' has no extension", filename))
            })?;

        if !self.allowed_extensions.iter().any(|e| *e == extension) {
            return Err(UploadError::Validation(format!(
                "File type '.{}' is not allowed. Allowed types: {}",
                extension,
                self.allowed_extensions.join(", ")
            )));
        }
        Ok(extension)
    }

    pub fn validate_size(&self, size: u64) -> Result<(), UploadError> {
        if size < self.min_size {
            return Err(UploadError::Validation(format!(
                "File too small. Minimum size is {} bytes",
                self.min_size
            )));
        }
        if size > self.max_size {
            return Err(UploadError::Validation(format!(
                "File too large. Maximum size is {} bytes",
                self.max_size
            )));
        }
        Ok(())
    }

    /// Number of parts a file of `size` bytes splits into.
    pub fn num_parts(&self, size: u64) -> u64 {
        size.div_ceil(self.part_size.max(1))
    }
}

/// A part storage has acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedPart {
    pub tag: String,
    pub size: u64,
    /// Hex SHA-256 of the part body
    pub checksum: String,
}

/// One resumable multipart transfer.
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub id: UploadId,
    pub owner: String,
    pub filename: String,
    /// Display name the slide will get
    pub name: String,
    pub model_id: Option<String>,
    pub extension: String,
    pub declared_size: u64,
    pub multipart: MultipartUpload,
    pub status: UploadStatus,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// When the session reached a terminal status
    pub ended_at: Option<OffsetDateTime>,
    pub parts: BTreeMap<u32, ReceivedPart>,
    /// Parts currently being sent to storage, with their sizes
    pub in_flight: BTreeMap<u32, u64>,
    pub slide_id: Option<SlideId>,
    /// Whether storage has discarded the multipart upload after an abort
    pub cleaned_up: bool,
}

impl UploadSession {
    pub fn storage_key(&self) -> &str {
        &self.multipart.key
    }

    pub fn bytes_received(&self) -> u64 {
        self.parts.values().map(|p| p.size).sum()
    }

    /// Bytes stored plus bytes still on their way to storage.
    pub fn bytes_committed(&self) -> u64 {
        self.bytes_received() + self.in_flight.values().sum::<u64>()
    }

    /// Move to a terminal status.
    pub fn end(&mut self, status: UploadStatus, at: OffsetDateTime) {
        self.status = status;
        self.ended_at = Some(at);
    }

    /// Fail unless the session is in `expected`.
    pub fn require(&self, expected: UploadStatus, action: &str) -> Result<(), UploadError> {
        if self.status == expected {
            return Ok(());
        }
        Err(self.state_error(format!("cannot {}", action)))
    }

    pub fn state_error(&self, message: impl Into<String>) -> UploadError {
        UploadError::InvalidState {
            session_id: self.id.to_string(),
            status: self.status,
            message: message.into(),
        }
    }

    /// Part numbers missing from 1..=highest received part.
    pub fn missing_parts(&self) -> Vec<u32> {
        let highest = self.parts.keys().next_back().copied().unwrap_or(0);
        (1..=highest)
            .filter(|n| !self.parts.contains_key(n))
            .collect()
    }

    /// Parts in part-number order, as storage expects them at completion.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .iter()
            .map(|(&part_number, part)| CompletedPart {
                part_number,
                tag: part.tag.clone(),
            })
            .collect()
    }

    pub fn snapshot(&self, part_size: u64) -> UploadSnapshot {
        UploadSnapshot {
            session_id: self.id,
            status: self.status,
            filename: self.filename.clone(),
            name: self.name.clone(),
            upload_target_key: self.multipart.key.clone(),
            declared_size: self.declared_size,
            part_size,
            bytes_received: self.bytes_received(),
            parts: self
                .parts
                .iter()
                .map(|(&part_number, part)| PartReceipt {
                    part_number,
                    part_tag: part.tag.clone(),
                    size: part.size,
                })
                .collect(),
            slide_id: self.slide_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Check a part number against the storage limit.
pub fn validate_part_number(part_number: u32) -> Result<(), UploadError> {
    if !(1..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(UploadError::Validation(format!(
            "Part number must be between 1 and {}",
            MAX_PART_NUMBER
        )));
    }
    Ok(())
}

/// Acknowledgement of one stored part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartReceipt {
    pub part_number: u32,
    pub part_tag: String,
    pub size: u64,
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, Serialize)]
pub struct UploadSnapshot {
    pub session_id: UploadId,
    pub status: UploadStatus,
    pub filename: String,
    pub name: String,
    pub upload_target_key: String,
    pub declared_size: u64,
    pub part_size: u64,
    pub bytes_received: u64,
    pub parts: Vec<PartReceipt>,
    pub slide_id: Option<SlideId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::RegistryError;

/// Default page size for list endpoints.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest page a caller may ask for.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Longest display name accepted.
pub const MAX_NAME_LENGTH: usize = 255;

/// Identifier of a finalized slide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlideId(Uuid);

impl SlideId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string; `None` if it is not a UUID.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SlideId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlideId({})", self.0)
    }
}

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finalized, owned slide.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Slide {
    pub id: SlideId,
    pub name: String,
    pub owner: String,
    pub original_filename: String,
    /// Object key of the slide file
    pub storage_key: String,
    /// File type, the lowercase extension (e.g. "svs")
    #[serde(rename = "type")]
    pub slide_type: String,
    pub model_id: Option<String>,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Normalise a display name: trimmed, non-empty, bounded length.
pub fn validate_name(name: &str) -> Result<String, RegistryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistryError::Validation(
            "Slide name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(RegistryError::Validation(format!(
            "Slide name is longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

/// `limit`/`offset` query parameters.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Resolve defaults and check bounds, returning `(limit, offset)`.
    pub fn resolve(&self) -> Result<(usize, usize), String> {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(format!("limit must be between 1 and {}", MAX_PAGE_LIMIT));
        }
        Ok((limit, self.offset.unwrap_or(0)))
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

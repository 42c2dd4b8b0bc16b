//! Object store gateway.
//!
//! Durable blob storage with multipart-upload primitives. Backends implement
//! [`ObjectStore`] and report every failure as either transient or permanent;
//! [`StorageGateway`] wraps a backend with retries and part verification so
//! callers only ever deal with those two outcome categories.

mod gateway;
mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

pub use gateway::{RetryPolicy, StorageGateway};
pub use memory::{Fault, MemoryObjectStore};
pub use s3::{create_s3_client, S3ObjectStore};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Highest part number accepted by S3-compatible multipart uploads.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Smallest part size S3 accepts for every part except the last (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest part size S3 accepts (5 GiB).
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Handle to a multipart upload in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    /// Key the assembled object will live under
    pub key: String,
    /// Upload id assigned by the backend
    pub upload_id: String,
}

/// A part as recorded by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    pub tag: String,
    pub size: u64,
}

/// A part to assemble at completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub tag: String,
}

/// Object metadata returned by HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
}

/// Where a completed object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub key: String,
    pub size: u64,
}

/// Blob storage backend.
///
/// Implementations classify their own failures: anything that may succeed on
/// retry is [`StorageError::Transient`], everything else is permanent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload and return the backend's upload id.
    async fn begin_multipart(&self, key: &str) -> StorageResult<String>;

    /// Store one part and return the tag (ETag) the backend recorded for it.
    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// List the parts the backend has recorded, ordered by part number.
    async fn list_parts(&self, upload: &MultipartUpload) -> StorageResult<Vec<PartInfo>>;

    /// Assemble the given parts, in order, into the final object.
    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Discard an upload and every part stored for it.
    async fn abort_multipart(&self, upload: &MultipartUpload) -> StorageResult<()>;

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Read `len` bytes starting at `offset`.
    async fn get_range(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Key an uploaded slide is stored under.
pub fn slide_object_key(session_id: &str, extension: &str) -> String {
    format!("slides/{}.{}", session_id, extension)
}

/// Key the inference service writes a slide's results to.
pub fn results_object_key(slide_id: &str) -> String {
    format!("results/{}.pkl", slide_id)
}

/// Strip the quotes S3 puts around ETags so tags compare by value.
pub(crate) fn normalize_tag(tag: &str) -> &str {
    tag.trim_matches('"')
}

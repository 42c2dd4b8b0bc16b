use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{
    normalize_tag, CompletedPart, MultipartUpload, ObjectLocation, ObjectMeta, ObjectStore,
    StorageResult,
};
use crate::error::StorageError;

/// Default number of attempts per storage call (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default ceiling on the delay between retries.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Bounded exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

/// Object store gateway shared by every session and slide.
///
/// Retries transient failures with [`RetryPolicy`], surfaces permanent ones
/// immediately, and verifies part tags against what storage recorded before
/// assembling a multipart upload.
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Start a multipart upload for `key`.
    pub async fn begin_multipart(&self, key: &str) -> StorageResult<MultipartUpload> {
        let upload_id = self
            .with_retry("begin_multipart", || self.store.begin_multipart(key))
            .await?;
        debug!(key, upload_id = %upload_id, "Multipart upload started");
        Ok(MultipartUpload {
            key: key.to_string(),
            upload_id,
        })
    }

    /// Upload one part and return its tag.
    pub async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        self.with_retry("upload_part", || {
            self.store.upload_part(upload, part_number, data.clone())
        })
        .await
    }

    /// Assemble the upload from `parts`.
    ///
    /// Parts are sorted by part number before submission. Every supplied tag
    /// is first checked against the parts storage has recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PartMismatch`] if a part is missing in storage
    /// or its recorded tag differs from the supplied one.
    pub async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> StorageResult<ObjectLocation> {
        let mut ordered = parts.to_vec();
        ordered.sort_by_key(|p| p.part_number);

        let recorded = self
            .with_retry("list_parts", || self.store.list_parts(upload))
            .await?;

        for part in &ordered {
            let found = recorded.iter().find(|r| r.part_number == part.part_number);
            match found {
                Some(r) if normalize_tag(&r.tag) == normalize_tag(&part.tag) => {}
                Some(r) => {
                    return Err(StorageError::PartMismatch {
                        part_number: part.part_number,
                        expected: part.tag.clone(),
                        found: r.tag.clone(),
                    })
                }
                None => {
                    return Err(StorageError::PartMismatch {
                        part_number: part.part_number,
                        expected: part.tag.clone(),
                        found: "<missing>".to_string(),
                    })
                }
            }
        }

        let result = self
            .with_retry("complete_multipart", || {
                self.store.complete_multipart(upload, &ordered)
            })
            .await;

        match result {
            Ok(()) => {}
            // A retried complete can race its own earlier success.
            Err(StorageError::UploadNotFound(id)) => {
                if self.store.head(&upload.key).await.is_err() {
                    return Err(StorageError::UploadNotFound(id));
                }
                debug!(key = %upload.key, "Multipart upload already assembled");
            }
            Err(err) => return Err(err),
        }

        let meta = self.head(&upload.key).await?;
        info!(
            key = %upload.key,
            parts = ordered.len(),
            size = meta.size,
            "Multipart upload completed"
        );
        Ok(ObjectLocation {
            key: upload.key.clone(),
            size: meta.size,
        })
    }

    /// Abort the upload. Aborting an upload storage no longer knows is a no-op.
    pub async fn abort_multipart(&self, upload: &MultipartUpload) -> StorageResult<()> {
        match self
            .with_retry("abort_multipart", || self.store.abort_multipart(upload))
            .await
        {
            Ok(()) | Err(StorageError::UploadNotFound(_)) => {
                debug!(key = %upload.key, upload_id = %upload.upload_id, "Multipart upload aborted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.with_retry("head", || self.store.head(key)).await
    }

    /// Read `len` bytes of `key` starting at `offset`.
    pub async fn get_object(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes> {
        self.with_retry("get_range", || self.store.get_range(key, offset, len))
            .await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.with_retry("delete", || self.store.delete(key)).await
    }
}

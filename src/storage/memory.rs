use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use super::{CompletedPart, MultipartUpload, ObjectMeta, ObjectStore, PartInfo, StorageResult};
use crate::error::StorageError;

/// Failure to inject into the next call of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Permanent,
}

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
    faults: HashMap<&'static str, VecDeque<Fault>>,
    pauses: HashMap<&'static str, VecDeque<oneshot::Receiver<()>>>,
    calls: HashMap<&'static str, usize>,
    next_upload: u64,
}

/// In-process object store.
///
/// Backs the `--storage memory` mode and the test suite. Faults queued with
/// [`MemoryObjectStore::inject_fault`] are returned by the next calls of the
/// named operation, one per call. [`MemoryObjectStore::pause`] holds the
/// next call of an operation open until the test releases it.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<MemoryState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a fault for the next call of `operation`.
    pub fn inject_fault(&self, operation: &'static str, fault: Fault) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Hold the next call of `operation` until the returned sender fires or
    /// is dropped. The call counts as made while it waits; a queued fault
    /// is returned once it resumes.
    pub fn pause(&self, operation: &'static str) -> oneshot::Sender<()> {
        let (release, wait) = oneshot::channel();
        self.lock()
            .pauses
            .entry(operation)
            .or_default()
            .push_back(wait);
        release
    }

    /// Number of times `operation` was called, faulted calls included.
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of multipart uploads neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Store an object directly, bypassing multipart.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.lock().objects.insert(key.into(), data.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    async fn enter(&self, operation: &'static str) -> StorageResult<MutexGuard<'_, MemoryState>> {
        let (pause, fault) = {
            let mut state = self.lock();
            *state.calls.entry(operation).or_default() += 1;
            let pause = state.pauses.get_mut(operation).and_then(|q| q.pop_front());
            let fault = state.faults.get_mut(operation).and_then(|q| q.pop_front());
            (pause, fault)
        };
        if let Some(wait) = pause {
            // A dropped sender releases the call too
            let _ = wait.await;
        }
        match fault {
            None => Ok(self.lock()),
            Some(Fault::Transient) => Err(StorageError::Transient {
                operation,
                message: "injected transient fault".to_string(),
            }),
            Some(Fault::Permanent) => Err(StorageError::Permanent {
                operation,
                message: "injected permanent fault".to_string(),
            }),
        }
    }
}

fn part_tag(data: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(data));
    format!("\"{}\"", &digest[..32])
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn begin_multipart(&self, key: &str) -> StorageResult<String> {
        let mut state = self.enter("begin_multipart").await?;
        state.next_upload += 1;
        let upload_id = format!("mem-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let mut state = self.enter("upload_part").await?;
        let pending = state
            .uploads
            .get_mut(&upload.upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(upload.upload_id.clone()))?;
        let tag = part_tag(&data);
        pending.parts.insert(part_number, (tag.clone(), data));
        Ok(tag)
    }

    async fn list_parts(&self, upload: &MultipartUpload) -> StorageResult<Vec<PartInfo>> {
        let state = self.enter("list_parts").await?;
        let pending = state
            .uploads
            .get(&upload.upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(upload.upload_id.clone()))?;
        Ok(pending
            .parts
            .iter()
            .map(|(n, (tag, data))| PartInfo {
                part_number: *n,
                tag: tag.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let mut state = self.enter("complete_multipart").await?;
        let pending = state
            .uploads
            .get(&upload.upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(upload.upload_id.clone()))?;

        let mut assembled = BytesMut::new();
        for part in parts {
            match pending.parts.get(&part.part_number) {
                Some((tag, data)) if *tag == part.tag => assembled.extend_from_slice(data),
                _ => {
                    return Err(StorageError::Permanent {
                        operation: "complete_multipart",
                        message: format!("InvalidPart: part {}", part.part_number),
                    })
                }
            }
        }

        let key = pending.key.clone();
        state.uploads.remove(&upload.upload_id);
        state.objects.insert(key, assembled.freeze());
        Ok(())
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> StorageResult<()> {
        let mut state = self.enter("abort_multipart").await?;
        state
            .uploads
            .remove(&upload.upload_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::UploadNotFound(upload.upload_id.clone()))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let state = self.enter("head").await?;
        state
            .objects
            .get(key)
            .map(|data| ObjectMeta {
                size: data.len() as u64,
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes> {
        let state = self.enter("get_range").await?;
        let data = state
            .objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let end = offset.saturating_add(len);
        if end > data.len() as u64 {
            return Err(StorageError::Permanent {
                operation: "get_range",
                message: format!(
                    "range {}..{} not satisfiable for {} bytes",
                    offset,
                    end,
                    data.len()
                ),
            });
        }
        Ok(data.slice(offset as usize..end as usize))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut state = self.enter("delete").await?;
        state.objects.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

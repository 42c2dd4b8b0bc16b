//! Upload Session Manager.
//!
//! Each session sits behind its own pair of locks:
//! - `state` guards the session record and is held only for short,
//!   non-blocking mutations, so parts of one session upload in parallel
//! - `lifecycle` is held for the whole of a completion, an abort or an
//!   expiry, so those never interleave for the same session
//!
//! The session map itself is only locked to find or insert an entry, so
//! unrelated sessions never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::slide::{validate_name, Slide, SlideId, SlideRegistry};
use crate::storage::{slide_object_key, MultipartUpload, StorageGateway};

use super::session::{
    validate_part_number, PartReceipt, ReceivedPart, UploadId, UploadPolicy, UploadSession,
    UploadSnapshot, UploadStatus,
};

/// How often the reaper looks for expired sessions by default.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(300);

/// Request to open a session.
#[derive(Clone, Debug, Deserialize)]
pub struct StartUpload {
    pub filename: String,
    /// Display name of the slide
    pub name: String,
    /// Declared total size in bytes
    pub size: u64,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// A freshly opened session.
#[derive(Clone, Debug, Serialize)]
pub struct StartedUpload {
    pub session_id: UploadId,
    pub upload_target_key: String,
    pub part_size: u64,
    /// Largest part body the service accepts
    pub max_part_size: u64,
    pub num_parts: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// A completed session and the slide it produced.
#[derive(Clone, Debug, Serialize)]
pub struct FinishedUpload {
    pub session_id: UploadId,
    pub slide_id: SlideId,
    pub status: UploadStatus,
}

struct SessionEntry {
    owner: String,
    state: Mutex<UploadSession>,
    lifecycle: Arc<Mutex<()>>,
}

pub struct UploadManager {
    gateway: StorageGateway,
    registry: Arc<SlideRegistry>,
    policy: UploadPolicy,
    sessions: RwLock<HashMap<UploadId, Arc<SessionEntry>>>,
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl UploadManager {
    pub fn new(gateway: StorageGateway, registry: Arc<SlideRegistry>, policy: UploadPolicy) -> Self {
        Self {
            gateway,
            registry,
            policy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Number of sessions tracked, terminal ones included.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn entry(&self, owner: &str, id: UploadId) -> Result<Arc<SessionEntry>, UploadError> {
        let entry = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        if entry.owner != owner {
            return Err(UploadError::NotFound(id.to_string()));
        }
        Ok(entry)
    }

    /// Open a session.
    ///
    /// Everything is validated before storage is contacted.
    ///
    /// # Errors
    /// - `Validation` for a disallowed extension, a size outside the policy
    ///   bounds, or a name that is empty or already used by the owner
    /// - `Storage` if the multipart upload could not be started
    pub async fn start_upload(
        &self,
        owner: &str,
        request: StartUpload,
    ) -> Result<StartedUpload, UploadError> {
        let extension = self.policy.validate_filename(&request.filename)?;
        self.policy.validate_size(request.size)?;
        let name = validate_name(&request.name)?;
        if !self.registry.name_available(owner, &name).await? {
            return Err(UploadError::Validation(format!(
                "A slide named '{}' already exists",
                name
            )));
        }

        let id = UploadId::new();
        let key = slide_object_key(&id.to_string(), &extension);
        let multipart = self.gateway.begin_multipart(&key).await?;

        let now = OffsetDateTime::now_utc();
        let session = UploadSession {
            id,
            owner: owner.to_string(),
            filename: request.filename,
            name,
            model_id: request.model_id,
            extension,
            declared_size: request.size,
            multipart,
            status: UploadStatus::Open,
            created_at: now,
            expires_at: now + self.policy.session_ttl,
            ended_at: None,
            parts: Default::default(),
            in_flight: Default::default(),
            slide_id: None,
            cleaned_up: false,
        };
        let started = StartedUpload {
            session_id: id,
            upload_target_key: key.clone(),
            part_size: self.policy.part_size,
            max_part_size: self.policy.max_part_size,
            num_parts: self.policy.num_parts(request.size),
            expires_at: session.expires_at,
        };

        self.sessions.write().await.insert(
            id,
            Arc::new(SessionEntry {
                owner: owner.to_string(),
                state: Mutex::new(session),
                lifecycle: Arc::new(Mutex::new(())),
            }),
        );

        info!(
            session_id = %id,
            owner = %owner,
            key = %key,
            declared_size = request.size,
            "Upload session opened"
        );
        Ok(started)
    }

    /// Store one part.
    ///
    /// Re-sending a part with the same bytes returns the original receipt.
    ///
    /// # Errors
    /// - `Validation` for a bad part number, an empty or oversized body, or
    ///   a part that would push the total, in-flight parts included, over
    ///   the declared size
    /// - `InvalidState` if the session is not open, the part is still in
    ///   flight, or the part was already accepted with different bytes
    /// - `Storage` if storage failed after retries; the session stays open
    pub async fn upload_part(
        &self,
        owner: &str,
        id: UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartReceipt, UploadError> {
        validate_part_number(part_number)?;
        if data.is_empty() {
            return Err(UploadError::Validation("Part body is empty".to_string()));
        }
        if data.len() as u64 > self.policy.max_part_size {
            return Err(UploadError::Validation(format!(
                "Part is larger than the {} byte limit",
                self.policy.max_part_size
            )));
        }
        let entry = self.entry(owner, id).await?;
        let digest = checksum(&data);
        let size = data.len() as u64;

        let multipart = {
            let mut session = entry.state.lock().await;
            session.require(UploadStatus::Open, "upload parts")?;

            if let Some(existing) = session.parts.get(&part_number) {
                if existing.checksum == digest {
                    debug!(session_id = %id, part_number, "Part already stored");
                    return Ok(PartReceipt {
                        part_number,
                        part_tag: existing.tag.clone(),
                        size: existing.size,
                    });
                }
                return Err(session.state_error(format!(
                    "part {} was already accepted with different content",
                    part_number
                )));
            }
            if session.in_flight.contains_key(&part_number) {
                return Err(session.state_error(format!(
                    "part {} is already being uploaded",
                    part_number
                )));
            }
            // Parts still in flight count toward the limit
            let limit = session.declared_size.min(self.policy.max_size);
            if session.bytes_committed() + size > limit {
                return Err(UploadError::Validation(format!(
                    "Part {} would exceed the declared size of {} bytes",
                    part_number, session.declared_size
                )));
            }

            session.in_flight.insert(part_number, size);
            session.multipart.clone()
        };

        // Run the transfer detached so a dropped request cannot leave the
        // part marked in flight.
        let handle = tokio::spawn(store_part(
            self.gateway.clone(),
            entry,
            multipart,
            part_number,
            data,
            digest,
            self.policy.session_ttl,
        ));

        let receipt = handle
            .await
            .map_err(|e| UploadError::Internal(format!("part upload task failed: {}", e)))??;
        debug!(session_id = %id, part_number, size, "Part stored");
        Ok(receipt)
    }

    /// Assemble the parts and register the slide.
    ///
    /// Completion runs on a detached task, so a client that disconnects
    /// mid-request never leaves the session stuck in `Completing`.
    /// Finishing an already completed session returns the same slide.
    ///
    /// # Errors
    /// - `InvalidState` if parts are missing or in flight, fewer bytes than
    ///   declared were received, or the session is not open
    /// - `Storage` (transient) if storage failed after retries; the session
    ///   is open again and finishing can be retried
    /// - `Storage` (permanent) if storage refused the parts; the session is
    ///   aborted and its parts discarded
    pub async fn finish_upload(
        self: &Arc<Self>,
        owner: &str,
        id: UploadId,
    ) -> Result<FinishedUpload, UploadError> {
        let entry = self.entry(owner, id).await?;
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.complete(entry).await });
        handle
            .await
            .map_err(|e| UploadError::Internal(format!("completion task failed: {}", e)))?
    }

    async fn complete(&self, entry: Arc<SessionEntry>) -> Result<FinishedUpload, UploadError> {
        let _lifecycle = entry.lifecycle.lock().await;

        let (multipart, parts, id) = {
            let mut session = entry.state.lock().await;
            if let (UploadStatus::Completed, Some(slide_id)) = (session.status, session.slide_id) {
                return Ok(FinishedUpload {
                    session_id: session.id,
                    slide_id,
                    status: UploadStatus::Completed,
                });
            }
            session.require(UploadStatus::Open, "finish")?;
            if !session.in_flight.is_empty() {
                return Err(session.state_error(format!(
                    "parts {:?} are still uploading",
                    session.in_flight.keys().collect::<Vec<_>>()
                )));
            }
            if session.parts.is_empty() {
                return Err(session.state_error("no parts have been uploaded"));
            }
            let missing = session.missing_parts();
            if !missing.is_empty() {
                return Err(session.state_error(format!("missing parts {:?}", missing)));
            }

            let received = session.bytes_received();
            if received != session.declared_size {
                return Err(session.state_error(format!(
                    "received {} of {} declared bytes",
                    received, session.declared_size
                )));
            }

            session.status = UploadStatus::Completing;
            (session.multipart.clone(), session.completed_parts(), session.id)
        };

        info!(session_id = %id, parts = parts.len(), "Completing upload");

        let location = match self.gateway.complete_multipart(&multipart, &parts).await {
            Ok(location) => location,
            Err(e) if e.is_transient() => {
                entry.state.lock().await.status = UploadStatus::Open;
                warn!(session_id = %id, error = %e, "Completion failed, session reopened");
                return Err(e.into());
            }
            Err(e) => {
                entry
                    .state
                    .lock()
                    .await
                    .end(UploadStatus::Aborted, OffsetDateTime::now_utc());
                error!(session_id = %id, error = %e, "Completion refused by storage, aborting");
                self.discard(&entry, &multipart).await;
                return Err(e.into());
            }
        };

        let slide = {
            let session = entry.state.lock().await;
            Slide {
                id: SlideId::new(),
                name: session.name.clone(),
                owner: session.owner.clone(),
                original_filename: session.filename.clone(),
                storage_key: location.key.clone(),
                slide_type: session.extension.clone(),
                model_id: session.model_id.clone(),
                size_bytes: location.size,
                created_at: OffsetDateTime::now_utc(),
            }
        };

        match self.registry.create(slide).await {
            Ok(slide_id) => {
                let mut session = entry.state.lock().await;
                session.end(UploadStatus::Completed, OffsetDateTime::now_utc());
                session.slide_id = Some(slide_id);
                info!(session_id = %id, slide_id = %slide_id, size = location.size, "Upload completed");
                Ok(FinishedUpload {
                    session_id: id,
                    slide_id,
                    status: UploadStatus::Completed,
                })
            }
            Err(e) => {
                // The object is assembled but no slide can own it
                {
                    let mut session = entry.state.lock().await;
                    session.end(UploadStatus::Aborted, OffsetDateTime::now_utc());
                    session.cleaned_up = true;
                }
                warn!(session_id = %id, error = %e, "Slide registration failed, removing object");
                if let Err(delete_err) = self.gateway.delete(&location.key).await {
                    error!(key = %location.key, error = %delete_err, "Failed to remove orphaned object");
                }
                Err(e.into())
            }
        }
    }

    /// Abort a session and discard its parts.
    ///
    /// A session being completed is aborted only after the completion ends,
    /// and only if it did not succeed. Aborting an aborted or expired session
    /// is a no-op that retries storage cleanup if needed.
    ///
    /// # Errors
    /// `InvalidState` if the session completed.
    pub async fn abort_upload(&self, owner: &str, id: UploadId) -> Result<UploadStatus, UploadError> {
        let entry = self.entry(owner, id).await?;
        let _lifecycle = entry.lifecycle.lock().await;

        let multipart = {
            let mut session = entry.state.lock().await;
            match session.status {
                UploadStatus::Completed => {
                    return Err(session.state_error("cannot abort a completed upload"));
                }
                UploadStatus::Aborted | UploadStatus::Expired if session.cleaned_up => {
                    return Ok(session.status);
                }
                UploadStatus::Aborted | UploadStatus::Expired => {}
                UploadStatus::Open | UploadStatus::Completing => {
                    session.end(UploadStatus::Aborted, OffsetDateTime::now_utc());
                }
            }
            session.multipart.clone()
        };

        self.gateway.abort_multipart(&multipart).await?;
        let mut session = entry.state.lock().await;
        session.cleaned_up = true;
        info!(session_id = %id, "Upload aborted");
        Ok(session.status)
    }

    pub async fn get_session(&self, owner: &str, id: UploadId) -> Result<UploadSnapshot, UploadError> {
        let entry = self.entry(owner, id).await?;
        let session = entry.state.lock().await;
        Ok(session.snapshot(self.policy.part_size))
    }

    /// Expire idle open sessions, retry pending cleanups and forget
    /// sessions that ended more than one TTL ago.
    ///
    /// Sessions busy completing or aborting are left for the next sweep.
    /// Returns the number of sessions expired.
    pub async fn reap_expired(&self, now: OffsetDateTime) -> usize {
        let entries: Vec<(UploadId, Arc<SessionEntry>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();

        let mut expired = 0;
        let mut forget = Vec::new();
        for (id, entry) in entries {
            let Ok(_lifecycle) = entry.lifecycle.try_lock() else {
                continue;
            };

            let cleanup = {
                let mut session = entry.state.lock().await;
                match session.status {
                    UploadStatus::Open if session.expires_at <= now && session.in_flight.is_empty() => {
                        session.end(UploadStatus::Expired, now);
                        expired += 1;
                        info!(session_id = %id, owner = %session.owner, "Upload session expired");
                        Some(session.multipart.clone())
                    }
                    UploadStatus::Aborted | UploadStatus::Expired if !session.cleaned_up => {
                        Some(session.multipart.clone())
                    }
                    status if status.is_terminal() => {
                        if session
                            .ended_at
                            .is_some_and(|ended| ended + self.policy.session_ttl <= now)
                        {
                            forget.push(id);
                        }
                        None
                    }
                    _ => None,
                }
            };

            if let Some(multipart) = cleanup {
                self.discard(&entry, &multipart).await;
            }
        }

        if !forget.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &forget {
                sessions.remove(id);
            }
        }
        debug!(expired, forgotten = forget.len(), "Upload sessions swept");
        expired
    }

    /// Run [`reap_expired`](Self::reap_expired) every `every` until
    /// `shutdown` turns true.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.reap_expired(OffsetDateTime::now_utc()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Session reaper stopped");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Abort the multipart upload in storage, recording success.
    async fn discard(&self, entry: &SessionEntry, multipart: &MultipartUpload) {
        match self.gateway.abort_multipart(multipart).await {
            Ok(()) => entry.state.lock().await.cleaned_up = true,
            Err(e) => warn!(
                key = %multipart.key,
                error = %e,
                "Failed to discard multipart upload, will retry"
            ),
        }
    }
}

async fn store_part(
    gateway: StorageGateway,
    entry: Arc<SessionEntry>,
    multipart: MultipartUpload,
    part_number: u32,
    data: Bytes,
    checksum: String,
    ttl: Duration,
) -> Result<PartReceipt, UploadError> {
    let size = data.len() as u64;
    let stored = gateway.upload_part(&multipart, part_number, data).await;

    let mut session = entry.state.lock().await;
    session.in_flight.remove(&part_number);
    let tag = stored?;

    if session.status != UploadStatus::Open {
        let err = session.state_error("session ended while the part was uploading");
        drop(session);
        // Storage may keep a part that raced an abort
        if let Err(e) = gateway.abort_multipart(&multipart).await {
            warn!(key = %multipart.key, error = %e, "Failed to discard late part");
        }
        return Err(err);
    }

    session.parts.insert(
        part_number,
        ReceivedPart {
            tag: tag.clone(),
            size,
            checksum,
        },
    );
    session.expires_at = OffsetDateTime::now_utc() + ttl;
    Ok(PartReceipt {
        part_number,
        part_tag: tag,
        size,
    })
}

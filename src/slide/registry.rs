//! Slide Registry: durable records of finalized slides.
//!
//! The registry owns the slide lifecycle after an upload completes:
//! - Creating the record once the object is assembled in storage
//! - Owner-scoped lookup, listing and renaming
//! - Deleting the backing object, the record and its inference tasks
//! - Telling interested components (the tile engine) that a slide is gone

use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, StorageError};
use crate::storage::{results_object_key, StorageGateway};

use super::model::{validate_name, Page, Pagination, Slide, SlideId};
use super::repository::CatalogStore;

/// Most ids accepted by one bulk delete.
pub const MAX_BULK_DELETE: usize = 100;

/// Notified after a slide has been deleted.
#[async_trait]
pub trait SlideListener: Send + Sync {
    async fn slide_deleted(&self, slide_id: SlideId);
}

/// Per-id outcome of a bulk delete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeleteOutcome {
    pub deleted_ids: Vec<String>,
    pub failed: Vec<BulkDeleteFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDeleteFailure {
    pub id: String,
    pub error: String,
}

// =============================================================================
// SlideRegistry
// =============================================================================

pub struct SlideRegistry {
    catalog: Arc<dyn CatalogStore>,
    gateway: StorageGateway,
    listeners: RwLock<Vec<Weak<dyn SlideListener>>>,
}

impl SlideRegistry {
    pub fn new(catalog: Arc<dyn CatalogStore>, gateway: StorageGateway) -> Self {
        Self {
            catalog,
            gateway,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Register a listener for deletions. Dropped listeners are pruned.
    pub fn subscribe(&self, listener: Weak<dyn SlideListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Record a slide whose object is already assembled in storage.
    ///
    /// # Errors
    /// `Validation` for an empty name or one the owner already uses.
    pub async fn create(&self, mut slide: Slide) -> Result<SlideId, RegistryError> {
        slide.name = validate_name(&slide.name)?;
        let id = slide.id;
        let owner = slide.owner.clone();
        self.catalog.insert_slide(slide).await?;
        info!(slide_id = %id, owner = %owner, "Slide registered");
        Ok(id)
    }

    /// Get one of the owner's slides.
    ///
    /// Slides owned by someone else are reported as not found.
    pub async fn get(&self, owner: &str, id: SlideId) -> Result<Slide, RegistryError> {
        match self.catalog.get_slide(id).await? {
            Some(slide) if slide.owner == owner => Ok(slide),
            _ => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// Get a slide regardless of owner.
    pub async fn lookup(&self, id: SlideId) -> Result<Option<Slide>, RegistryError> {
        self.catalog.get_slide(id).await
    }

    pub async fn name_available(&self, owner: &str, name: &str) -> Result<bool, RegistryError> {
        Ok(!self.catalog.name_taken(owner, name.trim()).await?)
    }

    /// Owner's slides, newest first.
    pub async fn list_by_owner(
        &self,
        owner: &str,
        pagination: Pagination,
    ) -> Result<Page<Slide>, RegistryError> {
        let (limit, offset) = pagination.resolve().map_err(RegistryError::Validation)?;
        let (items, total) = self.catalog.list_slides(owner, limit, offset).await?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Rename one of the owner's slides.
    ///
    /// Renaming to the current name is a no-op.
    pub async fn rename(
        &self,
        owner: &str,
        id: SlideId,
        new_name: &str,
    ) -> Result<Slide, RegistryError> {
        let slide = self.get(owner, id).await?;
        let name = validate_name(new_name)?;
        if name == slide.name {
            return Ok(slide);
        }
        let renamed = self.catalog.rename_slide(id, &name).await?;
        debug!(slide_id = %id, name = %renamed.name, "Slide renamed");
        Ok(renamed)
    }

    /// Delete one of the owner's slides.
    ///
    /// The slide object is deleted first; if that fails the record is kept
    /// so the delete can be retried. The record and its tasks are then
    /// removed together, the results object is removed best-effort, and
    /// listeners are notified.
    pub async fn delete(&self, owner: &str, id: SlideId) -> Result<Slide, RegistryError> {
        let slide = self.get(owner, id).await?;

        self.gateway.delete(&slide.storage_key).await?;

        let Some((slide, tasks)) = self.catalog.remove_slide(id).await? else {
            return Err(RegistryError::NotFound(id.to_string()));
        };

        let results_key = results_object_key(&id.to_string());
        match self.gateway.delete(&results_key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => warn!(slide_id = %id, key = %results_key, error = %e, "Failed to delete inference results"),
        }

        self.notify_deleted(id).await;

        info!(
            slide_id = %id,
            tasks_removed = tasks.len(),
            "Slide deleted"
        );
        Ok(slide)
    }

    /// Delete several slides, reporting each outcome separately.
    ///
    /// Failures never roll back slides already deleted.
    ///
    /// # Errors
    /// `Validation` if `ids` is empty or longer than [`MAX_BULK_DELETE`].
    pub async fn bulk_delete(
        &self,
        owner: &str,
        ids: &[String],
    ) -> Result<BulkDeleteOutcome, RegistryError> {
        if ids.is_empty() || ids.len() > MAX_BULK_DELETE {
            return Err(RegistryError::Validation(format!(
                "Between 1 and {} slide ids are required",
                MAX_BULK_DELETE
            )));
        }

        let mut outcome = BulkDeleteOutcome::default();
        for raw in ids {
            let result = match SlideId::parse(raw) {
                Some(id) => self.delete(owner, id).await.map(|_| ()),
                None => Err(RegistryError::NotFound(raw.clone())),
            };
            match result {
                Ok(()) => outcome.deleted_ids.push(raw.clone()),
                Err(e) => outcome.failed.push(BulkDeleteFailure {
                    id: raw.clone(),
                    error: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    async fn notify_deleted(&self, id: SlideId) {
        let listeners: Vec<Arc<dyn SlideListener>> = {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.slide_deleted(id).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

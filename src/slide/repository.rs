//! Persistence for slides and their inference tasks.
//!
//! Slides and tasks live behind one [`CatalogStore`] so that deleting a slide
//! and its tasks is a single atomic step, and so that name uniqueness is
//! checked in the same critical section that writes the name.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::inference::{InferenceTask, TaskId, TaskState, Transition};

use super::model::{Slide, SlideId};

/// Storage of slide and task records.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a slide.
    ///
    /// # Errors
    /// `Validation` if the owner already has a slide with the same name.
    async fn insert_slide(&self, slide: Slide) -> Result<(), RegistryError>;

    async fn get_slide(&self, id: SlideId) -> Result<Option<Slide>, RegistryError>;

    /// Owner's slides, newest first, plus the owner's total slide count.
    async fn list_slides(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Slide>, usize), RegistryError>;

    /// Set a slide's name.
    ///
    /// # Errors
    /// `NotFound` for an unknown slide, `Validation` if another of the
    /// owner's slides already has the name.
    async fn rename_slide(&self, id: SlideId, name: &str) -> Result<Slide, RegistryError>;

    /// Remove a slide together with its tasks. `None` if it was already gone.
    async fn remove_slide(
        &self,
        id: SlideId,
    ) -> Result<Option<(Slide, Vec<InferenceTask>)>, RegistryError>;

    async fn name_taken(&self, owner: &str, name: &str) -> Result<bool, RegistryError>;

    /// Insert a task.
    ///
    /// # Errors
    /// `NotFound` if the slide it refers to no longer exists.
    async fn insert_task(&self, task: InferenceTask) -> Result<(), RegistryError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<InferenceTask>, RegistryError>;

    async fn find_task_by_external(
        &self,
        external_id: &str,
    ) -> Result<Option<InferenceTask>, RegistryError>;

    /// Apply a state report to a task atomically.
    ///
    /// Returns the task after the update and what the update did, or `None`
    /// for an unknown task.
    async fn apply_task_state(
        &self,
        id: TaskId,
        state: TaskState,
        message: Option<String>,
        at: OffsetDateTime,
    ) -> Result<Option<(InferenceTask, Transition)>, RegistryError>;

    /// Owner's tasks, newest first, optionally filtered by state, plus the
    /// number of matching tasks.
    async fn list_tasks(
        &self,
        owner: &str,
        state: Option<TaskState>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<InferenceTask>, usize), RegistryError>;

    /// All tasks of one slide, newest first.
    async fn list_slide_tasks(&self, slide_id: SlideId)
        -> Result<Vec<InferenceTask>, RegistryError>;
}

#[derive(Default)]
struct Catalog {
    slides: HashMap<SlideId, Slide>,
    tasks: HashMap<TaskId, InferenceTask>,
}

impl Catalog {
    fn name_taken(&self, owner: &str, name: &str, except: Option<SlideId>) -> bool {
        self.slides
            .values()
            .any(|s| s.owner == owner && s.name == name && Some(s.id) != except)
    }
}

/// In-process [`CatalogStore`].
#[derive(Default)]
pub struct MemoryCatalog {
    inner: RwLock<Catalog>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> OffsetDateTime) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn insert_slide(&self, slide: Slide) -> Result<(), RegistryError> {
        let mut catalog = self.inner.write().await;
        if catalog.name_taken(&slide.owner, &slide.name, None) {
            return Err(RegistryError::Validation(format!(
                "A slide named '{}' already exists",
                slide.name
            )));
        }
        catalog.slides.insert(slide.id, slide);
        Ok(())
    }

    async fn get_slide(&self, id: SlideId) -> Result<Option<Slide>, RegistryError> {
        Ok(self.inner.read().await.slides.get(&id).cloned())
    }

    async fn list_slides(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Slide>, usize), RegistryError> {
        let catalog = self.inner.read().await;
        let mut slides: Vec<Slide> = catalog
            .slides
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        newest_first(&mut slides, |s| s.created_at);
        let total = slides.len();
        let page = slides.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn rename_slide(&self, id: SlideId, name: &str) -> Result<Slide, RegistryError> {
        let mut catalog = self.inner.write().await;
        let owner = match catalog.slides.get(&id) {
            Some(slide) => slide.owner.clone(),
            None => return Err(RegistryError::NotFound(id.to_string())),
        };
        if catalog.name_taken(&owner, name, Some(id)) {
            return Err(RegistryError::Validation(format!(
                "A slide named '{}' already exists",
                name
            )));
        }
        let slide = catalog
            .slides
            .get_mut(&id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        slide.name = name.to_string();
        Ok(slide.clone())
    }

    async fn remove_slide(
        &self,
        id: SlideId,
    ) -> Result<Option<(Slide, Vec<InferenceTask>)>, RegistryError> {
        let mut catalog = self.inner.write().await;
        let Some(slide) = catalog.slides.remove(&id) else {
            return Ok(None);
        };
        let task_ids: Vec<TaskId> = catalog
            .tasks
            .values()
            .filter(|t| t.slide_id == id)
            .map(|t| t.id)
            .collect();
        let tasks = task_ids
            .iter()
            .filter_map(|task_id| catalog.tasks.remove(task_id))
            .collect();
        Ok(Some((slide, tasks)))
    }

    async fn name_taken(&self, owner: &str, name: &str) -> Result<bool, RegistryError> {
        Ok(self.inner.read().await.name_taken(owner, name, None))
    }

    async fn insert_task(&self, task: InferenceTask) -> Result<(), RegistryError> {
        let mut catalog = self.inner.write().await;
        if !catalog.slides.contains_key(&task.slide_id) {
            return Err(RegistryError::NotFound(task.slide_id.to_string()));
        }
        catalog.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<InferenceTask>, RegistryError> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn find_task_by_external(
        &self,
        external_id: &str,
    ) -> Result<Option<InferenceTask>, RegistryError> {
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .values()
            .find(|t| t.external_id == external_id)
            .cloned())
    }

    async fn apply_task_state(
        &self,
        id: TaskId,
        state: TaskState,
        message: Option<String>,
        at: OffsetDateTime,
    ) -> Result<Option<(InferenceTask, Transition)>, RegistryError> {
        let mut catalog = self.inner.write().await;
        Ok(catalog.tasks.get_mut(&id).map(|task| {
            let transition = task.apply(state, message, at);
            (task.clone(), transition)
        }))
    }

    async fn list_tasks(
        &self,
        owner: &str,
        state: Option<TaskState>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<InferenceTask>, usize), RegistryError> {
        let catalog = self.inner.read().await;
        let mut tasks: Vec<InferenceTask> = catalog
            .tasks
            .values()
            .filter(|t| t.owner == owner && state.map_or(true, |s| t.state == s))
            .cloned()
            .collect();
        newest_first(&mut tasks, |t| t.created_at);
        let total = tasks.len();
        let page = tasks.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn list_slide_tasks(
        &self,
        slide_id: SlideId,
    ) -> Result<Vec<InferenceTask>, RegistryError> {
        let catalog = self.inner.read().await;
        let mut tasks: Vec<InferenceTask> = catalog
            .tasks
            .values()
            .filter(|t| t.slide_id == slide_id)
            .cloned()
            .collect();
        newest_first(&mut tasks, |t| t.created_at);
        Ok(tasks)
    }
}

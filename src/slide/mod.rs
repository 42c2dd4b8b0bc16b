//! Slide Registry.
//!
//! A slide exists once its upload session has completed and its object is
//! assembled in storage. The registry keeps the slide records, scopes every
//! access to the owning user, and cascades deletes to the slide's storage
//! object, its inference tasks and the tile engine's caches.
//!
//! ```text
//! ┌──────────────────┐   create    ┌─────────────────────┐
//! │  UploadManager   │ ──────────▶ │    SlideRegistry    │ ──▶ StorageGateway
//! └──────────────────┘             └──────────┬──────────┘     (delete objects)
//!                                             │
//!                               ┌─────────────┴────────────┐
//!                               ▼                          ▼
//!                       ┌───────────────┐         ┌─────────────────┐
//!                       │ CatalogStore  │         │  SlideListener  │
//!                       │ slides, tasks │         │  (tile engine)  │
//!                       └───────────────┘         └─────────────────┘
//! ```

mod model;
mod registry;
mod repository;

pub use model::{
    validate_name, Page, Pagination, Slide, SlideId, DEFAULT_PAGE_LIMIT, MAX_NAME_LENGTH,
    MAX_PAGE_LIMIT,
};
pub use registry::{
    BulkDeleteFailure, BulkDeleteOutcome, SlideListener, SlideRegistry, MAX_BULK_DELETE,
};
pub use repository::{CatalogStore, MemoryCatalog};

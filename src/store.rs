//! Seams to the external stores: catalogue, task queue, thumbnails.
//!
//! The engine never owns persistence. The local catalogue, the background
//! task store and the thumbnail cache all live outside this crate and are
//! consumed through the traits below, injected as `Arc<dyn ...>` so tests
//! and hosts can supply their own implementations.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by an external store implementation.
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Creates a store error from any displayable cause.
    pub fn new(cause: impl fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Read-only projection of one local book, supplied by the catalogue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBookView {
    /// Local catalogue id.
    pub id: i64,
    /// Raw ISBN as entered by the user; may be blank.
    pub isbn: String,
    /// Whether the user marked the book read.
    pub read: bool,
    /// Date reading ended, `YYYY-MM-DD`, when recorded.
    pub read_end: Option<String>,
    /// User rating, 0.0 when unrated.
    pub rating: f32,
    /// Raw shelf names the book sits on locally, in catalogue order.
    pub shelves: Vec<String>,
}

/// Kinds of per-book catalogue events the user can inspect and correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookEventKind {
    /// The book has no ISBN, so it can never be matched remotely.
    NoIsbn,
    /// The remote site has no book for this ISBN.
    NoMatch,
}

impl BookEventKind {
    /// Returns the event-kind tag used by the catalogue store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoIsbn => "no_isbn",
            Self::NoMatch => "no_match",
        }
    }
}

impl fmt::Display for BookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The local book catalogue, as far as synchronization needs it.
#[async_trait]
pub trait CatalogueStore: Send + Sync {
    /// Loads the export view of a book; `None` when the book was deleted.
    async fn book_for_export(&self, book_id: i64) -> Result<Option<LocalBookView>, StoreError>;

    /// Returns the cached remote id linked to a local book, 0 when
    /// unlinked.
    async fn remote_book_id(&self, book_id: i64) -> Result<u64, StoreError>;

    /// Persists a discovered remote id against a local book.
    async fn set_remote_book_id(&self, book_id: i64, remote_id: u64) -> Result<(), StoreError>;

    /// Records a successful synchronization timestamp for a book.
    async fn set_sync_date(&self, book_id: i64) -> Result<(), StoreError>;

    /// Appends a catalogue event of the given kind against a book.
    async fn record_event(&self, book_id: i64, kind: BookEventKind) -> Result<(), StoreError>;
}

/// External thumbnail cache.
#[async_trait]
pub trait ThumbnailStore: Send + Sync {
    /// Downloads the image at `url` and returns a local file reference.
    async fn save_from_url(&self, url: &str) -> Result<String, StoreError>;
}

/// Opaque category tag on queued tasks, used only for "is something of
/// this kind already queued" checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskCategory(pub &'static str);

impl TaskCategory {
    /// One-book export tasks.
    pub const EXPORT_ONE: Self = Self("export_one");
    /// Whole-catalogue export tasks.
    pub const EXPORT_ALL: Self = Self("export_all");
    /// Whole-catalogue import tasks.
    pub const IMPORT_ALL: Self = Self("import_all");
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A retryable unit of work driven by the external task store.
///
/// The store delivers at-least-once: it calls [`run`](QueueTask::run) and
/// interprets the result —
/// * `Ok(true)`: recorded, the task is done;
/// * `Ok(false)`: resubmit, honouring [`retry_delay`](QueueTask::retry_delay)
///   and persisting any [`exception`](QueueTask::exception) detail;
/// * `Err(_)`: the task goes back unmodified under the store's own backoff
///   (used for "re-authentication required").
#[async_trait]
pub trait QueueTask: Send {
    /// Executes one attempt.
    async fn run(&mut self) -> Result<bool, crate::error::ApiError>;

    /// Category tag for duplicate-work checks.
    fn category(&self) -> TaskCategory;

    /// Current delay, in seconds, before the next retry.
    fn retry_delay(&self) -> u64;

    /// Overrides the delay before the next retry.
    fn set_retry_delay(&mut self, secs: u64);

    /// Attaches diagnostic detail for the store to persist with the task.
    fn set_exception(&mut self, detail: &str);

    /// Returns the attached diagnostic detail, if any.
    fn exception(&self) -> Option<&str>;
}

/// The external background task store the engine enqueues into.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a task on the named queue after `delay_secs`.
    async fn enqueue(
        &self,
        task: Box<dyn QueueTask>,
        queue: &str,
        delay_secs: u64,
    ) -> Result<(), StoreError>;

    /// Whether any live task carries the given category.
    async fn has_active_tasks(&self, category: TaskCategory) -> Result<bool, StoreError>;
}

/// Checks that no bulk transfer is already queued before a caller enqueues
/// a new export-all or import-all.
///
/// # Errors
///
/// Propagates the store's error.
pub async fn bulk_transfer_is_queued(queue: &dyn TaskQueue) -> Result<bool, StoreError> {
    Ok(queue.has_active_tasks(TaskCategory::EXPORT_ALL).await?
        || queue.has_active_tasks(TaskCategory::IMPORT_ALL).await?)
}

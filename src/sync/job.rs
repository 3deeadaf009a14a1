//! The one-book export job driven by the external task store.
//!
//! The store delivers at-least-once and owns scheduling; the job owns the
//! outcome handling: terminal dispositions are recorded against the book,
//! transient ones resubmit with a bounded delay, and a rejected session
//! hands the job back unmodified for the store's own backoff.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::ApiError;
use crate::session::SessionManager;
use crate::store::{BookEventKind, CatalogueStore, QueueTask, TaskCategory};
use crate::sync::{ExportOutcome, SyncEngine};

/// Name of the queue export jobs are submitted to.
pub const QUEUE_MAIN: &str = "main";

/// Ceiling for the retry delay after a network failure. Network blips
/// resolve quickly; waiting out a long backoff would be wasted time.
const NETWORK_RETRY_CAP_SECS: u64 = 300;

/// Persistable state of a [`SendOneBookJob`], for the external store to
/// serialize between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Local id of the book to send.
    pub book_id: i64,
    /// Delay in seconds before the next retry.
    pub retry_delay: u64,
    /// Diagnostic detail from the last failed attempt.
    pub exception: Option<String>,
}

/// Sends a single book's shelves and review to the remote site.
pub struct SendOneBookJob {
    book_id: i64,
    retry_delay: u64,
    exception: Option<String>,
    engine: Arc<SyncEngine>,
    session: Arc<SessionManager>,
    store: Arc<dyn CatalogueStore>,
}

impl SendOneBookJob {
    /// Creates a job for the given local book.
    #[must_use]
    pub fn new(
        book_id: i64,
        engine: Arc<SyncEngine>,
        session: Arc<SessionManager>,
        store: Arc<dyn CatalogueStore>,
    ) -> Self {
        Self {
            book_id,
            retry_delay: 0,
            exception: None,
            engine,
            session,
            store,
        }
    }

    /// Rebuilds a job from persisted state.
    #[must_use]
    pub fn from_snapshot(
        snapshot: TaskSnapshot,
        engine: Arc<SyncEngine>,
        session: Arc<SessionManager>,
        store: Arc<dyn CatalogueStore>,
    ) -> Self {
        Self {
            book_id: snapshot.book_id,
            retry_delay: snapshot.retry_delay,
            exception: snapshot.exception,
            engine,
            session,
            store,
        }
    }

    /// Returns the persistable state of this job.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            book_id: self.book_id,
            retry_delay: self.retry_delay,
            exception: self.exception.clone(),
        }
    }

    /// Lowers the retry delay to `cap` when it exceeds it. Never raises a
    /// smaller delay.
    fn cap_retry_delay(&mut self, cap: u64) {
        if self.retry_delay > cap {
            debug!(
                from = self.retry_delay,
                to = cap,
                "capping retry delay after network failure"
            );
            self.retry_delay = cap;
        }
    }

    /// Records a store failure as the job's diagnostic.
    fn record_store_failure(&mut self, error: &crate::store::StoreError) {
        warn!(%error, book_id = self.book_id, "catalogue store failed");
        self.exception = Some(error.to_string());
    }

    /// Records a permanent per-book disposition as a catalogue event.
    /// These are successes from the queue's point of view: the user has to
    /// edit the book before a retry could do anything different.
    async fn record_disposition(
        &mut self,
        book_id: i64,
        kind: BookEventKind,
    ) -> Result<bool, ApiError> {
        match self.store.record_event(book_id, kind).await {
            Ok(()) => Ok(true),
            Err(error) => {
                self.record_store_failure(&error);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl QueueTask for SendOneBookJob {
    #[instrument(skip(self), fields(book_id = self.book_id))]
    async fn run(&mut self) -> Result<bool, ApiError> {
        // A dead session makes every signed call fail; validate first and
        // hand the job back untouched when we cannot.
        if !self.session.ensure_valid().await {
            return Err(ApiError::Auth);
        }

        let book = match self.store.book_for_export(self.book_id).await {
            Ok(Some(book)) => book,
            Ok(None) => {
                debug!("book no longer in the catalogue; nothing to send");
                return Ok(true);
            }
            Err(error) => {
                self.record_store_failure(&error);
                return Ok(false);
            }
        };

        match self.engine.send_one_book(self.store.as_ref(), &book).await {
            ExportOutcome::Sent => match self.store.set_sync_date(book.id).await {
                Ok(()) => Ok(true),
                Err(error) => {
                    self.record_store_failure(&error);
                    Ok(false)
                }
            },
            ExportOutcome::NoIsbn => self.record_disposition(book.id, BookEventKind::NoIsbn).await,
            ExportOutcome::NotFound => {
                self.record_disposition(book.id, BookEventKind::NoMatch).await
            }
            ExportOutcome::NetworkError => {
                self.cap_retry_delay(NETWORK_RETRY_CAP_SECS);
                Ok(false)
            }
            ExportOutcome::AuthError => Err(ApiError::Auth),
            ExportOutcome::Error { detail } => {
                warn!(detail = %detail, "export failed; resubmitting with diagnostic");
                self.exception = Some(detail);
                Ok(false)
            }
        }
    }

    fn category(&self) -> TaskCategory {
        TaskCategory::EXPORT_ONE
    }

    fn retry_delay(&self) -> u64 {
        self.retry_delay
    }

    fn set_retry_delay(&mut self, secs: u64) {
        self.retry_delay = secs;
    }

    fn set_exception(&mut self, detail: &str) {
        self.exception = Some(detail.to_string());
    }

    fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }
}

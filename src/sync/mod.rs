//! Shelf/review reconciliation against the remote site.
//!
//! [`SyncEngine`] wraps the site's scraped "API" (lookup, book page, shelf
//! mutations, review update) and implements [`send_one_book`], the
//! algorithm that aligns one local book's shelf membership and review
//! metadata with the remote account.
//!
//! [`send_one_book`]: SyncEngine::send_one_book

pub mod job;

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::error::ApiError;
use crate::gateway::{HttpGateway, SiteRequest};
use crate::isbn;
use crate::page::{PageExtractor, RemoteBookRecord};
use crate::shelf;
use crate::site::SiteConfig;
use crate::store::{CatalogueStore, ThumbnailStore};

/// Book link on the ISBN search results page; group 2 is the site book id.
#[allow(clippy::expect_used)]
static BOOK_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a href="/livres/([a-zA-Z0-9_-]+)/([0-9]+)" class="titre1""#)
        .expect("book link regex is valid") // Static pattern, safe to panic
});

/// Leading integer in a mutation response body. The shelf endpoints answer
/// with the bare review id, no markup.
#[allow(clippy::expect_used)]
static LEADING_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)").expect("leading id regex is valid") // Static pattern, safe to panic
});

/// Disposition of one book export attempt.
///
/// `Sent`, `NoIsbn` and `NotFound` are terminal and recorded permanently;
/// `NetworkError` and `AuthError` schedule a retry; `Error` is recorded
/// with its diagnostic and retried at the queue's discretion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The review and shelves were pushed remotely.
    Sent,
    /// The local book has no ISBN; it can never be matched.
    NoIsbn,
    /// No remote book matches this local book.
    NotFound,
    /// A transport failure interrupted the export.
    NetworkError,
    /// The session was rejected; re-authenticate and retry.
    AuthError,
    /// A shelf or review mutation failed for another reason.
    Error {
        /// Diagnostic detail for the queue to persist.
        detail: String,
    },
}

/// Remote operations plus the reconciliation algorithm over them.
#[derive(Debug)]
pub struct SyncEngine {
    site: SiteConfig,
    gateway: Arc<HttpGateway>,
    extractor: PageExtractor,
}

impl SyncEngine {
    /// Creates an engine for the given site, sharing the gateway.
    #[must_use]
    pub fn new(site: SiteConfig, gateway: Arc<HttpGateway>) -> Self {
        let extractor = PageExtractor::new(site.clone());
        Self {
            site,
            gateway,
            extractor,
        }
    }

    /// Fetches and extracts the book page for a known site id. The fetch is
    /// signed so the page carries the viewer's shelves and review id.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] when the page is gone; the usual gateway
    /// classification otherwise.
    #[instrument(skip(self, thumbnails))]
    pub async fn book_by_id(
        &self,
        book_id: u64,
        thumbnails: Option<&dyn ThumbnailStore>,
    ) -> Result<RemoteBookRecord, ApiError> {
        let request = SiteRequest::get(self.site.book_url(book_id));
        let html = self.gateway.execute_page(&request, true).await?;
        let mut record = match thumbnails {
            Some(store) => self.extractor.extract_with_thumbnail(&html, store).await,
            None => self.extractor.extract(&html),
        };
        if !record.is_empty() {
            record.remote_id = Some(book_id);
        }
        Ok(record)
    }

    /// Resolves an ISBN to a site book id through the search endpoint.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] when the results page links no book.
    #[instrument(skip(self))]
    pub async fn lookup_isbn(&self, isbn: &str) -> Result<u64, ApiError> {
        let url = self.site.isbn_lookup_url(isbn);
        let request = SiteRequest::get(&url);
        let html = self.gateway.execute(&request, false).await?;

        BOOK_LINK
            .captures(&html)
            .and_then(|caps| caps[2].parse::<u64>().ok())
            .ok_or_else(|| ApiError::not_found(&url))
    }

    /// Looks a book up by ISBN and extracts its page.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] when the ISBN matches nothing remotely.
    #[instrument(skip(self, thumbnails))]
    pub async fn book_by_isbn(
        &self,
        isbn: &str,
        thumbnails: Option<&dyn ThumbnailStore>,
    ) -> Result<RemoteBookRecord, ApiError> {
        let book_id = self.lookup_isbn(isbn).await?;
        self.book_by_id(book_id, thumbnails).await
    }

    /// Adds a book to a shelf (raw name; the site canonicalizes) and
    /// returns the review id the site answers with.
    ///
    /// # Errors
    ///
    /// [`ApiError::Reconciliation`] when the response carries no id; the
    /// usual gateway classification otherwise.
    #[instrument(skip(self))]
    pub async fn add_to_shelf(&self, shelf: &str, book_id: u64) -> Result<u64, ApiError> {
        let id = book_id.to_string();
        let request = SiteRequest::post_form(
            self.site.shelf_add_url(),
            &[("etagere", shelf), ("id_livre", &id)],
        );
        let body = self.gateway.execute(&request, true).await?;

        LEADING_ID
            .captures(body.trim())
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .filter(|&review_id| review_id != 0)
            .ok_or_else(|| {
                ApiError::reconciliation(format!(
                    "shelf add for {shelf:?} answered without a review id"
                ))
            })
    }

    /// Removes a book from a shelf (canonical name).
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] when the book was not on the shelf — callers
    /// treat that as already-removed.
    #[instrument(skip(self))]
    pub async fn remove_from_shelf(&self, shelf: &str, book_id: u64) -> Result<(), ApiError> {
        let id = book_id.to_string();
        let request = SiteRequest::post_form(
            self.site.shelf_remove_url(),
            &[("etagere", shelf), ("id_livre", &id)],
        );
        self.gateway.execute(&request, true).await?;
        Ok(())
    }

    /// Pushes the review state (read flag, read-end date, rating) for an
    /// existing review id. The site takes whole-star ratings.
    ///
    /// # Errors
    ///
    /// The usual gateway classification.
    #[instrument(skip(self))]
    pub async fn update_review(
        &self,
        review_id: u64,
        read: bool,
        read_end: Option<&str>,
        rating: f32,
    ) -> Result<(), ApiError> {
        let id = review_id.to_string();
        let stars = (rating as i64).to_string();
        let request = SiteRequest::post_form(
            self.site.review_update_url(),
            &[
                ("id_critique", &id),
                ("lu", if read { "1" } else { "0" }),
                ("date_fin", read_end.unwrap_or("")),
                ("note", &stars),
            ],
        );
        self.gateway.execute(&request, true).await?;
        Ok(())
    }

    /// Exports one book: resolves its remote counterpart, aligns shelf
    /// membership, and pushes the review state.
    ///
    /// Outcome mapping for unmatchable books: a blank ISBN is `NoIsbn`
    /// (the user must supply one); a checksum-invalid ISBN is `NotFound`
    /// (it can never match a real book).
    #[instrument(skip(self, store, book), fields(book_id = book.id))]
    pub async fn send_one_book(
        &self,
        store: &dyn CatalogueStore,
        book: &crate::store::LocalBookView,
    ) -> ExportOutcome {
        let isbn = book.isbn.trim();

        // Resolve the remote book, preferring a previously linked id.
        let mut remote_id = match store.remote_book_id(book.id).await {
            Ok(id) => id,
            Err(error) => {
                return ExportOutcome::Error {
                    detail: error.to_string(),
                };
            }
        };
        let mut remote: Option<RemoteBookRecord> = None;
        if remote_id != 0 {
            match self.book_by_id(remote_id, None).await {
                Ok(record) if !record.is_empty() => remote = Some(record),
                // Stale link: the id no longer resolves to a book page.
                Ok(_) | Err(ApiError::NotFound { .. }) => {
                    debug!(remote_id, "linked remote id is stale; falling back to ISBN");
                    remote_id = 0;
                }
                Err(ApiError::Auth) => return ExportOutcome::AuthError,
                Err(ApiError::Network { .. }) => return ExportOutcome::NetworkError,
                Err(error) => {
                    return ExportOutcome::Error {
                        detail: error.to_string(),
                    };
                }
            }
        }
        let is_new = remote.is_none();

        if remote_id == 0 {
            if isbn.is_empty() {
                return ExportOutcome::NoIsbn;
            }
            if !isbn::is_valid(isbn) {
                return ExportOutcome::NotFound;
            }
            match self.book_by_isbn(isbn, None).await {
                Ok(record) => match record.remote_id {
                    Some(id) if id != 0 => {
                        if let Err(error) = store.set_remote_book_id(book.id, id).await {
                            return ExportOutcome::Error {
                                detail: error.to_string(),
                            };
                        }
                        remote_id = id;
                        remote = Some(record);
                    }
                    _ => return ExportOutcome::NotFound,
                },
                Err(ApiError::NotFound { .. }) => return ExportOutcome::NotFound,
                Err(ApiError::Network { .. }) => return ExportOutcome::NetworkError,
                Err(ApiError::Auth) => return ExportOutcome::AuthError,
                Err(error) => {
                    return ExportOutcome::Error {
                        detail: error.to_string(),
                    };
                }
            }
        }

        // Review id is only trusted from a page fetched via the stored
        // link; a freshly discovered book gets its id from the adds below.
        let mut review_id = if is_new {
            0
        } else {
            remote.as_ref().map_or(0, |record| record.review_id)
        };

        // Local shelf set, canonicalized, plus the pseudo-shelf mirroring
        // the read flag (unless an equivalent shelf is already there).
        let mut shelves: Vec<String> = book.shelves.clone();
        let mut canonical: Vec<String> =
            shelves.iter().map(|name| shelf::canonical_name(name)).collect();
        let pseudo = shelf::pseudo_shelf(book.read);
        let pseudo_canonical = shelf::canonical_name(pseudo);
        if !canonical.contains(&pseudo_canonical) {
            shelves.push(pseudo.to_string());
            canonical.push(pseudo_canonical);
        }

        let remote_shelves: BTreeSet<String> = if is_new {
            BTreeSet::new()
        } else {
            remote
                .as_ref()
                .map_or_else(BTreeSet::new, |record| record.shelves.clone())
        };

        // Remove remote shelves we no longer hold locally. The site manages
        // its status shelves itself, so those are never removed here, and
        // not-found means "already off the shelf".
        for remote_shelf in &remote_shelves {
            if canonical.contains(remote_shelf) || shelf::is_protected(remote_shelf) {
                continue;
            }
            match self.remove_from_shelf(remote_shelf, remote_id).await {
                Ok(()) => {}
                Err(ApiError::NotFound { .. }) => {
                    debug!(shelf = %remote_shelf, "book already absent from shelf");
                }
                Err(ApiError::Auth) => return ExportOutcome::AuthError,
                Err(error) => {
                    return ExportOutcome::Error {
                        detail: error.to_string(),
                    };
                }
            }
        }

        // Add the local shelves missing remotely. Every successful add
        // answers with the review id; the last one wins.
        for (raw, canon) in shelves.iter().zip(&canonical) {
            if remote_shelves.contains(canon) {
                continue;
            }
            match self.add_to_shelf(raw, remote_id).await {
                Ok(id) => review_id = id,
                Err(ApiError::Auth) => return ExportOutcome::AuthError,
                Err(error) => {
                    return ExportOutcome::Error {
                        detail: error.to_string(),
                    };
                }
            }
        }

        // No add happened and no review was known: park the book on the
        // fallback shelf solely to obtain a review id.
        if review_id == 0 {
            match self.add_to_shelf(shelf::DEFAULT_SHELF, remote_id).await {
                Ok(id) => review_id = id,
                Err(ApiError::Auth) => return ExportOutcome::AuthError,
                Err(error) => {
                    return ExportOutcome::Error {
                        detail: error.to_string(),
                    };
                }
            }
        }

        match self
            .update_review(review_id, book.read, book.read_end.as_deref(), book.rating)
            .await
        {
            Ok(()) => ExportOutcome::Sent,
            Err(ApiError::Auth) => ExportOutcome::AuthError,
            Err(error) => {
                warn!(%error, review_id, "review update failed");
                ExportOutcome::Error {
                    detail: error.to_string(),
                }
            }
        }
    }
}

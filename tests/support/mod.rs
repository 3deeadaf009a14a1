//! Shared fixtures for the integration suites: canned site pages, mock
//! endpoint setup, and an in-memory catalogue store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booksync_core::site::markers;
use booksync_core::{
    BookEventKind, CatalogueStore, Credentials, HttpGateway, LocalBookView, RequestScheduler,
    SessionManager, SiteConfig, StoreError, SyncEngine,
};

/// Session cookie value the mock login hands out.
pub const SESSION_VALUE: &str = "s3ss10nv4lu3";

/// User id the mock profile page carries.
pub const USER_ID: u64 = 48231;

/// Test credentials accepted by the mock login endpoint.
pub fn credentials() -> Credentials {
    Credentials::new("reader", "hunter2")
}

/// The whole engine stack pointed at one mock server, with a fast
/// scheduler so suites do not wait out the production interval.
pub struct TestStack {
    pub site: SiteConfig,
    pub scheduler: Arc<RequestScheduler>,
    pub session: Arc<SessionManager>,
    pub gateway: Arc<HttpGateway>,
    pub engine: Arc<SyncEngine>,
}

impl TestStack {
    pub fn for_server(server: &MockServer) -> Self {
        let site = SiteConfig::new(server.uri());
        let scheduler = Arc::new(RequestScheduler::new(Duration::from_millis(5)));
        let session = Arc::new(SessionManager::new(site.clone(), Arc::clone(&scheduler)));
        let gateway = Arc::new(HttpGateway::new(
            Arc::clone(&scheduler),
            Arc::clone(&session),
        ));
        let engine = Arc::new(SyncEngine::new(site.clone(), Arc::clone(&gateway)));
        Self {
            site,
            scheduler,
            session,
            gateway,
            engine,
        }
    }
}

/// Body of a successful login response: the signed-in shell.
pub fn login_shell_body() -> String {
    format!("{}<p>Bienvenue</p>", markers::LOGGED_IN_SHELL)
}

/// Body of a rejected login.
pub fn bad_credentials_body() -> String {
    format!("<html><body>{}</body></html>", markers::BAD_CREDENTIALS)
}

/// Profile page carrying the hidden user-id field.
pub fn profile_body(user_id: u64) -> String {
    format!(
        "<html><body><input type=\"hidden\" id=\"hid_user\" value=\"{user_id}\"></body></html>"
    )
}

/// Mounts a working login exchange (login POST + profile GET).
pub async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/connection.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "Set-Cookie",
                    format!("PHPSESSID={SESSION_VALUE}; path=/").as_str(),
                )
                .set_body_string(login_shell_body()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/monprofil.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(profile_body(USER_ID)))
        .mount(server)
        .await;
}

/// ISBN search results page linking one book.
pub fn search_results_body(slug: &str, book_id: u64) -> String {
    format!(
        "<html><body><td><a href=\"/livres/{slug}/{book_id}\" class=\"titre1\">match</a></td></body></html>"
    )
}

/// Search results page with no book link.
pub fn empty_search_results_body() -> String {
    "<html><body>Aucun r\u{e9}sultat</body></html>".to_string()
}

/// Builder for canned book pages in the site's markup.
pub struct BookPage {
    pub title: String,
    pub isbn13: Option<String>,
    pub shelves: Vec<String>,
    pub review_id: Option<u64>,
    pub signed_in: bool,
}

impl Default for BookPage {
    fn default() -> Self {
        Self {
            title: "Le Petit Prince".to_string(),
            isbn13: Some("9782070612758".to_string()),
            shelves: Vec::new(),
            review_id: None,
            signed_in: true,
        }
    }
}

impl BookPage {
    pub fn html(&self) -> String {
        let mut page = String::from("<html><head></head><body>\n");
        if self.signed_in {
            page.push_str(markers::SIGNED_IN);
            page.push_str(">Fermer la session</a>\n");
        }
        page.push_str(&format!(
            "<h1><img src=\"c.jpg\" class=\"couv1\"/>\n{}</a> </h1>\n",
            self.title
        ));
        page.push_str("<div class=\"module_t4\">\n");
        if let Some(isbn) = &self.isbn13 {
            page.push_str(&format!("ISBN : {isbn}\n"));
        }
        page.push_str("\u{c9}diteur : Gallimard\n(2007)\n");
        page.push_str("</div>\n<table><tr><td>fiche</td></tr></table>\n");
        page.push_str("<div class=\"module_t1\">\n<h2 class=\"etiquettes\">\u{c9}tiquettes</h2>\n");
        for shelf in &self.shelves {
            page.push_str(&format!(
                "<a href=\"/mabibliotheque.php?etagere={shelf}\">{shelf}</a>\n"
            ));
        }
        if let Some(review_id) = self.review_id {
            page.push_str(&format!(
                "<input type=\"hidden\" id=\"hid_critique\" value=\"{review_id}\">\n"
            ));
        }
        page.push_str("</body></html>\n");
        page
    }
}

/// In-memory catalogue store recording every write for assertions.
#[derive(Default)]
pub struct MemoryCatalogue {
    pub books: Mutex<HashMap<i64, LocalBookView>>,
    pub remote_ids: Mutex<HashMap<i64, u64>>,
    pub sync_dates: Mutex<Vec<i64>>,
    pub events: Mutex<Vec<(i64, BookEventKind)>>,
}

impl MemoryCatalogue {
    pub fn with_book(book: LocalBookView) -> Arc<Self> {
        let store = Self::default();
        store.books.lock().unwrap().insert(book.id, book);
        Arc::new(store)
    }

    pub fn link(&self, book_id: i64, remote_id: u64) {
        self.remote_ids.lock().unwrap().insert(book_id, remote_id);
    }

    pub fn linked_remote_id(&self, book_id: i64) -> Option<u64> {
        self.remote_ids.lock().unwrap().get(&book_id).copied()
    }

    pub fn recorded_events(&self) -> Vec<(i64, BookEventKind)> {
        self.events.lock().unwrap().clone()
    }

    pub fn synced_books(&self) -> Vec<i64> {
        self.sync_dates.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogueStore for MemoryCatalogue {
    async fn book_for_export(&self, book_id: i64) -> Result<Option<LocalBookView>, StoreError> {
        Ok(self.books.lock().unwrap().get(&book_id).cloned())
    }

    async fn remote_book_id(&self, book_id: i64) -> Result<u64, StoreError> {
        Ok(self
            .remote_ids
            .lock()
            .unwrap()
            .get(&book_id)
            .copied()
            .unwrap_or(0))
    }

    async fn set_remote_book_id(&self, book_id: i64, remote_id: u64) -> Result<(), StoreError> {
        self.remote_ids.lock().unwrap().insert(book_id, remote_id);
        Ok(())
    }

    async fn set_sync_date(&self, book_id: i64) -> Result<(), StoreError> {
        self.sync_dates.lock().unwrap().push(book_id);
        Ok(())
    }

    async fn record_event(&self, book_id: i64, kind: BookEventKind) -> Result<(), StoreError> {
        self.events.lock().unwrap().push((book_id, kind));
        Ok(())
    }
}

/// A local book view with sensible defaults for export scenarios.
pub fn local_book(id: i64, isbn: &str) -> LocalBookView {
    LocalBookView {
        id,
        isbn: isbn.to_string(),
        read: false,
        read_end: None,
        rating: 4.0,
        shelves: Vec::new(),
    }
}

//! HTTP gateway: signed, rate-limited calls with response classification.
//!
//! Every remote interaction goes through [`HttpGateway::execute`]. The
//! gateway attaches the session cookie when the call needs one, waits for
//! its slot from the shared [`RequestScheduler`], and classifies the
//! response against a fixed table:
//!
//! | status | outcome |
//! |--------|---------|
//! | 200, 201, 302 | success — body handed to the caller |
//! | 401 | [`ApiError::Auth`] (session also invalidated) |
//! | 404 | [`ApiError::NotFound`] |
//! | transport failure | [`ApiError::Network`] |
//! | anything else | [`ApiError::UnexpectedStatus`] — fatal, never retried |
//!
//! Sessions also die silently: the site keeps answering 200 but renders the
//! signed-out shell. A successful signed response is therefore checked for
//! the logged-in marker; on a miss the gateway invalidates the session,
//! re-authenticates exactly once and replays the request once. The bound is
//! a straight-line code path, not a counter — a miscalibrated marker cannot
//! loop.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::COOKIE;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::error::ApiError;
use crate::scheduler::RequestScheduler;
use crate::session::SessionManager;
use crate::site::{self, markers};

/// Connection timeout for site calls.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for site calls. Pages are small; a minute is generous.
const READ_TIMEOUT_SECS: u64 = 60;

/// Builds the reqwest client shared by the gateway and the session manager.
///
/// Redirects are disabled: 302 is a modeled answer in the classification
/// table and the login contract requires observing it, not following it.
#[allow(clippy::expect_used)]
pub(crate) fn build_site_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .gzip(true)
        .user_agent(concat!("booksync/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client with static configuration")
}

/// A replayable site request. The gateway may send it twice (once before
/// and once after a re-login), so it is data, not a consumed builder.
#[derive(Debug, Clone)]
pub struct SiteRequest {
    url: String,
    form: Option<Vec<(String, String)>>,
}

impl SiteRequest {
    /// A GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            form: None,
        }
    }

    /// A POST request with a form-encoded body.
    #[must_use]
    pub fn post_form(url: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            url: url.into(),
            form: Some(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
        }
    }

    /// The target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Issues classified, cookie-bearing HTTP calls through the scheduler.
#[derive(Debug)]
pub struct HttpGateway {
    scheduler: Arc<RequestScheduler>,
    session: Arc<SessionManager>,
    client: Client,
}

impl HttpGateway {
    /// Creates a gateway sharing the global scheduler and session manager.
    #[must_use]
    pub fn new(scheduler: Arc<RequestScheduler>, session: Arc<SessionManager>) -> Self {
        Self {
            scheduler,
            session,
            client: build_site_client(),
        }
    }

    /// Sends the request and returns the classified response body.
    ///
    /// With `requires_session`, the cached session cookie is attached.
    /// No markup inspection happens here — use this for the endpoints that
    /// answer with bare data (shelf mutations, review update, search), and
    /// [`execute_page`](Self::execute_page) for full page fetches.
    ///
    /// # Errors
    ///
    /// Per the classification table in the module docs.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn execute(
        &self,
        request: &SiteRequest,
        requires_session: bool,
    ) -> Result<String, ApiError> {
        self.send_once(request, requires_session).await
    }

    /// Fetches a full page, verifying on signed requests that the site
    /// still considers the session logged in.
    ///
    /// The site keeps serving 200s to dead sessions, just with the
    /// signed-out shell; a signed fetch whose body lacks the logged-in
    /// marker therefore invalidates the session, re-authenticates exactly
    /// once, and replays the request once.
    ///
    /// # Errors
    ///
    /// Per the classification table; additionally [`ApiError::Auth`] when a
    /// signed fetch cannot be satisfied by a freshly re-established
    /// session.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn execute_page(
        &self,
        request: &SiteRequest,
        requires_session: bool,
    ) -> Result<String, ApiError> {
        let body = self.send_once(request, requires_session).await?;
        if !requires_session || body.contains(markers::SIGNED_IN) {
            return Ok(body);
        }

        // The site answered, but for a signed-out visitor. One re-login,
        // one replay, then give up.
        debug!("signed response lost the logged-in marker; re-authenticating");
        self.session.invalidate();
        if !self.session.ensure_valid().await {
            return Err(ApiError::Auth);
        }

        let body = self.send_once(request, true).await?;
        if body.contains(markers::SIGNED_IN) {
            Ok(body)
        } else {
            warn!("session valid but page still renders signed-out; giving up");
            Err(ApiError::Auth)
        }
    }

    /// One transmission: cookie attach, slot wait, send, classify, read.
    async fn send_once(
        &self,
        request: &SiteRequest,
        requires_session: bool,
    ) -> Result<String, ApiError> {
        let mut builder = match &request.form {
            Some(fields) => self.client.post(&request.url).form(fields),
            None => self.client.get(&request.url),
        };

        if requires_session {
            if let Some(cookie) = self.session.session_cookie() {
                builder = builder.header(COOKIE, format!("{}={cookie}", site::SESSION_COOKIE));
            }
        }

        self.scheduler.acquire_slot().await;
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::network(&request.url, e))?;

        let status = response.status().as_u16();
        if let Some(error) = ApiError::from_status(&request.url, status) {
            if matches!(error, ApiError::Auth) {
                self.session.invalidate();
            }
            return Err(error);
        }

        response
            .text()
            .await
            .map_err(|e| ApiError::network(&request.url, e))
    }
}

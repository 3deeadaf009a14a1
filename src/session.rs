//! Session lifecycle: credentials, login, and the session cookie.
//!
//! The site authenticates with a `PHPSESSID` cookie obtained by posting the
//! login form. [`SessionManager`] owns the credential pair and the session
//! triad (cookie, user id, validated flag) and is shared by every caller
//! that performs signed requests. Sessions die server-side without notice;
//! the gateway detects that and asks this manager to re-establish one.

use std::sync::{Arc, Mutex, PoisonError};
use std::{fmt, sync::LazyLock};

use regex::Regex;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use tracing::{debug, instrument, warn};

use crate::error::ApiError;
use crate::gateway::build_site_client;
use crate::scheduler::RequestScheduler;
use crate::site::{self, markers, SiteConfig};

/// Hidden field on the profile page carrying the numeric account id.
#[allow(clippy::expect_used)]
static USER_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<input type="hidden" id="hid_user" value="([0-9]+)">"#)
        .expect("user id regex is valid") // Static pattern, safe to panic
});

/// A login/password pair supplied by the user.
///
/// The password is redacted in Debug output to keep it out of logs.
#[derive(Clone)]
pub struct Credentials {
    login: String,
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Returns the account login.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the password. Sensitive — never log the return value.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Snapshot of the authenticated-session triad.
///
/// Invariant: `validated == true` implies the cookie is present and
/// `user_id != 0`.
#[derive(Clone, Default)]
pub struct Session {
    cookie: Option<String>,
    user_id: u64,
    validated: bool,
}

impl Session {
    /// Returns the session cookie value, when one is cached.
    ///
    /// Sensitive — never log the return value.
    #[must_use]
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Returns the authenticated user id (0 when unauthenticated).
    #[must_use]
    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Returns whether the session has been validated against the site.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.validated
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("cookie", &self.cookie.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("validated", &self.validated)
            .finish()
    }
}

/// Owns the credentials and the session state for one site account.
///
/// All reads and writes of the triad go through one mutex so no caller can
/// observe a torn session (validated flag set with a stale cookie).
/// Concurrent callers that both observe an invalid session may both log in;
/// the duplicate login is harmless and cheaper than deduplication.
pub struct SessionManager {
    site: SiteConfig,
    scheduler: Arc<RequestScheduler>,
    client: reqwest::Client,
    credentials: Mutex<Option<Credentials>>,
    state: Mutex<Session>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("site", &self.site)
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager for the given site, sharing the global scheduler.
    #[must_use]
    pub fn new(site: SiteConfig, scheduler: Arc<RequestScheduler>) -> Self {
        Self {
            site,
            scheduler,
            client: build_site_client(),
            credentials: Mutex::new(None),
            state: Mutex::new(Session::default()),
        }
    }

    /// Returns a copy of the current session triad.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.lock_state().clone()
    }

    /// Returns the cached session cookie, validated or not. Signed requests
    /// attach it opportunistically; the server decides whether it is still
    /// good.
    #[must_use]
    pub fn session_cookie(&self) -> Option<String> {
        self.lock_state().cookie.clone()
    }

    /// Returns the authenticated user id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Auth`] when no validated session exists.
    pub fn user_id(&self) -> Result<u64, ApiError> {
        let state = self.lock_state();
        if state.validated {
            Ok(state.user_id)
        } else {
            Err(ApiError::Auth)
        }
    }

    /// Marks the session invalid. Called on any 401 and on a signed page
    /// that lost the logged-in marker. The cookie is kept so a later
    /// request can still present it; only the validated flag drops.
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        if state.validated {
            debug!("session invalidated");
        }
        state.validated = false;
    }

    /// Clears the credentials and the whole session triad.
    pub fn forget_credentials(&self) {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *self.lock_state() = Session::default();
    }

    /// Logs in with the given credentials and remembers them for implicit
    /// re-authentication.
    ///
    /// The exchange: POST the login form with redirects disabled, reject on
    /// the bad-credentials marker, require the logged-in shell marker at
    /// the start of the body, scan `Set-Cookie` for the session cookie,
    /// then fetch the profile page with it and extract the numeric user id.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidCredentials`] when the site rejects the pair;
    /// [`ApiError::SessionEstablishment`] when the exchange succeeds but no
    /// usable session results; [`ApiError::Network`] on transport failure.
    /// Every failure leaves the state unauthenticated with `user_id == 0`.
    #[instrument(skip(self, credentials), fields(login = %credentials.login()))]
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError> {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());

        match self.login_exchange(credentials).await {
            Ok(session) => {
                debug!(user_id = session.user_id, "login succeeded");
                *self.lock_state() = session.clone();
                Ok(session)
            }
            Err(error) => {
                *self.lock_state() = Session::default();
                Err(error)
            }
        }
    }

    /// Returns true when a validated session exists, performing a login
    /// with the stored credentials when it does not. Never touches the
    /// network when the session is already validated.
    pub async fn ensure_valid(&self) -> bool {
        if self.lock_state().validated {
            return true;
        }
        let Some(credentials) = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            debug!("no stored credentials; cannot re-authenticate");
            return false;
        };
        match self.login(&credentials).await {
            Ok(_) => true,
            Err(error) => {
                warn!(%error, "re-authentication failed");
                false
            }
        }
    }

    /// Performs the two-request login exchange without touching the shared
    /// state; the caller commits or clears it.
    async fn login_exchange(&self, credentials: &Credentials) -> Result<Session, ApiError> {
        let login_url = self.site.login_url();
        let form = [
            (site::LOGIN_FIELD, credentials.login()),
            (site::PASSWORD_FIELD, credentials.password()),
        ];

        self.scheduler.acquire_slot().await;
        let response = self
            .client
            .post(&login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::network(&login_url, e))?;

        if let Some(error) = ApiError::from_status(&login_url, response.status().as_u16()) {
            return Err(error);
        }

        let cookie = session_cookie_from_headers(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(&login_url, e))?;

        if body.contains(markers::BAD_CREDENTIALS) {
            return Err(ApiError::InvalidCredentials);
        }
        if !body.starts_with(markers::LOGGED_IN_SHELL) {
            return Err(ApiError::session_establishment(
                "login response is not the signed-in shell",
            ));
        }
        let Some(cookie) = cookie else {
            return Err(ApiError::session_establishment(format!(
                "no {} cookie in login response",
                site::SESSION_COOKIE
            )));
        };

        let user_id = self.fetch_user_id(&cookie).await?;

        Ok(Session {
            cookie: Some(cookie),
            user_id,
            validated: true,
        })
    }

    /// Fetches the profile page with the fresh cookie and extracts the
    /// account id from its hidden field.
    async fn fetch_user_id(&self, cookie: &str) -> Result<u64, ApiError> {
        let profile_url = self.site.profile_url();

        self.scheduler.acquire_slot().await;
        let response = self
            .client
            .get(&profile_url)
            .header(COOKIE, format!("{}={cookie}", site::SESSION_COOKIE))
            .send()
            .await
            .map_err(|e| ApiError::network(&profile_url, e))?;

        if let Some(error) = ApiError::from_status(&profile_url, response.status().as_u16()) {
            return Err(error);
        }
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(&profile_url, e))?;

        USER_ID_PATTERN
            .captures(&body)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .filter(|&id| id != 0)
            .ok_or_else(|| {
                ApiError::session_establishment("profile page is missing the user id field")
            })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scans `Set-Cookie` response headers for the session cookie and returns
/// its value. Only the first `name=value` pair of each header matters; the
/// attributes after `;` are ignored.
pub(crate) fn session_cookie_from_headers(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(SET_COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        let pair = raw.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            if name.trim() == site::SESSION_COOKIE && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

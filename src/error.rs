//! Error types for the synchronization engine.
//!
//! Every remote interaction funnels into [`ApiError`], which classifies the
//! failure so callers can decide between re-authenticating, retrying and
//! giving up. The variants mirror the response classification table in
//! [`crate::gateway`].

use thiserror::Error;

/// Errors that can occur while talking to the remote site.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The site rejected the supplied login/password pair.
    #[error("the site rejected the supplied credentials")]
    InvalidCredentials,

    /// Login was accepted but a usable session could not be established
    /// (missing session cookie, missing user id marker, ...).
    #[error("session establishment failed: {reason}")]
    SessionEstablishment {
        /// What was missing or malformed in the login exchange.
        reason: String,
    },

    /// An established session was rejected mid-use (HTTP 401 or a signed
    /// page without the logged-in marker). Callers must treat this as
    /// "re-authentication required", never as "resource missing".
    #[error("session rejected by the site; re-authentication required")]
    Auth,

    /// The requested resource does not exist remotely (HTTP 404).
    #[error("resource not found at {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// Transport-level failure (DNS, connection reset, timeout, TLS).
    #[error("network error calling {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// A status code outside the modeled set. Indicates the site contract
    /// changed; never retried, surfaced to the operator instead.
    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus {
        /// The URL that answered.
        url: String,
        /// The unmodeled status code.
        status: u16,
    },

    /// A shelf or review mutation failed for a reason other than
    /// not-found/network (e.g. an add call whose response could not be
    /// interpreted).
    #[error("reconciliation failed: {detail}")]
    Reconciliation {
        /// Diagnostic detail for the operator.
        detail: String,
    },
}

impl ApiError {
    /// Creates a session-establishment error.
    pub fn session_establishment(reason: impl Into<String>) -> Self {
        Self::SessionEstablishment {
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Creates a network error from a transport failure.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an unexpected-status error.
    pub fn unexpected_status(url: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a reconciliation error.
    pub fn reconciliation(detail: impl Into<String>) -> Self {
        Self::Reconciliation {
            detail: detail.into(),
        }
    }

    /// Classifies an HTTP status code against the fixed response table.
    ///
    /// Returns `None` for the success statuses (200, 201, 302 — redirects
    /// are disabled, so 302 is an answer, not a hop), otherwise the error
    /// the status maps to.
    #[must_use]
    pub fn from_status(url: &str, status: u16) -> Option<Self> {
        match status {
            200 | 201 | 302 => None,
            401 => Some(Self::Auth),
            404 => Some(Self::not_found(url)),
            other => Some(Self::unexpected_status(url, other)),
        }
    }
}

// Note on From trait implementations:
// There is intentionally no `From<reqwest::Error>` — the Network variant
// requires the URL for context, which the source error does not carry.
// Callers use the `network()` constructor instead.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_success_codes_map_to_none() {
        assert!(ApiError::from_status("http://x", 200).is_none());
        assert!(ApiError::from_status("http://x", 201).is_none());
        assert!(ApiError::from_status("http://x", 302).is_none());
    }

    #[test]
    fn test_from_status_401_is_auth() {
        assert!(matches!(
            ApiError::from_status("http://x", 401),
            Some(ApiError::Auth)
        ));
    }

    #[test]
    fn test_from_status_404_is_not_found() {
        match ApiError::from_status("http://x/livre", 404) {
            Some(ApiError::NotFound { url }) => assert_eq!(url, "http://x/livre"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_from_status_anything_else_is_unexpected() {
        for status in [301, 400, 403, 429, 500, 503] {
            match ApiError::from_status("http://x", status) {
                Some(ApiError::UnexpectedStatus { status: s, .. }) => assert_eq!(s, status),
                other => panic!("status {status}: expected UnexpectedStatus, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_display_includes_context() {
        let err = ApiError::unexpected_status("http://example.com/p", 500);
        let msg = err.to_string();
        assert!(msg.contains("500"), "expected status in: {msg}");
        assert!(msg.contains("http://example.com/p"), "expected URL in: {msg}");

        let err = ApiError::session_establishment("no PHPSESSID cookie in response");
        assert!(err.to_string().contains("no PHPSESSID"));
    }
}

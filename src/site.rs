//! Remote site endpoints and markup markers.
//!
//! The site exposes no API; everything the engine knows about it — endpoint
//! paths, form field names and the HTML anchors the scraper keys on — lives
//! here so that a markup change on their side is a one-file fix on ours.
//! The markers are expected to break periodically; that brittleness is
//! inherent to scraping and deliberately not hidden.

/// Production origin of the remote site.
pub const DEFAULT_BASE_URL: &str = "http://www.babelio.com";

/// Name of the session cookie issued at login.
pub const SESSION_COOKIE: &str = "PHPSESSID";

/// Login form field carrying the account login.
pub const LOGIN_FIELD: &str = "Login";

/// Login form field carrying the password.
pub const PASSWORD_FIELD: &str = "Password";

/// Markup anchors scraped pages are matched against.
pub mod markers {
    /// Shown on the login page when the login/password pair is wrong.
    pub const BAD_CREDENTIALS: &str =
        r#"<span style="color:red;" >Identifiant ou mot de passe incorrect.</span>"#;

    /// A successful login answers with a page body that *starts* with this
    /// shell fragment.
    pub const LOGGED_IN_SHELL: &str = r#"<div id="footer_xl" style="clear:both;">"#;

    /// Present on every page rendered for a signed-in session (the
    /// sign-out link). Its absence on a signed request means the session
    /// died server-side.
    pub const SIGNED_IN: &str = r#"<a href="/?closeSession=1" class="lien_t1" rel="nofollow""#;
}

/// Addressing for one site deployment.
///
/// Production code uses [`SiteConfig::default`]; tests point `base_url` at
/// a mock server.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl SiteConfig {
    /// Creates a config for the given origin. A trailing `/` is stripped
    /// so path concatenation stays uniform.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    /// Returns the site origin without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Login endpoint (POST, form-encoded, redirects disabled).
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/connection.php", self.base_url)
    }

    /// Profile page carrying the hidden user-id field (GET, signed).
    #[must_use]
    pub fn profile_url(&self) -> String {
        format!("{}/monprofil.php", self.base_url)
    }

    /// ISBN search endpoint (GET). The result page links the matching book.
    #[must_use]
    pub fn isbn_lookup_url(&self, isbn: &str) -> String {
        format!(
            "{}/resrecherche.php?item_recherche=isbn&Recherche={}",
            self.base_url,
            isbn.trim()
        )
    }

    /// Book page by site id (GET).
    #[must_use]
    pub fn book_url(&self, book_id: u64) -> String {
        format!("{}/livres/%20/{book_id}", self.base_url)
    }

    /// Shelf-add endpoint (POST, signed). The response body is the bare
    /// review id, no markup.
    #[must_use]
    pub fn shelf_add_url(&self) -> String {
        format!("{}/ajout_etagere.php", self.base_url)
    }

    /// Shelf-remove endpoint (POST, signed).
    #[must_use]
    pub fn shelf_remove_url(&self) -> String {
        format!("{}/retrait_etagere.php", self.base_url)
    }

    /// Review-update endpoint (POST, signed).
    #[must_use]
    pub fn review_update_url(&self) -> String {
        format!("{}/critique_maj.php", self.base_url)
    }

    /// Resolves a possibly site-relative href (e.g. a cover image `/...`)
    /// against the origin. Absolute URLs pass through unchanged.
    #[must_use]
    pub fn resolve(&self, href: &str) -> String {
        match url::Url::parse(href) {
            Ok(absolute) => absolute.to_string(),
            Err(_) => format!("{}{}", self.base_url, href),
        }
    }
}

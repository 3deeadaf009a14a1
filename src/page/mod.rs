//! Field extraction from scraped book pages.
//!
//! The site serves HTML, not data, so a book "record" is whatever an
//! ordered list of pattern rules can recover from one page. Each rule is
//! independent and optional: a rule that does not match simply leaves its
//! field absent, and no rule can abort another. The only short-circuit is
//! the document shape check — a page without the main book block yields an
//! empty record.
//!
//! Absence of a field means "not found in this document", never "known
//! false".
//!
//! The patterns anchor on the site's current markup and will break when it
//! changes; when that happens, this module (and [`crate::site::markers`])
//! is the entire blast radius.

mod series;

pub use series::{split_series_suffix, SeriesDetails};

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, instrument, warn};

use crate::site::SiteConfig;
use crate::store::ThumbnailStore;

/// Main book block: everything the block-scoped rules search in. A page
/// without it is not a book page.
#[allow(clippy::expect_used)]
static BOOK_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)(<div class="module_t4".+)(<table>(.+)<div class="module_t1">[\t\r\n]+<h2 class="etiquettes")"#,
    )
    .expect("book block regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static ISBN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ISBN : ([0-9]+)").expect("isbn regex is valid") // Static pattern, safe to panic
});

/// Matches past the accented É so encoding variants cannot break it.
#[allow(clippy::expect_used)]
static PUBLISHER_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)diteur : (.*)([\r\n]+).([0-9]+)")
        .expect("publisher regex is valid") // Static pattern, safe to panic
});

/// The viewer's own rating ("Livres x/5" widget).
#[allow(clippy::expect_used)]
static RATING_MINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<li class="current-rating"(.+)>Livres ([0-9.]+)/5</li>"#)
        .expect("personal rating regex is valid") // Static pattern, safe to panic
});

/// Site-wide aggregate rating, used when the viewer has not rated.
#[allow(clippy::expect_used)]
static RATING_AGGREGATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"itemprop="ratingValue">([0-9.]+)</span>"#)
        .expect("aggregate rating regex is valid") // Static pattern, safe to panic
});

/// Reading-status badge; the optional third group flags a loan.
#[allow(clippy::expect_used)]
static READ_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"">(Lu|A lire|En cours|Pense-bête)(, A échanger)?( , Emprunté)?( )?</div></b>([\t\r\n]+)<span class="lien_t1""#,
    )
    .expect("read status regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static AUTHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<a class="libelle" href="/auteur/(.+)/([0-9]+)" itemprop="url" style="font-weight:normal;">([\t\r\n]+)<span itemprop="name">(.+)<b>(.+)</b></span>"#,
    )
    .expect("author regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)itemprop="description">(.+)<p class="footer""#)
        .expect("description regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<br\s*/*?>)").expect("line break regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="couv1"/>([\t\r\n]+)(.+)</a> </h1>"#)
        .expect("title regex is valid") // Static pattern, safe to panic
});

/// Hidden field present when the signed-in viewer owns a review.
#[allow(clippy::expect_used)]
static REVIEW_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<input type="hidden" id="hid_critique" value="([0-9]+)">"#)
        .expect("review id regex is valid") // Static pattern, safe to panic
});

/// Shelf chips linking the viewer's own shelves; hrefs carry the canonical
/// form.
#[allow(clippy::expect_used)]
static SHELF_CHIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="/mabibliotheque\.php\?etagere=([a-z0-9-]+)""#)
        .expect("shelf chip regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static COVER_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link rel="image_src" href="(.+)"/>"#)
        .expect("cover image regex is valid") // Static pattern, safe to panic
});

/// One author credit scraped from a book page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAuthor {
    /// Display name, in page order.
    pub name: String,
    /// The site's author id when the credit links to an author page.
    pub id: Option<u64>,
}

/// A book as far as one scraped page describes it.
///
/// Every field is partial: `None`/empty means the page did not yield it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteBookRecord {
    /// The site's book id; filled by the lookup that located the page, not
    /// by extraction.
    pub remote_id: Option<u64>,
    /// The viewer's review id, 0 when the page showed none.
    pub review_id: u64,
    /// ISBN-13 printed on the page; 10-digit ISBNs are ignored.
    pub isbn13: Option<String>,
    /// Title with any series suffix split off.
    pub title: Option<String>,
    /// Author credits in page order.
    pub authors: Vec<RemoteAuthor>,
    /// Series membership split out of the title.
    pub series: Option<SeriesDetails>,
    /// Publisher name.
    pub publisher: Option<String>,
    /// Publication year, kept textual as printed.
    pub published_year: Option<String>,
    /// Rating out of 5: the viewer's own when present, else the aggregate.
    pub rating: Option<f32>,
    /// `Some(true)` when the status badge says the viewer read the book.
    pub read: Option<bool>,
    /// `Some(true)` when the status badge flags the copy as loaned out.
    pub loaned: Option<bool>,
    /// Back-cover description with `<br>` markup normalized to newlines.
    pub description: Option<String>,
    /// The viewer's shelves holding this book, canonical site form.
    pub shelves: BTreeSet<String>,
    /// Local file reference of the fetched cover, when one was requested.
    pub thumbnail: Option<String>,
}

impl RemoteBookRecord {
    /// Whether extraction recovered nothing at all (document shape check
    /// failed or the page was blank of every marker).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Which text a rule searches: the main book block or the whole document.
#[derive(Debug, Clone, Copy)]
enum RuleScope {
    Block,
    Document,
}

/// One extraction rule: a pattern plus a setter. Rules run in table order;
/// a rule that fails to match (or whose captures fail to parse) leaves its
/// field alone and never disturbs the rules after it.
struct ExtractRule {
    name: &'static str,
    scope: RuleScope,
    pattern: &'static LazyLock<Regex>,
    /// Apply to every match instead of the first.
    each_match: bool,
    apply: fn(&Captures<'_>, &mut RemoteBookRecord),
}

static RULES: &[ExtractRule] = &[
    ExtractRule {
        name: "isbn13",
        scope: RuleScope::Block,
        pattern: &ISBN,
        each_match: false,
        apply: |caps, record| {
            // 13-digit matches only; the page sometimes prints the ISBN-10.
            let digits = &caps[1];
            if digits.len() == 13 {
                record.isbn13 = Some(digits.to_string());
            }
        },
    },
    ExtractRule {
        name: "publisher_year",
        scope: RuleScope::Block,
        pattern: &PUBLISHER_YEAR,
        each_match: false,
        apply: |caps, record| {
            record.publisher = Some(caps[1].trim().to_string());
            record.published_year = Some(caps[3].to_string());
        },
    },
    ExtractRule {
        name: "rating_mine",
        scope: RuleScope::Block,
        pattern: &RATING_MINE,
        each_match: false,
        apply: |caps, record| {
            // A personal rating of zero means "unrated"; leave the field
            // empty so the aggregate rule below can fill it.
            if let Ok(rating) = caps[2].parse::<f32>() {
                if rating > 0.0 {
                    record.rating = Some(rating);
                }
            }
        },
    },
    ExtractRule {
        name: "rating_aggregate",
        scope: RuleScope::Block,
        pattern: &RATING_AGGREGATE,
        each_match: false,
        apply: |caps, record| {
            if record.rating.is_none() {
                record.rating = caps[1].parse::<f32>().ok();
            }
        },
    },
    ExtractRule {
        name: "read_status",
        scope: RuleScope::Document,
        pattern: &READ_STATUS,
        each_match: false,
        apply: |caps, record| {
            if caps[1].contains("Lu") {
                record.read = Some(true);
            }
            if caps.get(3).is_some() {
                record.loaned = Some(true);
            }
        },
    },
    ExtractRule {
        name: "author",
        scope: RuleScope::Document,
        pattern: &AUTHOR,
        each_match: false,
        apply: |caps, record| {
            record.authors.push(RemoteAuthor {
                name: format!("{}{}", &caps[4], &caps[5]),
                id: caps[2].parse::<u64>().ok(),
            });
        },
    },
    ExtractRule {
        name: "description",
        scope: RuleScope::Document,
        pattern: &DESCRIPTION,
        each_match: false,
        apply: |caps, record| {
            record.description = Some(LINE_BREAKS.replace_all(&caps[1], "\n").into_owned());
        },
    },
    ExtractRule {
        name: "title",
        scope: RuleScope::Document,
        pattern: &TITLE,
        each_match: false,
        apply: |caps, record| {
            let raw = &caps[2];
            match split_series_suffix(raw) {
                Some((prefix, details)) => {
                    record.title = Some(prefix);
                    record.series = Some(details);
                }
                None => record.title = Some(raw.to_string()),
            }
        },
    },
    ExtractRule {
        name: "review_id",
        scope: RuleScope::Document,
        pattern: &REVIEW_ID,
        each_match: false,
        apply: |caps, record| {
            record.review_id = caps[1].parse::<u64>().unwrap_or(0);
        },
    },
    ExtractRule {
        name: "shelves",
        scope: RuleScope::Document,
        pattern: &SHELF_CHIP,
        each_match: true,
        apply: |caps, record| {
            record.shelves.insert(caps[1].to_string());
        },
    },
];

/// Extracts structured book records from scraped pages.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    site: SiteConfig,
}

impl PageExtractor {
    /// Creates an extractor resolving relative URLs against `site`.
    #[must_use]
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }

    /// Runs the rule table over one document.
    ///
    /// Never fails: missing fields are simply absent. The empty record is
    /// returned only when the document shape check does not match.
    #[must_use]
    #[instrument(skip_all)]
    pub fn extract(&self, html: &str) -> RemoteBookRecord {
        let mut record = RemoteBookRecord::default();

        let Some(shape) = BOOK_BLOCK.captures(html) else {
            debug!("document shape check failed; returning empty record");
            return record;
        };
        let block = shape.get(1).map_or("", |m| m.as_str());

        for rule in RULES {
            let haystack = match rule.scope {
                RuleScope::Block => block,
                RuleScope::Document => html,
            };
            if rule.each_match {
                for caps in rule.pattern.captures_iter(haystack) {
                    (rule.apply)(&caps, &mut record);
                }
            } else if let Some(caps) = rule.pattern.captures(haystack) {
                (rule.apply)(&caps, &mut record);
            } else {
                debug!(rule = rule.name, "no match");
            }
        }

        record
    }

    /// Extracts the record and additionally fetches the cover image through
    /// the external thumbnail store, recording the returned local
    /// reference. A failed fetch only leaves `thumbnail` absent.
    pub async fn extract_with_thumbnail(
        &self,
        html: &str,
        thumbnails: &dyn ThumbnailStore,
    ) -> RemoteBookRecord {
        let mut record = self.extract(html);
        if record.is_empty() {
            return record;
        }
        if let Some(image_url) = self.cover_image_url(html) {
            match thumbnails.save_from_url(&image_url).await {
                Ok(reference) => record.thumbnail = Some(reference),
                Err(error) => warn!(%error, url = %image_url, "cover image fetch failed"),
            }
        }
        record
    }

    /// Returns the absolute cover image URL, resolving site-relative hrefs
    /// against the origin.
    #[must_use]
    pub fn cover_image_url(&self, html: &str) -> Option<String> {
        COVER_IMAGE
            .captures(html)
            .map(|caps| self.site.resolve(&caps[1]))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A trimmed-down book page carrying every marker the rules anchor on.
    fn full_page() -> String {
        concat!(
            "<html><head>\n",
            "<link rel=\"image_src\" href=\"/couv/cvt_petit_prince.jpg\"/>\n",
            "</head><body>\n",
            "<a href=\"/?closeSession=1\" class=\"lien_t1\" rel=\"nofollow\">Fermer</a>\n",
            "<h1><img src=\"pp.jpg\" class=\"couv1\"/>\n",
            "Le Petit Prince (Collection Folio #3200)</a> </h1>\n",
            "<a class=\"libelle\" href=\"/auteur/Antoine-de-Saint-Exupery/2446\" itemprop=\"url\" style=\"font-weight:normal;\">\n",
            "<span itemprop=\"name\">Antoine de <b>Saint-Exup\u{e9}ry</b></span>\n",
            "<div class=\"statut_t1\">Lu , Emprunt\u{e9} </div></b>\n",
            "<span class=\"lien_t1\">statut</span>\n",
            "<div class=\"module_t4\">\n",
            "ISBN : 9782070612758\n",
            "\u{c9}diteur : Gallimard\n",
            "(2007)\n",
            "<li class=\"current-rating\" style=\"width:90%\">Livres 4.5/5</li>\n",
            "<span itemprop=\"ratingValue\">4.26</span>\n",
            "</div>\n",
            "<table><tr><td>fiche</td></tr></table>\n",
            "<div class=\"module_t1\">\n",
            "<h2 class=\"etiquettes\">\u{c9}tiquettes</h2>\n",
            "<a href=\"/mabibliotheque.php?etagere=science-fiction\">science-fiction</a>\n",
            "<a href=\"/mabibliotheque.php?etagere=to-read\">to-read</a>\n",
            "<input type=\"hidden\" id=\"hid_critique\" value=\"555123\">\n",
            "<div itemprop=\"description\">Premi\u{e8}re ligne.<br/>Seconde ligne.</div>\n",
            "<p class=\"footer\">pied</p>\n",
            "</body></html>\n",
        )
        .to_string()
    }

    fn extractor() -> PageExtractor {
        PageExtractor::new(SiteConfig::default())
    }

    #[test]
    fn test_extract_full_page() {
        let record = extractor().extract(&full_page());

        assert_eq!(record.isbn13.as_deref(), Some("9782070612758"));
        assert_eq!(record.publisher.as_deref(), Some("Gallimard"));
        assert_eq!(record.published_year.as_deref(), Some("2007"));
        assert_eq!(record.rating, Some(4.5));
        assert_eq!(record.read, Some(true));
        assert_eq!(record.loaned, Some(true));
        assert_eq!(record.title.as_deref(), Some("Le Petit Prince"));
        let series = record.series.unwrap();
        assert_eq!(series.name, "Collection Folio");
        assert_eq!(series.position.as_deref(), Some("3200"));
        assert_eq!(record.authors.len(), 1);
        assert_eq!(record.authors[0].name, "Antoine de Saint-Exup\u{e9}ry");
        assert_eq!(record.authors[0].id, Some(2446));
        assert_eq!(record.review_id, 555_123);
        assert!(record.shelves.contains("science-fiction"));
        assert!(record.shelves.contains("to-read"));
        assert_eq!(
            record.description.as_deref(),
            Some("Premi\u{e8}re ligne.\nSeconde ligne.</div>\n")
        );
    }

    #[test]
    fn test_shape_check_gates_everything() {
        // All field markers present but no book block: empty record.
        let page = full_page().replace("module_t4", "module_t9");
        let record = extractor().extract(&page);
        assert!(record.is_empty(), "expected empty record, got {record:?}");
    }

    #[test]
    fn test_rules_are_independent() {
        // Corrupting the ISBN marker must not disturb the other fields.
        let page = full_page().replace("ISBN :", "ISBN&nbsp;:");
        let record = extractor().extract(&page);
        assert!(record.isbn13.is_none());
        assert_eq!(record.publisher.as_deref(), Some("Gallimard"));
        assert_eq!(record.title.as_deref(), Some("Le Petit Prince"));
    }

    #[test]
    fn test_ten_digit_isbn_is_ignored() {
        let page = full_page().replace("9782070612758", "2070612759");
        let record = extractor().extract(&page);
        assert!(record.isbn13.is_none());
    }

    #[test]
    fn test_zero_personal_rating_falls_back_to_aggregate() {
        let page = full_page().replace("Livres 4.5/5", "Livres 0/5");
        let record = extractor().extract(&page);
        assert_eq!(record.rating, Some(4.26));
    }

    #[test]
    fn test_missing_personal_rating_falls_back_to_aggregate() {
        let page = full_page().replace("current-rating", "no-rating");
        let record = extractor().extract(&page);
        assert_eq!(record.rating, Some(4.26));
    }

    #[test]
    fn test_unread_status_leaves_read_absent() {
        let page = full_page().replace(">Lu , Emprunt\u{e9} </div>", ">A lire</div>");
        let record = extractor().extract(&page);
        assert!(record.read.is_none());
        assert!(record.loaned.is_none());
    }

    #[test]
    fn test_title_without_series_suffix() {
        let page = full_page().replace(" (Collection Folio #3200)", "");
        let record = extractor().extract(&page);
        assert_eq!(record.title.as_deref(), Some("Le Petit Prince"));
        assert!(record.series.is_none());
    }

    #[test]
    fn test_cover_image_url_resolved_against_origin() {
        let url = extractor().cover_image_url(&full_page());
        assert_eq!(
            url.as_deref(),
            Some("http://www.babelio.com/couv/cvt_petit_prince.jpg")
        );
    }

    #[test]
    fn test_cover_image_absent() {
        let page = full_page().replace("image_src", "image_alt");
        assert!(extractor().cover_image_url(&page).is_none());
    }

    #[tokio::test]
    async fn test_extract_with_thumbnail_records_local_reference() {
        struct FakeThumbs;

        #[async_trait::async_trait]
        impl ThumbnailStore for FakeThumbs {
            async fn save_from_url(
                &self,
                url: &str,
            ) -> Result<String, crate::store::StoreError> {
                assert!(url.ends_with("cvt_petit_prince.jpg"));
                Ok("covers/petit_prince.jpg".to_string())
            }
        }

        let record = extractor()
            .extract_with_thumbnail(&full_page(), &FakeThumbs)
            .await;
        assert_eq!(record.thumbnail.as_deref(), Some("covers/petit_prince.jpg"));
    }

    #[tokio::test]
    async fn test_thumbnail_failure_leaves_field_absent() {
        struct FailingThumbs;

        #[async_trait::async_trait]
        impl ThumbnailStore for FailingThumbs {
            async fn save_from_url(
                &self,
                _url: &str,
            ) -> Result<String, crate::store::StoreError> {
                Err(crate::store::StoreError::new("disk full"))
            }
        }

        let record = extractor()
            .extract_with_thumbnail(&full_page(), &FailingThumbs)
            .await;
        assert!(record.thumbnail.is_none());
        // Extraction itself is unaffected.
        assert_eq!(record.title.as_deref(), Some("Le Petit Prince"));
    }
}

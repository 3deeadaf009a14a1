//! Series-suffix recognition in book titles.
//!
//! The site renders series membership as a trailing parenthesized suffix on
//! the title, e.g. `Le Petit Prince (Collection Folio #3200)` or
//! `La Horde du Contrevent (Folio SF, tome 520)`. The extractor splits that
//! suffix off: the stored title keeps the prefix and the series goes into
//! its own record entry. Unparenthesized forms are left alone — a bare
//! parenthetical without a position is usually a subtitle, not a series.

use std::sync::LazyLock;

use regex::Regex;

/// `Title (Series #3)` / `Title (Series, tome 3)` / `Title (Series, n°3)`.
#[allow(clippy::expect_used)]
static MARKED_POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*\(\s*([^()]+?)\s*,?\s*(?:#|[Tt]ome\s+|n°\s*)([0-9]+(?:\.[0-9]+)?)\s*\)\s*$")
        .expect("marked series position regex is valid") // Static pattern, safe to panic
});

/// `Title (Series 3)` — position given as a bare trailing number.
#[allow(clippy::expect_used)]
static BARE_POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*\(\s*([^()]*[^()0-9\s])\s+([0-9]+(?:\.[0-9]+)?)\s*\)\s*$")
        .expect("bare series position regex is valid") // Static pattern, safe to panic
});

/// A series membership split out of a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDetails {
    /// Series name as printed in the suffix.
    pub name: String,
    /// Position within the series, kept textual (`"3"`, `"1.5"`).
    pub position: Option<String>,
}

/// Splits a recognized trailing series suffix off a title.
///
/// Returns the title prefix and the series details, or `None` when the
/// title carries no recognizable suffix.
#[must_use]
pub fn split_series_suffix(title: &str) -> Option<(String, SeriesDetails)> {
    for pattern in [&MARKED_POSITION, &BARE_POSITION] {
        if let Some(caps) = pattern.captures(title) {
            let name = caps[2].trim().to_string();
            if name.is_empty() {
                continue;
            }
            return Some((
                caps[1].trim_end().to_string(),
                SeriesDetails {
                    name,
                    position: Some(caps[3].to_string()),
                },
            ));
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_marked_position() {
        let (title, series) =
            split_series_suffix("Le Petit Prince (Collection Folio #3200)").unwrap();
        assert_eq!(title, "Le Petit Prince");
        assert_eq!(series.name, "Collection Folio");
        assert_eq!(series.position.as_deref(), Some("3200"));
    }

    #[test]
    fn test_tome_marked_position() {
        let (title, series) =
            split_series_suffix("La Horde du Contrevent (Folio SF, tome 520)").unwrap();
        assert_eq!(title, "La Horde du Contrevent");
        assert_eq!(series.name, "Folio SF");
        assert_eq!(series.position.as_deref(), Some("520"));
    }

    #[test]
    fn test_bare_trailing_number() {
        let (title, series) = split_series_suffix("Dune (Cycle de Dune 1)").unwrap();
        assert_eq!(title, "Dune");
        assert_eq!(series.name, "Cycle de Dune");
        assert_eq!(series.position.as_deref(), Some("1"));
    }

    #[test]
    fn test_fractional_position() {
        let (_, series) = split_series_suffix("Novella (Saga #1.5)").unwrap();
        assert_eq!(series.position.as_deref(), Some("1.5"));
    }

    #[test]
    fn test_subtitle_parenthetical_is_not_a_series() {
        assert!(split_series_suffix("Vingt mille lieues sous les mers (illustré)").is_none());
    }

    #[test]
    fn test_plain_title_passes_through() {
        assert!(split_series_suffix("L'Étranger").is_none());
        assert!(split_series_suffix("").is_none());
    }

    #[test]
    fn test_inner_parenthetical_not_at_end_is_kept() {
        assert!(split_series_suffix("Titre (tome 2) augmenté").is_none());
    }
}

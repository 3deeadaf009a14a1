//! Shelf naming: raw user names vs the site's canonical form.
//!
//! The site normalizes shelf names before comparing them; two raw names
//! denote the same shelf iff their canonical forms match. Canonicalization
//! must reproduce the site's rules exactly: lowercase, then every maximal
//! run of non-alphanumeric characters collapses to a single `-`. Leading
//! and trailing runs produce leading/trailing dashes — they are not
//! trimmed.

/// Canonical names of the site-managed status shelves. The site moves
/// books between these itself; removing a book from one through the shelf
/// endpoint corrupts its reading status, so the reconciler never does.
pub const PROTECTED_SHELVES: [&str; 3] = ["read", "to-read", "currently-reading"];

/// Raw name of the fallback shelf used solely to obtain a review id when a
/// book ends up on no other shelf.
pub const DEFAULT_SHELF: &str = "Default";

/// Converts a raw shelf name into the site's canonical form.
///
/// Idempotent: canonical output contains only lowercase alphanumerics and
/// single dashes, which map to themselves.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.to_lowercase().chars() {
        if c.is_alphanumeric() {
            canonical.push(c);
            in_run = false;
        } else if !in_run {
            canonical.push('-');
            in_run = true;
        }
    }
    canonical
}

/// Whether a canonical shelf name is one of the protected status shelves.
#[must_use]
pub fn is_protected(canonical: &str) -> bool {
    PROTECTED_SHELVES.contains(&canonical)
}

/// Raw name of the pseudo-shelf mirroring the local read flag.
///
/// The review-update call does not reliably move a book between the status
/// shelves, so the reconciler adds the matching one explicitly.
#[must_use]
pub fn pseudo_shelf(read: bool) -> &'static str {
    if read { "Read" } else { "To Read" }
}

//! Fuzzy identity between catalog entries and install records.
//!
//! Addon folders, catalog slugs and record slugs drift apart in practice
//! (`LibAddonMenu-2.0` on disk vs `libaddonmenu-2-0` in the catalog). The
//! rules here are deliberately lenient; a false positive only hides an
//! install suggestion, a false negative re-downloads a library.

use super::types::InstalledRecord;
use crate::catalog::CatalogEntry;

/// Lowercases and replaces dots with dashes.
#[must_use]
pub fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase().replace('.', "-")
}

/// Returns the normalized slug without a trailing version suffix.
///
/// `LibAddonMenu-2.0` and `libaddonmenu-2-0` both become `libaddonmenu`.
/// At least one segment is always kept.
#[must_use]
pub fn base_name(slug: &str) -> String {
    let normalized = normalize_slug(slug);
    let mut segments: Vec<&str> = normalized.split('-').collect();

    while segments.len() > 1 {
        let Some(last) = segments.last() else {
            break;
        };
        if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
            segments.pop();
        } else {
            break;
        }
    }

    segments.join("-")
}

/// Returns true if `record` is an install of `entry`.
///
/// Rules, first hit wins:
/// 1. exact slug
/// 2. record slug equals the entry's target folder
/// 3. normalized base names are equal
/// 4. case-insensitive display name
/// 5. substring either way between record slug and target folder base names
#[must_use]
pub fn matches(entry: &CatalogEntry, record: &InstalledRecord) -> bool {
    if record.slug == entry.slug {
        return true;
    }

    let folder = entry.install.target_folder.as_str();
    if !folder.is_empty() && record.slug == folder {
        return true;
    }

    let record_base = base_name(&record.slug);
    if !record_base.is_empty() && record_base == base_name(&entry.slug) {
        return true;
    }

    if !record.name.is_empty() && record.name.eq_ignore_ascii_case(&entry.name) {
        return true;
    }

    let folder_base = base_name(folder);
    !record_base.is_empty()
        && !folder_base.is_empty()
        && (record_base.contains(&folder_base) || folder_base.contains(&record_base))
}

/// Returns true if `record` is an install of a dependency known only by slug.
///
/// Applies the exact and base-name rules of [`matches`].
#[must_use]
pub fn matches_slug(slug: &str, record: &InstalledRecord) -> bool {
    if record.slug == slug {
        return true;
    }
    let base = base_name(slug);
    !base.is_empty() && base == base_name(&record.slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::entry;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn record(slug: &str) -> InstalledRecord {
        InstalledRecord::new(slug, slug, "1.0", PathBuf::from("/tmp/x.txt"))
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("LibAddonMenu-2.0"), "libaddonmenu");
        assert_eq!(base_name("libaddonmenu-2-0"), "libaddonmenu");
        assert_eq!(base_name("LibChatMessage"), "libchatmessage");
        assert_eq!(base_name("2-0"), "2");
        assert_eq!(base_name("lib-gps-3"), "lib-gps");
    }

    #[test]
    fn test_lam_matches_catalog_slug() {
        let mut e = entry("libaddonmenu-2-0", &[]);
        e.name = "LibAddonMenu".to_string();
        e.install.target_folder = "LibAddonMenu-2.0".to_string();
        assert!(matches(&e, &record("LibAddonMenu-2.0")));
    }

    #[test]
    fn test_lam_does_not_match_chat_message() {
        let mut e = entry("libchatmessage", &[]);
        e.name = "LibChatMessage".to_string();
        e.install.target_folder = "LibChatMessage".to_string();
        assert!(!matches(&e, &record("LibAddonMenu-2.0")));
    }

    #[test]
    fn test_display_name_rule() {
        let mut e = entry("some-slug", &[]);
        e.name = "Pretty Name".to_string();
        e.install.target_folder = "Folder".to_string();
        let mut r = record("unrelated");
        r.name = "pretty name".to_string();
        assert!(matches(&e, &r));
    }

    #[test]
    fn test_substring_rule() {
        let mut e = entry("harvest-map", &[]);
        e.install.target_folder = "HarvestMap".to_string();
        assert!(matches(&e, &record("harvestmap-data")));
    }

    #[test]
    fn test_matches_slug() {
        assert!(matches_slug("LibAddonMenu-2.0", &record("libaddonmenu-2-0")));
        assert!(matches_slug("libstub", &record("libstub")));
        assert!(!matches_slug("libstub", &record("libgps")));
    }

    proptest! {
        #[test]
        fn prop_base_name_idempotent(slug in "[A-Za-z][A-Za-z0-9.-]{0,20}") {
            let once = base_name(&slug);
            prop_assert_eq!(base_name(&once), once.clone());
        }

        #[test]
        fn prop_matches_own_slug(n in 0u32..10_000) {
            let slug = format!("p{}x", n);
            prop_assert!(matches(&entry(&slug, &[]), &record(&slug)));
            prop_assert!(matches_slug(&slug, &record(&slug)));
        }
    }
}

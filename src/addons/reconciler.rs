//! Update detection.

use serde::Serialize;

use super::types::{InstalledRecord, SourceKind};
use crate::catalog::Release;

/// An available update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateInfo {
    /// Record slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Installed version label.
    pub current_version: String,
    /// Available version label.
    pub new_version: String,
    /// Origin of the install.
    pub source_kind: SourceKind,
}

/// Decides whether `latest` supersedes what `installed` recorded.
///
/// Tiers, first applicable wins:
/// 1. both sides carry a sort key: strictly greater is newer
/// 2. both sides carry a commit sha: any difference is newer
/// 3. version labels differ, ignoring whitespace and a leading `v`
#[must_use]
pub fn needs_update(installed: &InstalledRecord, latest: &Release) -> bool {
    if let (Some(have), Some(want)) = (installed.version_sort_key, latest.version_sort_key) {
        return want > have;
    }

    if let (Some(have), Some(want)) = (&installed.commit_sha, &latest.commit_sha) {
        return have != want;
    }

    normalize_label(&installed.installed_version) != normalize_label(&latest.version)
}

fn normalize_label(label: &str) -> &str {
    let label = label.trim();
    label
        .strip_prefix('v')
        .or_else(|| label.strip_prefix('V'))
        .unwrap_or(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn installed(version: &str, sort_key: Option<i64>, sha: Option<&str>) -> InstalledRecord {
        InstalledRecord::new("a", "A", version, PathBuf::from("/a/A.txt"))
            .with_version_fields(sort_key, sha.map(String::from))
    }

    fn release(version: &str, sort_key: Option<i64>, sha: Option<&str>) -> Release {
        Release {
            version: version.to_string(),
            version_sort_key: sort_key,
            commit_sha: sha.map(String::from),
            ..Release::default()
        }
    }

    #[test]
    fn test_sort_key_tier() {
        let newer = installed("1.5.0", Some(1_005_000), None);
        let older = installed("1.4.9", Some(1_004_009), None);
        assert!(!needs_update(&newer, &release("1.4.9", Some(1_004_009), None)));
        assert!(needs_update(&older, &release("1.5.0", Some(1_005_000), None)));
        // Equal keys with different labels: no update
        assert!(!needs_update(&installed("a", Some(7), None), &release("b", Some(7), None)));
    }

    #[test]
    fn test_commit_tier() {
        let on_abc = installed("main", None, Some("abc"));
        assert!(needs_update(&on_abc, &release("main", None, Some("def"))));
        assert!(!needs_update(&on_abc, &release("y", None, Some("abc"))));
    }

    #[test]
    fn test_label_tier() {
        assert!(!needs_update(&installed("v1.2", None, None), &release(" 1.2 ", None, None)));
        assert!(needs_update(&installed("1.2", None, None), &release("1.3", None, None)));
        // Sort key on one side only falls through to labels
        assert!(!needs_update(&installed("2.0", Some(5), None), &release("2.0", None, None)));
    }
}

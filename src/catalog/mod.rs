//! Catalog snapshot for the community addon index.
//!
//! A [`CatalogSnapshot`] is an immutable view of the index at the moment it
//! was fetched. Entries are shared through `Arc` so resolver output can hold
//! on to them without copying.
//!
//! # Architecture
//!
//! - **wire**: versioned JSON shapes and their translation into the canonical types
//! - **client**: HTTP fetch with an on-disk ETag cache

mod client;
mod wire;

pub use client::{CatalogClient, CatalogError, DEFAULT_INDEX_URL};
pub use wire::{CURRENT_FORMAT_VERSION, parse_catalog};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::addons::matcher;

/// Kind of a download source, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSourceKind {
    /// CDN mirror (not rate limited).
    Cdn,
    /// GitHub source archive (zipball / refs archive).
    GithubArchive,
    /// GitHub release asset.
    GithubRelease,
    /// Any other direct URL.
    Direct,
    /// Single URL carried by older catalog snapshots.
    Legacy,
}

impl DownloadSourceKind {
    /// Parses a source kind from the catalog's free-form `type` field.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cdn" | "jsdelivr" | "mirror" => Self::Cdn,
            "github_archive" | "github" | "zipball" | "archive" => Self::GithubArchive,
            "github_release" | "release" | "asset" => Self::GithubRelease,
            "legacy" => Self::Legacy,
            _ => Self::Direct,
        }
    }

    /// Returns the short name used in logs and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cdn => "cdn",
            Self::GithubArchive => "github_archive",
            Self::GithubRelease => "github_release",
            Self::Direct => "direct",
            Self::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for DownloadSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate location for an addon archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSource {
    /// Source kind.
    pub kind: DownloadSourceKind,
    /// Absolute URL of the archive.
    pub url: String,
}

impl DownloadSource {
    /// Creates a new download source.
    #[must_use]
    pub fn new(kind: DownloadSourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

/// How an addon is extracted from its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    /// Archive of a tracked branch.
    Branch,
    /// Tagged release.
    #[default]
    Release,
    /// Arbitrary archive URL.
    Archive,
}

impl InstallMethod {
    /// Parses an install method, defaulting to `Release`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "branch" => Self::Branch,
            "archive" => Self::Archive,
            _ => Self::Release,
        }
    }
}

/// Where an addon's files come from inside its archive and where they go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDescriptor {
    /// Extraction method.
    pub method: InstallMethod,
    /// Subtree of the archive to extract (None = archive root).
    pub extract_path: Option<String>,
    /// Folder name under the addon root. Must be a single path segment.
    pub target_folder: String,
    /// Glob patterns of files and folders to skip.
    pub excludes: Vec<String>,
}

impl InstallDescriptor {
    /// Creates a descriptor that extracts the whole archive into `target_folder`.
    #[must_use]
    pub fn new(target_folder: impl Into<String>) -> Self {
        Self {
            method: InstallMethod::Release,
            extract_path: None,
            target_folder: target_folder.into(),
            excludes: Vec::new(),
        }
    }

    /// Sets the archive subtree to extract.
    #[must_use]
    pub fn with_extract_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.extract_path = if path.trim().is_empty() {
            None
        } else {
            Some(path)
        };
        self
    }

    /// Sets the exclusion patterns.
    #[must_use]
    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }
}

/// Repository an addon is published from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Hosting type (e.g. "github").
    pub kind: String,
    /// Repository in "owner/repo" format.
    pub repo: String,
    /// Tracked branch.
    pub branch: String,
    /// Optional path inside the repository.
    pub path: Option<String>,
}

impl SourceDescriptor {
    /// Returns the archive URL of the tracked branch, if hosted on GitHub.
    #[must_use]
    pub fn branch_archive_url(&self) -> Option<String> {
        if self.kind != "github" || self.repo.is_empty() || self.branch.is_empty() {
            return None;
        }
        Some(format!(
            "https://github.com/{}/archive/refs/heads/{}.zip",
            self.repo, self.branch
        ))
    }
}

/// Latest published release of a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Release {
    /// Version label as shown to users.
    pub version: String,
    /// Ordered download candidates (preferred first).
    pub sources: Vec<DownloadSource>,
    /// Single download URL from older snapshots.
    pub legacy_url: Option<String>,
    /// Publisher-computed ordering key.
    pub version_sort_key: Option<i64>,
    /// Commit of a branch-tracked release.
    pub commit_sha: Option<String>,
    /// SHA-256 of the archive, hex encoded.
    pub checksum: Option<String>,
    /// Archive size in bytes.
    pub file_size: Option<u64>,
    /// Publication timestamp.
    pub published_at: Option<String>,
}

impl Release {
    /// Returns the sources to try, in order.
    ///
    /// Falls back to the legacy single URL when no source list is present.
    #[must_use]
    pub fn candidate_sources(&self) -> Vec<DownloadSource> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }
        self.legacy_url
            .iter()
            .filter(|url| !url.is_empty())
            .map(|url| DownloadSource::new(DownloadSourceKind::Legacy, url.clone()))
            .collect()
    }
}

/// One addon as known to the community index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable catalog identifier.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Author names.
    pub authors: Vec<String>,
    /// Category name.
    pub category: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Where the addon is published.
    pub source: SourceDescriptor,
    /// How the addon is installed.
    pub install: InstallDescriptor,
    /// Slugs that must be installed first.
    pub required_dependencies: Vec<String>,
    /// Slugs that enhance the addon but are never installed automatically.
    pub optional_dependencies: Vec<String>,
    /// Latest release, if the addon publishes releases.
    pub latest_release: Option<Release>,
}

impl CatalogEntry {
    /// Returns the download candidates for the latest version.
    ///
    /// Branch-tracked addons without a release fall back to the branch archive.
    #[must_use]
    pub fn download_sources(&self) -> Vec<DownloadSource> {
        let sources = self
            .latest_release
            .as_ref()
            .map(Release::candidate_sources)
            .unwrap_or_default();
        if !sources.is_empty() {
            return sources;
        }
        self.source
            .branch_archive_url()
            .map(|url| vec![DownloadSource::new(DownloadSourceKind::GithubArchive, url)])
            .unwrap_or_default()
    }

    /// Returns the version label that an install of this entry records.
    #[must_use]
    pub fn version_label(&self) -> String {
        self.latest_release
            .as_ref()
            .map(|r| r.version.clone())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("{}-latest", self.source.branch))
    }
}

/// Immutable view of the catalog at a point in time.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entries: Vec<Arc<CatalogEntry>>,
    by_slug: HashMap<String, usize>,
    by_lower: HashMap<String, usize>,
    by_base: HashMap<String, usize>,
    fetched_at: Option<String>,
}

impl CatalogSnapshot {
    /// Builds a snapshot from entries. Earlier entries win on duplicate slugs.
    #[must_use]
    pub fn new(entries: Vec<CatalogEntry>, fetched_at: Option<String>) -> Self {
        let entries: Vec<Arc<CatalogEntry>> = entries.into_iter().map(Arc::new).collect();
        let mut by_slug = HashMap::with_capacity(entries.len());
        let mut by_lower = HashMap::with_capacity(entries.len());
        let mut by_base = HashMap::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            by_slug.entry(entry.slug.clone()).or_insert(i);
            by_lower.entry(entry.slug.to_lowercase()).or_insert(i);
            by_base.entry(matcher::base_name(&entry.slug)).or_insert(i);
        }

        Self {
            entries,
            by_slug,
            by_lower,
            by_base,
            fetched_at,
        }
    }

    /// Returns all entries in catalog order.
    #[must_use]
    pub fn entries(&self) -> &[Arc<CatalogEntry>] {
        &self.entries
    }

    /// Returns the fetch timestamp (RFC 3339), if known.
    #[must_use]
    pub fn fetched_at(&self) -> Option<&str> {
        self.fetched_at.as_deref()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry by its exact slug.
    #[must_use]
    pub fn get(&self, slug: &str) -> Option<&Arc<CatalogEntry>> {
        self.by_slug.get(slug).map(|&i| &self.entries[i])
    }

    /// Looks up an entry by slug, tolerating case and version-suffix differences.
    ///
    /// Order: exact, case-insensitive, normalized base name.
    #[must_use]
    pub fn lookup(&self, slug: &str) -> Option<&Arc<CatalogEntry>> {
        if let Some(entry) = self.get(slug) {
            return Some(entry);
        }
        if let Some(&i) = self.by_lower.get(&slug.to_lowercase()) {
            return Some(&self.entries[i]);
        }
        let base = matcher::base_name(slug);
        if base.is_empty() {
            return None;
        }
        self.by_base.get(&base).map(|&i| &self.entries[i])
    }

    /// Counts entries per category, sorted by category name.
    #[must_use]
    pub fn category_counts(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.category.as_str()).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        counts.sort();
        counts
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds a minimal entry with a release and the given required dependencies.
    pub fn entry(slug: &str, deps: &[&str]) -> CatalogEntry {
        CatalogEntry {
            slug: slug.to_string(),
            name: slug.to_string(),
            description: String::new(),
            authors: vec!["Author".to_string()],
            category: "library".to_string(),
            tags: Vec::new(),
            source: SourceDescriptor {
                kind: "github".to_string(),
                repo: format!("test/{}", slug),
                branch: "main".to_string(),
                path: None,
            },
            install: InstallDescriptor::new(slug),
            required_dependencies: deps.iter().map(|d| d.to_string()).collect(),
            optional_dependencies: Vec::new(),
            latest_release: Some(Release {
                version: "1.0.0".to_string(),
                legacy_url: Some(format!("https://example.com/{}.zip", slug)),
                ..Release::default()
            }),
        }
    }
}

//! Add-on type definitions.
//!
//! Installed-state records, tracked repositories and the error type shared by
//! the installation engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::storage::StoreError;
use crate::catalog::{CatalogError, DownloadSourceKind};

/// Where an installed addon came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Installed from the community catalog.
    #[default]
    Catalog,
    /// Installed from a custom-tracked GitHub repository.
    Github,
    /// Discovered on disk without an install record.
    Local,
}

impl SourceKind {
    /// Returns the serialized name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Github => "github",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An installed addon as persisted by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    /// Identifier (catalog slug, repo name or folder name).
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Installed version label.
    pub installed_version: String,
    /// Origin of the install.
    #[serde(default)]
    pub source_kind: SourceKind,
    /// Repository in "owner/repo" format, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<String>,
    /// Ordering key of the installed release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_sort_key: Option<i64>,
    /// Commit of the installed branch snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// First install time (RFC 3339).
    pub installed_at: String,
    /// Last update time (RFC 3339).
    pub updated_at: String,
    /// Path to the addon's manifest file.
    pub manifest_path: PathBuf,
}

impl InstalledRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(slug: &str, name: &str, version: &str, manifest_path: PathBuf) -> Self {
        assert!(!slug.is_empty(), "Slug must not be empty");

        let now = chrono::Utc::now().to_rfc3339();
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            installed_version: version.to_string(),
            source_kind: SourceKind::Catalog,
            source_repo: None,
            version_sort_key: None,
            commit_sha: None,
            installed_at: now.clone(),
            updated_at: now,
            manifest_path,
        }
    }

    /// Sets the source kind.
    #[must_use]
    pub fn with_source(mut self, kind: SourceKind, repo: Option<String>) -> Self {
        self.source_kind = kind;
        self.source_repo = repo;
        self
    }

    /// Sets the machine-comparable version fields.
    #[must_use]
    pub fn with_version_fields(
        mut self,
        sort_key: Option<i64>,
        commit_sha: Option<String>,
    ) -> Self {
        self.version_sort_key = sort_key;
        self.commit_sha = commit_sha;
        self
    }

    /// Returns the folder the addon is installed in.
    #[must_use]
    pub fn install_folder(&self) -> Option<&std::path::Path> {
        self.manifest_path.parent()
    }
}

/// How a custom repository publishes installable snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    /// Tagged GitHub releases.
    #[default]
    Release,
    /// Head of a branch.
    Branch,
}

impl ReleaseType {
    /// Parses a release type, defaulting to `Release`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("branch") {
            Self::Branch
        } else {
            Self::Release
        }
    }
}

/// A GitHub repository tracked outside the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRepo {
    /// Repository in "owner/repo" format.
    pub repo: String,
    /// Branch used for branch installs.
    pub branch: String,
    /// Release tracking mode.
    #[serde(default)]
    pub release_type: ReleaseType,
    /// Time the repository was added (RFC 3339).
    pub added_at: String,
}

impl CustomRepo {
    /// Creates a tracked repository entry.
    #[must_use]
    pub fn new(repo: &str, branch: &str, release_type: ReleaseType) -> Self {
        assert!(repo.contains('/'), "Repository must be in owner/repo format");

        Self {
            repo: repo.to_string(),
            branch: branch.to_string(),
            release_type,
            added_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Returns the repository name without the owner.
    #[must_use]
    pub fn name(&self) -> &str {
        self.repo.rsplit('/').next().unwrap_or(&self.repo)
    }
}

/// One failed download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Kind of the source that failed.
    pub kind: DownloadSourceKind,
    /// URL that was tried.
    pub url: String,
    /// Human-readable reason.
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.url, self.reason)
    }
}

fn join_attempts(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return String::from("no download sources");
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Add-on engine errors.
#[derive(Debug, Error)]
pub enum AddonError {
    /// Root slug absent from the catalog.
    #[error("Add-on '{0}' not found in catalog")]
    CatalogEntryNotFound(String),

    /// Every download candidate failed.
    #[error("All download sources failed: {}", join_attempts(.attempts))]
    AllSourcesExhausted {
        /// Per-attempt failures in the order they were tried.
        attempts: Vec<AttemptFailure>,
    },

    /// An archive entry would escape the target folder.
    #[error("Unsafe archive entry: {0}")]
    UnsafeArchiveEntry(String),

    /// Addon root directory is missing.
    #[error("Add-on directory unavailable: {}", .0.display())]
    TargetDirectoryUnavailable(PathBuf),

    /// No addon root was configured or detected.
    #[error("No add-on directory configured; set addon_directory in the config file")]
    AddonRootNotConfigured,

    /// Record store failure.
    #[error("Record store error: {0}")]
    RecordStore(#[from] StoreError),

    /// Target folder or extract path is not a safe single segment.
    #[error("Invalid target folder: '{0}'")]
    InvalidTargetFolder(String),

    /// Bytes are not a readable zip archive.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// The requested extract path matched nothing in the archive.
    #[error("Extract path '{0}' not found in archive")]
    ExtractPathNotFound(String),

    /// Extracted tree has no addon manifest.
    #[error("No addon manifest found in '{0}'")]
    NoManifest(String),

    /// Manifest exists but could not be read.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Files to remove are already gone.
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Slug has no install record.
    #[error("Add-on '{0}' is not installed")]
    NotInstalled(String),

    /// Repository reference is malformed or does not exist.
    #[error("Invalid repository: '{0}'")]
    InvalidRepository(String),

    /// Repository publishes no releases.
    #[error("No releases found for {0}")]
    NoRelease(String),

    /// Another install of the same slug is running.
    #[error("Install of '{0}' already in progress")]
    InstallInProgress(String),

    /// Operation cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// Transport failure outside of source fallback.
    #[error("Network error: {0}")]
    Network(String),

    /// Catalog could not be fetched.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Local I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for AddonError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

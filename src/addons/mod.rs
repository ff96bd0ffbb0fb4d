//! Add-on installation engine.
//!
//! Resolves a catalog entry's dependency graph, downloads each package with
//! source fallback, extracts it safely into the game's addon directory and
//! keeps the install records that later drive update checks.
//!
//! # Architecture
//!
//! - **resolver**: Dependency walk, classification and install order
//! - **matcher**: Slug normalization and installed-record matching
//! - **downloader**: Ordered source fallback with per-attempt timeout
//! - **installer**: Zip validation, staging and atomic swap into place
//! - **manifest** / **scanner**: Addon manifest parsing and disk discovery
//! - **reconciler**: Installed-versus-latest comparison
//! - **storage**: Install records in `~/.addonctl/installed.toml`
//! - **github**: Installs straight from GitHub repositories
//! - **manager**: Coordinator that commits records
//!
//! # Usage
//!
//! ```ignore
//! use addonctl::addons::{AddonManager, CancelToken, EventSink, TomlRecordStore};
//!
//! let store = TomlRecordStore::open(path)?;
//! let manager = AddonManager::new(Box::new(store), Some(addon_root), timeout);
//! manager.refresh_catalog(&client, false).await?;
//! let report = manager
//!     .install_with_dependencies("combat-metrics", &EventSink::none(), &CancelToken::new())
//!     .await?;
//! ```

mod downloader;
mod events;
mod github;
mod installer;
mod manager;
mod manifest;
pub mod matcher;
mod reconciler;
mod resolver;
mod scanner;
mod storage;
mod types;

pub use downloader::{
    ArchiveFetcher, DEFAULT_ATTEMPT_TIMEOUT, DownloadOrchestrator, FetchError, HttpFetcher,
    MAX_ARCHIVE_SIZE, verify_checksum,
};
pub use events::{
    CancelToken, DownloadEvent, DownloadProgress, EventSink, InstallEvent, InstallStatus,
};
pub use github::{GitHubClient, GitHubRelease, RepoRef, parse_repo_ref};
pub use installer::{clean_staging, detect_target_folder, install_archive, remove_installed};
pub use manager::{
    AddonManager, InstallRequest, OutcomeStatus, PackageOutcome, PlanReport,
};
pub use manifest::{AddonManifest, find_manifest, parse_manifest, parse_manifest_str};
pub use reconciler::{UpdateInfo, needs_update};
pub use resolver::{Classification, DependencyResult, PlanNode, resolve};
pub use scanner::{DiscoveredAddon, MissingDependency, missing_dependencies, scan_addon_directory};
pub use storage::{MemoryRecordStore, RecordStore, StoreError, TomlRecordStore};
pub use types::{
    AddonError, AttemptFailure, CustomRepo, InstalledRecord, ReleaseType, SourceKind,
};

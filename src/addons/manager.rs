//! Install coordinator.
//!
//! [`AddonManager`] owns the record store, the current catalog snapshot and
//! the download orchestrator, and is the only place that commits install
//! records. Resolution reads an immutable snapshot; downloads and extraction
//! never touch the store.
//!
//! # Locking
//!
//! The store mutex is taken for a single store call and released before any
//! await. A per-slug in-flight set rejects a second concurrent install or
//! uninstall of the same package.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::downloader::{ArchiveFetcher, DownloadOrchestrator, HttpFetcher};
use super::events::{CancelToken, DownloadEvent, EventSink, InstallStatus};
use super::github::{GitHubClient, parse_repo_ref};
use super::installer;
use super::matcher;
use super::reconciler::{UpdateInfo, needs_update};
use super::resolver::{self, DependencyResult};
use super::scanner::{self, DiscoveredAddon};
use super::storage::{RecordStore, StoreError};
use super::types::{AddonError, CustomRepo, InstalledRecord, ReleaseType, SourceKind};
use crate::catalog::{
    CatalogClient, CatalogEntry, CatalogSnapshot, DownloadSource, DownloadSourceKind,
    InstallDescriptor, InstallMethod, Release,
};

/// Everything needed to install one package.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Record slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Version label to record.
    pub version: String,
    /// Extraction rules.
    pub descriptor: InstallDescriptor,
    /// Ordered download candidates.
    pub sources: Vec<DownloadSource>,
    /// Expected SHA-256 of the archive.
    pub checksum: Option<String>,
    /// Origin recorded on success.
    pub source_kind: SourceKind,
    /// Repository recorded on success.
    pub source_repo: Option<String>,
    /// Ordering key recorded on success.
    pub version_sort_key: Option<i64>,
    /// Commit recorded on success.
    pub commit_sha: Option<String>,
    /// Derive the target folder from the archive layout when possible.
    pub detect_folder: bool,
}

impl InstallRequest {
    /// Creates a bare request for `slug`.
    #[must_use]
    pub fn new(slug: &str, descriptor: InstallDescriptor, sources: Vec<DownloadSource>) -> Self {
        assert!(!slug.is_empty(), "Slug must not be empty");

        Self {
            slug: slug.to_string(),
            name: slug.to_string(),
            version: String::from("unknown"),
            descriptor,
            sources,
            checksum: None,
            source_kind: SourceKind::Catalog,
            source_repo: None,
            version_sort_key: None,
            commit_sha: None,
            detect_folder: false,
        }
    }

    /// Builds a request for the latest release of a catalog entry.
    #[must_use]
    pub fn from_entry(entry: &CatalogEntry) -> Self {
        let release = entry.latest_release.as_ref();
        Self {
            slug: entry.slug.clone(),
            name: entry.name.clone(),
            version: entry.version_label(),
            descriptor: entry.install.clone(),
            sources: entry.download_sources(),
            checksum: release.and_then(|r| r.checksum.clone()),
            source_kind: SourceKind::Catalog,
            source_repo: Some(entry.source.repo.clone()).filter(|r| !r.is_empty()),
            version_sort_key: release.and_then(|r| r.version_sort_key),
            commit_sha: release.and_then(|r| r.commit_sha.clone()),
            detect_folder: false,
        }
    }
}

/// Outcome of one package within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Installed and recorded.
    Installed {
        /// Version label recorded.
        version: String,
    },
    /// Install failed; the package can be retried on its own.
    Failed {
        /// Failure reason.
        reason: String,
    },
    /// Not attempted.
    Skipped {
        /// Why the package was skipped.
        reason: String,
    },
}

/// Per-package plan outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageOutcome {
    /// Package slug.
    pub slug: String,
    /// Outcome.
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Result of installing a package with its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    /// Root slug.
    pub root: String,
    /// Outcomes in install order, root last.
    pub outcomes: Vec<PackageOutcome>,
    /// Dependencies satisfied by existing installs.
    pub already_installed: Vec<String>,
    /// Dependencies that could not be found.
    pub unresolved: Vec<String>,
    /// Optional dependencies that were not installed.
    pub optional: Vec<String>,
    /// Cycles cut during resolution.
    pub cycles_broken: Vec<String>,
}

impl PlanReport {
    /// Returns true if every package in the plan was installed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, OutcomeStatus::Installed { .. }))
    }

    /// Returns the slugs that failed.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
            .map(|o| o.slug.as_str())
            .collect()
    }
}

/// Removes a slug from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, slug: &str) -> Result<Self, AddonError> {
        let key = slug.to_lowercase();
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !inserted {
            return Err(AddonError::InstallInProgress(slug.to_string()));
        }
        Ok(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Coordinates resolution, download, extraction and record keeping.
pub struct AddonManager<F: ArchiveFetcher = HttpFetcher> {
    store: Mutex<Box<dyn RecordStore>>,
    downloader: DownloadOrchestrator<F>,
    github: GitHubClient,
    catalog: RwLock<Arc<CatalogSnapshot>>,
    addon_root: Option<PathBuf>,
    in_flight: Mutex<HashSet<String>>,
}

impl AddonManager<HttpFetcher> {
    /// Creates a manager downloading over HTTP.
    #[must_use]
    pub fn new(
        store: Box<dyn RecordStore>,
        addon_root: Option<PathBuf>,
        attempt_timeout: Duration,
    ) -> Self {
        Self::with_downloader(
            store,
            addon_root,
            DownloadOrchestrator::new(HttpFetcher::new(), attempt_timeout),
        )
    }
}

impl<F: ArchiveFetcher> AddonManager<F> {
    /// Creates a manager with a custom download orchestrator.
    #[must_use]
    pub fn with_downloader(
        store: Box<dyn RecordStore>,
        addon_root: Option<PathBuf>,
        downloader: DownloadOrchestrator<F>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            downloader,
            github: GitHubClient::new(),
            catalog: RwLock::new(Arc::new(CatalogSnapshot::default())),
            addon_root,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Replaces the GitHub client.
    #[must_use]
    pub fn with_github(mut self, github: GitHubClient) -> Self {
        self.github = github;
        self
    }

    /// Returns the addon root directory, if configured.
    #[must_use]
    pub fn addon_root(&self) -> Option<&Path> {
        self.addon_root.as_deref()
    }

    /// Returns the current catalog snapshot.
    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the catalog snapshot.
    pub fn set_catalog(&self, snapshot: CatalogSnapshot) {
        info!("[MANAGER] Catalog snapshot with {} entries", snapshot.len());
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Fetches the catalog through `client` and makes it current.
    pub async fn refresh_catalog(
        &self,
        client: &CatalogClient,
        force_refresh: bool,
    ) -> Result<usize, AddonError> {
        let snapshot = client.fetch_catalog(force_refresh).await?;
        let count = snapshot.len();
        self.set_catalog(snapshot);
        Ok(count)
    }

    /// Runs `f` with the record store locked.
    fn with_store<R>(
        &self,
        f: impl FnOnce(&mut dyn RecordStore) -> Result<R, StoreError>,
    ) -> Result<R, AddonError> {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(store.as_mut())?)
    }

    /// Returns every install record.
    pub fn installed(&self) -> Result<Vec<InstalledRecord>, AddonError> {
        self.with_store(|s| s.get_all())
    }

    fn require_root(&self) -> Result<PathBuf, AddonError> {
        match &self.addon_root {
            Some(root) if root.is_dir() => Ok(root.clone()),
            Some(root) => Err(AddonError::TargetDirectoryUnavailable(root.clone())),
            None => Err(AddonError::AddonRootNotConfigured),
        }
    }

    // ========================================================================
    // Resolution and install
    // ========================================================================

    /// Resolves the dependency plan of `root_slug` against the current state.
    pub fn resolve_dependencies(&self, root_slug: &str) -> Result<DependencyResult, AddonError> {
        let snapshot = self.catalog();
        let installed = self.installed()?;
        resolver::resolve(root_slug, &snapshot, &installed)
    }

    /// Downloads, extracts and records one package.
    ///
    /// Emits `Downloading`, `SourceFailed`, `Extracting` and finally either
    /// `Complete` or `Failed` on `events`.
    pub async fn install_package(
        &self,
        request: InstallRequest,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<InstalledRecord, AddonError> {
        let slug = request.slug.clone();
        let result = self.install_inner(request, events, cancel).await;
        match &result {
            Ok(record) => {
                info!(
                    "[MANAGER] Installed '{}' {}",
                    record.slug, record.installed_version
                );
                events.emit(&slug, InstallStatus::Complete);
            }
            Err(e) => {
                warn!("[MANAGER] Install of '{}' failed: {}", slug, e);
                events.emit(&slug, InstallStatus::Failed(e.to_string()));
            }
        }
        result
    }

    async fn install_inner(
        &self,
        request: InstallRequest,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<InstalledRecord, AddonError> {
        let root = self.require_root()?;
        let _guard = InFlightGuard::acquire(&self.in_flight, &request.slug)?;
        let slug = request.slug.as_str();

        events.emit(
            slug,
            InstallStatus::Downloading(super::events::DownloadProgress::Indeterminate {
                received: 0,
            }),
        );

        let bytes = self
            .downloader
            .download(
                &request.sources,
                request.checksum.as_deref(),
                cancel,
                |event| match event {
                    DownloadEvent::AttemptStarted { .. } => {}
                    DownloadEvent::Progress(progress) => {
                        events.emit(slug, InstallStatus::Downloading(progress));
                    }
                    DownloadEvent::SourceFailed { kind, reason, .. } => {
                        events.emit(slug, InstallStatus::SourceFailed { kind, reason });
                    }
                },
            )
            .await?;

        if cancel.is_cancelled() {
            return Err(AddonError::Cancelled);
        }

        events.emit(slug, InstallStatus::Extracting);

        let mut descriptor = request.descriptor.clone();
        let detect = request.detect_folder;
        let extract_root = root.clone();
        let manifest_path = tokio::task::spawn_blocking(move || {
            if detect {
                if let Some(folder) = installer::detect_target_folder(&bytes)? {
                    debug!("[MANAGER] Detected addon folder '{}'", folder);
                    descriptor.target_folder = folder;
                }
            }
            installer::install_archive(&bytes, &descriptor, &extract_root)
        })
        .await
        .map_err(|e| AddonError::Io(std::io::Error::other(e.to_string())))??;

        let now = Utc::now().to_rfc3339();
        let fresh = InstalledRecord {
            slug: request.slug.clone(),
            name: request.name.clone(),
            installed_version: request.version.clone(),
            source_kind: request.source_kind,
            source_repo: request.source_repo.clone(),
            version_sort_key: request.version_sort_key,
            commit_sha: request.commit_sha.clone(),
            installed_at: now.clone(),
            updated_at: now,
            manifest_path,
        };

        // One record per folder: records under other slugs for the same
        // folder (a local import, an earlier GitHub install) are replaced
        self.with_store(move |s| {
            let mut record = fresh;
            let previous: Vec<InstalledRecord> = s
                .get_all()?
                .into_iter()
                .filter(|r| r.slug == record.slug || same_folder(r, &record))
                .collect();

            if let Some(first) = previous
                .iter()
                .find(|r| r.slug == record.slug)
                .or_else(|| previous.first())
            {
                record.installed_at.clone_from(&first.installed_at);
            }
            for stale in previous.iter().filter(|r| r.slug != record.slug) {
                debug!(
                    "[MANAGER] Record '{}' replaced by '{}'",
                    stale.slug, record.slug
                );
                s.delete(&stale.slug)?;
            }

            s.upsert(record.clone())?;
            Ok(record)
        })
    }

    /// Installs `slug` after every dependency it needs.
    ///
    /// A failed dependency does not stop the plan. After cancellation the
    /// remaining packages are reported as skipped; completed installs stay.
    pub async fn install_with_dependencies(
        &self,
        slug: &str,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<PlanReport, AddonError> {
        let plan = self.resolve_dependencies(slug)?;

        let mut report = PlanReport {
            root: plan.root.slug.clone(),
            already_installed: plan.already_installed.iter().map(|n| n.slug.clone()).collect(),
            unresolved: plan.unresolved.iter().map(|n| n.slug.clone()).collect(),
            optional: plan.optional.clone(),
            cycles_broken: plan.cycles_broken.clone(),
            ..PlanReport::default()
        };

        for node in &plan.unresolved {
            warn!("[MANAGER] Dependency '{}' of '{}' not found", node.slug, report.root);
        }

        let packages: Vec<Arc<CatalogEntry>> = plan
            .resolved
            .iter()
            .filter_map(|n| n.entry.clone())
            .chain(std::iter::once(Arc::clone(&plan.root)))
            .collect();

        info!(
            "[MANAGER] Installing '{}' with {} dependencies",
            report.root,
            packages.len() - 1
        );

        for entry in packages {
            if cancel.is_cancelled() {
                report.outcomes.push(PackageOutcome {
                    slug: entry.slug.clone(),
                    status: OutcomeStatus::Skipped {
                        reason: "cancelled".to_string(),
                    },
                });
                continue;
            }

            let status = match self
                .install_package(InstallRequest::from_entry(&entry), events, cancel)
                .await
            {
                Ok(record) => OutcomeStatus::Installed {
                    version: record.installed_version,
                },
                Err(AddonError::Cancelled) => OutcomeStatus::Skipped {
                    reason: "cancelled".to_string(),
                },
                Err(e) => OutcomeStatus::Failed {
                    reason: e.to_string(),
                },
            };
            report.outcomes.push(PackageOutcome {
                slug: entry.slug.clone(),
                status,
            });
        }

        Ok(report)
    }

    /// Removes an installed package and its record.
    ///
    /// Files that are already gone are treated as removed.
    pub fn uninstall_package(&self, slug: &str) -> Result<InstalledRecord, AddonError> {
        let record = self
            .with_store(|s| s.get_by_slug(slug))?
            .ok_or_else(|| AddonError::NotInstalled(slug.to_string()))?;
        let _guard = InFlightGuard::acquire(&self.in_flight, &record.slug)?;

        match installer::remove_installed(&record.manifest_path) {
            Ok(()) => {}
            Err(AddonError::NotFound(path)) => {
                warn!(
                    "[MANAGER] Files of '{}' already gone ({}), dropping record",
                    slug,
                    path.display()
                );
            }
            Err(e) => return Err(e),
        }

        let removed_slug = record.slug.clone();
        self.with_store(move |s| s.delete(&removed_slug))?;
        info!("[MANAGER] Uninstalled '{}'", record.slug);
        Ok(record)
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Lists catalog-installed packages with a newer catalog release.
    pub fn check_for_updates(&self) -> Result<Vec<UpdateInfo>, AddonError> {
        let snapshot = self.catalog();
        let records = self.installed()?;

        let updates: Vec<UpdateInfo> = records
            .iter()
            .filter(|r| r.source_kind == SourceKind::Catalog)
            .filter_map(|record| {
                let entry = snapshot.lookup(&record.slug)?;
                let release = entry.latest_release.as_ref()?;
                needs_update(record, release).then(|| UpdateInfo {
                    slug: record.slug.clone(),
                    name: record.name.clone(),
                    current_version: record.installed_version.clone(),
                    new_version: release.version.clone(),
                    source_kind: SourceKind::Catalog,
                })
            })
            .collect();

        info!("[MANAGER] {} updates available", updates.len());
        Ok(updates)
    }

    /// Lists GitHub-installed packages whose repository has moved on.
    ///
    /// Repositories that cannot be queried are skipped with a warning.
    pub async fn check_github_updates(&self) -> Result<Vec<UpdateInfo>, AddonError> {
        let records = self.installed()?;
        let repos = self.with_store(|s| s.custom_repos())?;
        let mut updates = Vec::new();

        for record in records.iter().filter(|r| r.source_kind == SourceKind::Github) {
            let Some(repo) = record.source_repo.as_deref() else {
                continue;
            };
            let tracked = repos.iter().find(|r| r.repo == repo);
            let release_type = tracked.map(|r| r.release_type).unwrap_or_default();

            let latest = match release_type {
                ReleaseType::Release => self.github.latest_release(repo).await.map(|r| {
                    r.map(|release| Release {
                        version: release.tag_name,
                        ..Release::default()
                    })
                }),
                ReleaseType::Branch => {
                    let branch = tracked.map_or("main", |r| r.branch.as_str());
                    self.github.branch_head(repo, branch).await.map(|sha| {
                        sha.map(|sha| Release {
                            version: branch_version(branch, &sha),
                            commit_sha: Some(sha),
                            ..Release::default()
                        })
                    })
                }
            };

            match latest {
                Ok(Some(release)) if needs_update(record, &release) => updates.push(UpdateInfo {
                    slug: record.slug.clone(),
                    name: record.name.clone(),
                    current_version: record.installed_version.clone(),
                    new_version: release.version,
                    source_kind: SourceKind::Github,
                }),
                Ok(_) => {}
                Err(e) => warn!("[MANAGER] Update check for {} failed: {}", repo, e),
            }
        }

        Ok(updates)
    }

    /// Reinstalls `slug` from wherever it came from.
    pub async fn update_package(
        &self,
        slug: &str,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<InstalledRecord, AddonError> {
        let record = self
            .with_store(|s| s.get_by_slug(slug))?
            .ok_or_else(|| AddonError::NotInstalled(slug.to_string()))?;

        match record.source_kind {
            SourceKind::Github => {
                let repo = record
                    .source_repo
                    .clone()
                    .ok_or_else(|| AddonError::InvalidRepository(record.slug.clone()))?;
                let tracked = self
                    .with_store(|s| s.custom_repos())?
                    .into_iter()
                    .find(|r| r.repo == repo);
                let (branch, release_type) = tracked
                    .map(|r| (Some(r.branch), r.release_type))
                    .unwrap_or((None, ReleaseType::Release));
                self.install_from_github(&repo, branch.as_deref(), release_type, events, cancel)
                    .await
            }
            SourceKind::Catalog | SourceKind::Local => {
                let snapshot = self.catalog();
                let entry = snapshot
                    .lookup(&record.slug)
                    .or_else(|| {
                        snapshot
                            .entries()
                            .iter()
                            .find(|e| matcher::matches(e, &record))
                    })
                    .cloned()
                    .ok_or_else(|| AddonError::CatalogEntryNotFound(record.slug.clone()))?;

                let mut request = InstallRequest::from_entry(&entry);
                request.slug = record.slug.clone();
                self.install_package(request, events, cancel).await
            }
        }
    }

    /// Updates every package `check_for_updates` reports.
    pub async fn update_all(
        &self,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Vec<PackageOutcome>, AddonError> {
        let updates = self.check_for_updates()?;
        let mut outcomes = Vec::with_capacity(updates.len());

        for update in updates {
            let status = if cancel.is_cancelled() {
                OutcomeStatus::Skipped {
                    reason: "cancelled".to_string(),
                }
            } else {
                match self.update_package(&update.slug, events, cancel).await {
                    Ok(record) => OutcomeStatus::Installed {
                        version: record.installed_version,
                    },
                    Err(AddonError::Cancelled) => OutcomeStatus::Skipped {
                        reason: "cancelled".to_string(),
                    },
                    Err(e) => OutcomeStatus::Failed {
                        reason: e.to_string(),
                    },
                }
            };
            outcomes.push(PackageOutcome {
                slug: update.slug,
                status,
            });
        }

        Ok(outcomes)
    }

    // ========================================================================
    // Local discovery
    // ========================================================================

    /// Lists the addon folders under the root with their parsed manifests.
    pub fn local_addons(&self) -> Result<Vec<DiscoveredAddon>, AddonError> {
        let root = self.require_root()?;
        scanner::scan_addon_directory(&root)
    }

    /// Records addons found on disk that have no install record yet.
    ///
    /// The lowercased folder name becomes the slug. Returns the new records.
    pub fn sync_local_addons(&self) -> Result<Vec<InstalledRecord>, AddonError> {
        let root = self.require_root()?;
        installer::clean_staging(&root);

        let discovered = scanner::scan_addon_directory(&root)?;
        let records = self.installed()?;

        let tracked_paths: HashSet<&Path> =
            records.iter().map(|r| r.manifest_path.as_path()).collect();
        let tracked_folders: HashSet<String> = records
            .iter()
            .filter_map(|r| r.install_folder())
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_lowercase())
            .collect();

        let mut imported = Vec::new();
        for addon in discovered {
            let folder_key = addon.folder.to_lowercase();
            if tracked_paths.contains(addon.manifest_path.as_path())
                || tracked_folders.contains(&folder_key)
                || records.iter().any(|r| r.slug == folder_key)
            {
                continue;
            }

            let title = addon.manifest.display_title();
            let name = if title.is_empty() {
                addon.folder.clone()
            } else {
                title
            };
            let version = addon
                .manifest
                .version
                .clone()
                .unwrap_or_else(|| "unknown".to_string());

            let record = InstalledRecord::new(&folder_key, &name, &version, addon.manifest_path)
                .with_source(SourceKind::Local, None);
            debug!("[MANAGER] Importing local addon '{}'", record.slug);

            let committed = record.clone();
            self.with_store(move |s| s.upsert(committed))?;
            imported.push(record);
        }

        info!("[MANAGER] Imported {} local addons", imported.len());
        Ok(imported)
    }

    // ========================================================================
    // Custom repositories
    // ========================================================================

    /// Starts tracking a GitHub repository.
    ///
    /// Release-tracked repositories must have at least one release.
    pub async fn add_custom_repo(
        &self,
        repo: &str,
        branch: Option<&str>,
        release_type: ReleaseType,
    ) -> Result<CustomRepo, AddonError> {
        let parsed =
            parse_repo_ref(repo).ok_or_else(|| AddonError::InvalidRepository(repo.to_string()))?;
        let full = parsed.full_name();

        let default_branch = self
            .github
            .default_branch(&full)
            .await?
            .ok_or_else(|| AddonError::InvalidRepository(full.clone()))?;

        if release_type == ReleaseType::Release
            && self.github.latest_release(&full).await?.is_none()
        {
            return Err(AddonError::NoRelease(full));
        }

        let branch = branch
            .map(String::from)
            .or(parsed.branch)
            .unwrap_or(default_branch);
        let tracked = CustomRepo::new(&full, &branch, release_type);
        let committed = tracked.clone();
        self.with_store(move |s| s.upsert_custom_repo(committed))?;
        info!("[MANAGER] Tracking {} ({:?})", full, release_type);
        Ok(tracked)
    }

    /// Stops tracking a repository. Returns true if it was tracked.
    pub fn remove_custom_repo(&self, repo: &str) -> Result<bool, AddonError> {
        self.with_store(|s| s.delete_custom_repo(repo))
    }

    /// Lists tracked repositories.
    pub fn list_custom_repos(&self) -> Result<Vec<CustomRepo>, AddonError> {
        self.with_store(|s| s.custom_repos())
    }

    /// Installs an addon straight from a GitHub repository.
    ///
    /// The addon folder is taken from the archive layout, falling back to the
    /// repository name. The repository is tracked for later update checks.
    pub async fn install_from_github(
        &self,
        repo: &str,
        branch: Option<&str>,
        release_type: ReleaseType,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<InstalledRecord, AddonError> {
        let parsed =
            parse_repo_ref(repo).ok_or_else(|| AddonError::InvalidRepository(repo.to_string()))?;
        let full = parsed.full_name();
        let slug = parsed.name.to_lowercase().replace(' ', "-");

        let release_type = if parsed.branch.is_some() {
            ReleaseType::Branch
        } else {
            release_type
        };

        let (version, sources, commit_sha, branch_used) = match release_type {
            ReleaseType::Release => {
                let release = match &parsed.tag {
                    Some(tag) => self.github.release_by_tag(&full, tag).await?,
                    None => self.github.latest_release(&full).await?,
                }
                .ok_or_else(|| AddonError::NoRelease(full.clone()))?;
                (release.tag_name.clone(), release.download_sources(), None, None)
            }
            ReleaseType::Branch => {
                let branch = match branch.map(String::from).or(parsed.branch.clone()) {
                    Some(b) => b,
                    None => self
                        .github
                        .default_branch(&full)
                        .await?
                        .ok_or_else(|| AddonError::InvalidRepository(full.clone()))?,
                };
                let sha = self.github.branch_head(&full, &branch).await?;
                let version = sha
                    .as_deref()
                    .map_or_else(|| format!("{}-latest", branch), |s| branch_version(&branch, s));
                let url = self.github.branch_archive_url(&full, &branch);
                (
                    version,
                    vec![DownloadSource::new(DownloadSourceKind::GithubArchive, url)],
                    sha,
                    Some(branch),
                )
            }
        };

        let descriptor = InstallDescriptor {
            method: match release_type {
                ReleaseType::Release => InstallMethod::Release,
                ReleaseType::Branch => InstallMethod::Branch,
            },
            ..InstallDescriptor::new(parsed.name.clone())
        };

        let mut request = InstallRequest::new(&slug, descriptor, sources);
        request.name = parsed.name.clone();
        request.version = version;
        request.source_kind = SourceKind::Github;
        request.source_repo = Some(full.clone());
        request.commit_sha = commit_sha;
        request.detect_folder = true;

        let record = self.install_package(request, events, cancel).await?;

        let already_tracked = self
            .with_store(|s| s.custom_repos())?
            .iter()
            .any(|r| r.repo == full);
        if !already_tracked {
            let tracked = CustomRepo::new(
                &full,
                branch_used.as_deref().unwrap_or("main"),
                release_type,
            );
            self.with_store(move |s| s.upsert_custom_repo(tracked))?;
        }

        Ok(record)
    }
}

/// Returns true if both records point into the same addon folder.
///
/// Folder names compare case-insensitively, as on the game's platforms.
fn same_folder(a: &InstalledRecord, b: &InstalledRecord) -> bool {
    match (a.install_folder(), b.install_folder()) {
        (Some(x), Some(y)) => {
            x == y
                || (x.parent() == y.parent()
                    && x.file_name()
                        .zip(y.file_name())
                        .is_some_and(|(p, q)| {
                            p.to_string_lossy().eq_ignore_ascii_case(&q.to_string_lossy())
                        }))
        }
        _ => false,
    }
}

/// Version label of a branch snapshot, e.g. `main-abc1234`.
fn branch_version(branch: &str, sha: &str) -> String {
    let short: String = sha.chars().take(7).collect();
    format!("{}-{}", branch, short)
}

//! Persistent install records.
//!
//! Records and tracked repositories are kept in `~/.addonctl/installed.toml`:
//!
//! ```toml
//! [[addon]]
//! slug = "libaddonmenu-2-0"
//! name = "LibAddonMenu-2.0"
//! installed_version = "2.0r34"
//! source_kind = "catalog"
//! installed_at = "2024-01-01T00:00:00+00:00"
//! updated_at = "2024-01-01T00:00:00+00:00"
//! manifest_path = "/home/me/Documents/Elder Scrolls Online/live/AddOns/LibAddonMenu-2.0/LibAddonMenu-2.0.txt"
//!
//! [[custom_repo]]
//! repo = "owner/MyAddon"
//! branch = "main"
//! release_type = "release"
//! added_at = "2024-01-01T00:00:00+00:00"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::types::{CustomRepo, InstalledRecord};

/// Maximum file size for the record file (2MB).
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TOML parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// File too large.
    #[error("File too large (max {MAX_FILE_SIZE} bytes)")]
    FileTooLarge,
}

/// Storage of install records and tracked repositories.
///
/// Implementations are synchronous; callers serialize access behind a mutex.
pub trait RecordStore: Send {
    /// Returns every install record, sorted by slug.
    fn get_all(&self) -> Result<Vec<InstalledRecord>, StoreError>;

    /// Returns the record for `slug`.
    fn get_by_slug(&self, slug: &str) -> Result<Option<InstalledRecord>, StoreError>;

    /// Inserts or replaces the record with the same slug.
    fn upsert(&mut self, record: InstalledRecord) -> Result<(), StoreError>;

    /// Removes the record for `slug`. Returns true if one existed.
    fn delete(&mut self, slug: &str) -> Result<bool, StoreError>;

    /// Returns every tracked repository.
    fn custom_repos(&self) -> Result<Vec<CustomRepo>, StoreError>;

    /// Inserts or replaces a tracked repository.
    fn upsert_custom_repo(&mut self, repo: CustomRepo) -> Result<(), StoreError>;

    /// Stops tracking `repo`. Returns true if it was tracked.
    fn delete_custom_repo(&mut self, repo: &str) -> Result<bool, StoreError>;
}

/// In-memory state shared by both store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default, rename = "addon")]
    addons: Vec<InstalledRecord>,
    #[serde(default, rename = "custom_repo")]
    custom_repos: Vec<CustomRepo>,
}

impl StoreData {
    fn records(&self) -> Vec<InstalledRecord> {
        let mut records = self.addons.clone();
        records.sort_by(|a, b| a.slug.cmp(&b.slug));
        records
    }

    fn find(&self, slug: &str) -> Option<InstalledRecord> {
        self.addons.iter().find(|r| r.slug == slug).cloned()
    }

    fn upsert(&mut self, record: InstalledRecord) {
        match self.addons.iter_mut().find(|r| r.slug == record.slug) {
            Some(existing) => *existing = record,
            None => self.addons.push(record),
        }
    }

    fn delete(&mut self, slug: &str) -> bool {
        let before = self.addons.len();
        self.addons.retain(|r| r.slug != slug);
        self.addons.len() != before
    }

    fn upsert_repo(&mut self, repo: CustomRepo) {
        match self.custom_repos.iter_mut().find(|r| r.repo == repo.repo) {
            Some(existing) => *existing = repo,
            None => self.custom_repos.push(repo),
        }
    }

    fn delete_repo(&mut self, repo: &str) -> bool {
        let before = self.custom_repos.len();
        self.custom_repos.retain(|r| r.repo != repo);
        self.custom_repos.len() != before
    }
}

/// TOML file backed record store.
///
/// The file is read once on open and rewritten on every mutation.
#[derive(Debug)]
pub struct TomlRecordStore {
    /// Path to the storage file.
    path: PathBuf,
    data: StoreData,
}

impl TomlRecordStore {
    /// Opens the store at `path`, creating an empty one if absent.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        assert!(!path.as_os_str().is_empty(), "path must not be empty");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if !path.exists() {
            debug!("[STORE] No record file at {}, starting empty", path.display());
            return Ok(Self {
                path,
                data: StoreData::default(),
            });
        }

        let metadata = fs::metadata(&path)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge);
        }

        let content = fs::read_to_string(&path)?;
        let data: StoreData = toml::from_str(&content)?;
        debug!(
            "[STORE] Loaded {} records, {} custom repos",
            data.addons.len(),
            data.custom_repos.len()
        );

        Ok(Self { path, data })
    }

    /// Returns the store file path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Writes `next` to disk and only then makes it the current state.
    fn commit(&mut self, next: StoreData) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(&next)?;
        if content.len() as u64 > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge);
        }

        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        self.data = next;
        Ok(())
    }
}

impl RecordStore for TomlRecordStore {
    fn get_all(&self) -> Result<Vec<InstalledRecord>, StoreError> {
        Ok(self.data.records())
    }

    fn get_by_slug(&self, slug: &str) -> Result<Option<InstalledRecord>, StoreError> {
        Ok(self.data.find(slug))
    }

    fn upsert(&mut self, record: InstalledRecord) -> Result<(), StoreError> {
        let mut next = self.data.clone();
        next.upsert(record);
        self.commit(next)
    }

    fn delete(&mut self, slug: &str) -> Result<bool, StoreError> {
        let mut next = self.data.clone();
        if !next.delete(slug) {
            return Ok(false);
        }
        self.commit(next)?;
        Ok(true)
    }

    fn custom_repos(&self) -> Result<Vec<CustomRepo>, StoreError> {
        Ok(self.data.custom_repos.clone())
    }

    fn upsert_custom_repo(&mut self, repo: CustomRepo) -> Result<(), StoreError> {
        let mut next = self.data.clone();
        next.upsert_repo(repo);
        self.commit(next)
    }

    fn delete_custom_repo(&mut self, repo: &str) -> Result<bool, StoreError> {
        let mut next = self.data.clone();
        if !next.delete_repo(repo) {
            return Ok(false);
        }
        self.commit(next)?;
        Ok(true)
    }
}

/// Volatile record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    data: StoreData,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_records(records: Vec<InstalledRecord>) -> Self {
        let mut by_slug: BTreeMap<String, InstalledRecord> = BTreeMap::new();
        for record in records {
            by_slug.insert(record.slug.clone(), record);
        }
        Self {
            data: StoreData {
                addons: by_slug.into_values().collect(),
                custom_repos: Vec::new(),
            },
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_all(&self) -> Result<Vec<InstalledRecord>, StoreError> {
        Ok(self.data.records())
    }

    fn get_by_slug(&self, slug: &str) -> Result<Option<InstalledRecord>, StoreError> {
        Ok(self.data.find(slug))
    }

    fn upsert(&mut self, record: InstalledRecord) -> Result<(), StoreError> {
        self.data.upsert(record);
        Ok(())
    }

    fn delete(&mut self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.data.delete(slug))
    }

    fn custom_repos(&self) -> Result<Vec<CustomRepo>, StoreError> {
        Ok(self.data.custom_repos.clone())
    }

    fn upsert_custom_repo(&mut self, repo: CustomRepo) -> Result<(), StoreError> {
        self.data.upsert_repo(repo);
        Ok(())
    }

    fn delete_custom_repo(&mut self, repo: &str) -> Result<bool, StoreError> {
        Ok(self.data.delete_repo(repo))
    }
}

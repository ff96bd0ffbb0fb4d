//! Archive extraction into the addon root.
//!
//! Extraction happens in two passes. The first pass reads every entry name
//! and rejects the archive if any of them could escape the target folder, so
//! nothing is written for a hostile archive. The second pass writes the kept
//! entries into a hidden staging directory under the addon root; the staged
//! tree then replaces the previous install by rename.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use tracing::{debug, info, warn};

use super::manifest::{find_manifest, find_manifest_named};
use super::types::AddonError;
use crate::catalog::InstallDescriptor;

/// Prefix of staging directories under the addon root.
pub const STAGING_PREFIX: &str = ".addonctl-staging-";

/// Prefix of a previous install parked while it is being replaced.
const PARKED_PREFIX: &str = ".addonctl-old-";

/// Upper bound on the total uncompressed size of an archive (1GB).
const MAX_EXTRACTED_SIZE: u64 = 1024 * 1024 * 1024;

/// Mode bits marking a symlink entry.
const SYMLINK_MODE: u32 = 0o120_000;
const FILE_TYPE_MASK: u32 = 0o170_000;

/// One archive entry that survived path filtering.
#[derive(Debug)]
struct PlannedEntry {
    index: usize,
    relative: Vec<String>,
    is_dir: bool,
    mode: Option<u32>,
}

/// Extracts `bytes` into `target_root/<target_folder>` and returns the manifest path.
///
/// A single shared top-level folder is stripped first (the GitHub archive
/// layout). When `extract_path` is set only that subtree is kept.
pub fn install_archive(
    bytes: &[u8],
    descriptor: &InstallDescriptor,
    target_root: &Path,
) -> Result<PathBuf, AddonError> {
    if !target_root.is_dir() {
        return Err(AddonError::TargetDirectoryUnavailable(
            target_root.to_path_buf(),
        ));
    }

    let folder = descriptor.target_folder.trim();
    if !is_safe_segment(folder) {
        return Err(AddonError::InvalidTargetFolder(
            descriptor.target_folder.clone(),
        ));
    }

    let extract_prefix = match descriptor.extract_path.as_deref() {
        Some(path) => Some(split_extract_path(path)?),
        None => None,
    }
    .filter(|p| !p.is_empty());

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AddonError::InvalidArchive(e.to_string()))?;

    let planned = plan_entries(&mut archive, extract_prefix.as_deref(), &descriptor.excludes)?;
    info!(
        "[INSTALL] Extracting {} of {} entries into '{}'",
        planned.len(),
        archive.len(),
        folder
    );

    let staging = target_root.join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
    fs::create_dir_all(&staging)?;

    if let Err(e) = write_entries(&mut archive, &planned, &staging) {
        remove_quietly(&staging);
        return Err(e);
    }

    let Some((addon_dir, manifest_name)) = locate_addon(&staging, folder) else {
        remove_quietly(&staging);
        return Err(AddonError::NoManifest(folder.to_string()));
    };

    let destination = target_root.join(folder);
    let swapped = swap_into_place(&addon_dir, &destination, target_root);
    if addon_dir != staging {
        remove_quietly(&staging);
    }
    swapped?;

    let manifest_path = destination.join(manifest_name);
    info!("[INSTALL] Installed '{}' ({})", folder, manifest_path.display());
    Ok(manifest_path)
}

/// Guesses the addon folder name from the archive layout.
///
/// Used for repositories that carry no install descriptor. Looks for a
/// `<Name>/<Name>.txt` (or `.addon`) pair after stripping a shared root,
/// then for a root-level manifest whose stem names the folder.
pub fn detect_target_folder(bytes: &[u8]) -> Result<Option<String>, AddonError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AddonError::InvalidArchive(e.to_string()))?;
    let entries = plan_entries(&mut archive, None, &[])?;

    let is_manifest_name = |file: &str, stem: &str| {
        file.strip_prefix(stem).is_some_and(|ext| {
            ext.eq_ignore_ascii_case(".txt") || ext.eq_ignore_ascii_case(".addon")
        })
    };

    let mut nested: Vec<&str> = entries
        .iter()
        .filter(|e| !e.is_dir && e.relative.len() == 2)
        .filter(|e| is_manifest_name(&e.relative[1], &e.relative[0]))
        .map(|e| e.relative[0].as_str())
        .filter(|name| !is_example_dir(Path::new(name)))
        .collect();
    nested.sort_unstable();
    if let Some(name) = nested.first() {
        return Ok(Some((*name).to_string()));
    }

    let mut root_level: Vec<(usize, String)> = entries
        .iter()
        .filter(|e| !e.is_dir && e.relative.len() == 1)
        .filter_map(|e| {
            let file = &e.relative[0];
            let (stem, ext) = file.rsplit_once('.')?;
            (ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("addon"))
                .then(|| (e.index, stem.to_string()))
        })
        .collect();
    root_level.sort_by(|a, b| a.1.cmp(&b.1));

    for (index, stem) in root_level {
        let mut file = archive
            .by_index(index)
            .map_err(|e| AddonError::InvalidArchive(e.to_string()))?;
        let mut content = String::new();
        if io::Read::read_to_string(&mut file, &mut content).is_ok()
            && content.contains("## Title:")
        {
            return Ok(Some(stem));
        }
    }

    Ok(None)
}

/// Removes an installed addon given its manifest path.
///
/// Returns `NotFound` if the folder is already gone.
pub fn remove_installed(manifest_path: &Path) -> Result<(), AddonError> {
    let Some(folder) = manifest_path.parent().filter(|p| p.parent().is_some()) else {
        return Err(AddonError::NotFound(manifest_path.to_path_buf()));
    };

    if !folder.is_dir() {
        return Err(AddonError::NotFound(folder.to_path_buf()));
    }

    fs::remove_dir_all(folder)?;
    info!("[INSTALL] Removed {}", folder.display());
    Ok(())
}

/// Removes staging directories left behind by an interrupted install.
pub fn clean_staging(target_root: &Path) -> usize {
    let Ok(entries) = fs::read_dir(target_root) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if (name.starts_with(STAGING_PREFIX) || name.starts_with(PARKED_PREFIX))
            && fs::remove_dir_all(entry.path()).is_ok()
        {
            removed += 1;
        }
    }
    if removed > 0 {
        info!("[INSTALL] Removed {} stale staging directories", removed);
    }
    removed
}

/// Returns true for a non-empty name with no separators or dot segments.
fn is_safe_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':', '\0'])
}

fn split_extract_path(path: &str) -> Result<Vec<String>, AddonError> {
    let segments: Vec<String> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .map(String::from)
        .collect();

    if segments.iter().any(|s| !is_safe_segment(s)) {
        return Err(AddonError::InvalidTargetFolder(path.to_string()));
    }
    Ok(segments)
}

/// Reads every entry name and decides what to extract.
fn plan_entries(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    extract_prefix: Option<&[String]>,
    excludes: &[String],
) -> Result<Vec<PlannedEntry>, AddonError> {
    let mut entries: Vec<PlannedEntry> = Vec::with_capacity(archive.len());
    let mut total_size: u64 = 0;

    for index in 0..archive.len() {
        let file = archive
            .by_index_raw(index)
            .map_err(|e| AddonError::InvalidArchive(e.to_string()))?;

        let Some(enclosed) = file.enclosed_name() else {
            return Err(AddonError::UnsafeArchiveEntry(file.name().to_string()));
        };
        let mode = file.unix_mode();
        if mode.is_some_and(|m| m & FILE_TYPE_MASK == SYMLINK_MODE) {
            return Err(AddonError::UnsafeArchiveEntry(file.name().to_string()));
        }

        total_size = total_size.saturating_add(file.size());
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(AddonError::InvalidArchive(
                "uncompressed size exceeds limit".to_string(),
            ));
        }

        let mut relative = Vec::new();
        for component in enclosed.components() {
            match component {
                Component::Normal(part) => relative.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(AddonError::UnsafeArchiveEntry(file.name().to_string())),
            }
        }
        if relative.is_empty() {
            continue;
        }

        entries.push(PlannedEntry {
            index,
            relative,
            is_dir: file.is_dir(),
            mode,
        });
    }

    strip_shared_root(&mut entries);

    if let Some(prefix) = extract_prefix {
        let before = entries.len();
        entries.retain_mut(|e| {
            if e.relative.len() > prefix.len() && e.relative[..prefix.len()] == *prefix {
                e.relative.drain(..prefix.len());
                true
            } else {
                false
            }
        });
        debug!(
            "[INSTALL] Extract path '{}' kept {} of {} entries",
            prefix.join("/"),
            entries.len(),
            before
        );
        if entries.is_empty() {
            return Err(AddonError::ExtractPathNotFound(prefix.join("/")));
        }
    }

    let patterns: Vec<Pattern> = excludes
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("[INSTALL] Ignoring invalid exclude pattern '{}': {}", p, e);
                None
            }
        })
        .collect();

    if !patterns.is_empty() {
        entries.retain(|e| !is_excluded(&e.relative, &patterns));
    }

    Ok(entries)
}

/// Drops a top-level folder shared by every entry.
fn strip_shared_root(entries: &mut [PlannedEntry]) {
    let Some(first) = entries.first().map(|e| e.relative[0].clone()) else {
        return;
    };

    let shared = entries.iter().all(|e| e.relative[0] == first);
    let is_folder = entries
        .iter()
        .any(|e| e.relative.len() > 1 || (e.is_dir && e.relative.len() == 1));
    if !shared || !is_folder {
        return;
    }

    debug!("[INSTALL] Stripping archive root '{}'", first);
    for entry in entries.iter_mut() {
        entry.relative.remove(0);
    }
}

/// True if any component or the whole relative path matches an exclude.
fn is_excluded(relative: &[String], patterns: &[Pattern]) -> bool {
    if relative.is_empty() {
        return false;
    }
    let joined = relative.join("/");
    patterns
        .iter()
        .any(|p| p.matches(&joined) || relative.iter().any(|c| p.matches(c)))
}

fn write_entries(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    planned: &[PlannedEntry],
    staging: &Path,
) -> Result<(), AddonError> {
    for entry in planned {
        if entry.relative.is_empty() {
            continue;
        }
        let outpath: PathBuf = entry
            .relative
            .iter()
            .fold(staging.to_path_buf(), |acc, part| acc.join(part));

        if entry.is_dir {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = archive
            .by_index(entry.index)
            .map_err(|e| AddonError::InvalidArchive(e.to_string()))?;
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut file, &mut outfile)
            .map_err(|e| AddonError::InvalidArchive(format!("{}: {}", file.name(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.mode {
                fs::set_permissions(&outpath, fs::Permissions::from_mode((mode & 0o777) | 0o600))?;
            }
        }
        #[cfg(not(unix))]
        let _ = entry.mode;
    }
    Ok(())
}

/// Finds the directory holding the addon manifest within the staged tree.
///
/// Looks at the staging root first, then up to two levels down, skipping
/// example and test folders.
fn locate_addon(staging: &Path, folder: &str) -> Option<(PathBuf, String)> {
    let manifest_in = |dir: &Path| -> Option<String> {
        let found = if dir == staging {
            find_manifest_named(dir, folder)
        } else {
            find_manifest(dir)
        }?;
        Some(found.file_name()?.to_string_lossy().into_owned())
    };

    if let Some(name) = manifest_in(staging) {
        return Some((staging.to_path_buf(), name));
    }

    // A folder named like the target wins over alphabetical order
    let named = staging.join(folder);
    if named.is_dir() {
        if let Some(name) = manifest_in(&named) {
            return Some((named, name));
        }
    }

    for level_one in sorted_subdirs(staging) {
        if let Some(name) = manifest_in(&level_one) {
            return Some((level_one, name));
        }
        for level_two in sorted_subdirs(&level_one) {
            if let Some(name) = manifest_in(&level_two) {
                return Some((level_two, name));
            }
        }
    }

    None
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir() && !is_example_dir(p))
                .collect()
        })
        .unwrap_or_default();
    dirs.sort();
    dirs
}

fn is_example_dir(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| {
            let lower = name.to_lowercase();
            lower.contains("example") || lower.contains("_test") || name.starts_with('_')
        })
}

/// Replaces `destination` with `source`, restoring the old tree on failure.
fn swap_into_place(source: &Path, destination: &Path, root: &Path) -> Result<(), AddonError> {
    let parked = if destination.exists() {
        let parked = root.join(format!("{}{}", PARKED_PREFIX, uuid::Uuid::new_v4()));
        fs::rename(destination, &parked)?;
        Some(parked)
    } else {
        None
    };

    if let Err(e) = fs::rename(source, destination) {
        warn!("[INSTALL] Rename into {} failed: {}", destination.display(), e);
        if let Some(parked) = &parked {
            if let Err(restore) = fs::rename(parked, destination) {
                warn!("[INSTALL] Restoring previous install failed: {}", restore);
            }
        }
        remove_quietly(source);
        return Err(e.into());
    }

    if let Some(parked) = parked {
        remove_quietly(&parked);
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("[INSTALL] Failed to remove {}: {}", path.display(), e);
        }
    }
}

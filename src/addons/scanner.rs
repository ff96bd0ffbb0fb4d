//! Discovery of addons already present in the addon root.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::manifest::{AddonManifest, find_manifest, parse_manifest};
use super::types::AddonError;

/// An addon folder found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddon {
    /// Folder name under the addon root.
    pub folder: String,
    /// Path of the manifest file.
    pub manifest_path: PathBuf,
    /// Parsed manifest.
    pub manifest: AddonManifest,
}

/// Lists every addon folder under `root` that has a readable manifest.
///
/// Hidden folders (including staging folders) are skipped. A missing root
/// yields an empty list. Results are sorted by folder name.
pub fn scan_addon_directory(root: &Path) -> Result<Vec<DiscoveredAddon>, AddonError> {
    let mut addons = Vec::new();

    if !root.exists() {
        return Ok(addons);
    }

    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(folder) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if folder.starts_with('.') {
            continue;
        }

        let Some(manifest_path) = find_manifest(&path) else {
            debug!("[SCAN] No manifest in {}", folder);
            continue;
        };

        match parse_manifest(&manifest_path) {
            Ok(manifest) => addons.push(DiscoveredAddon {
                folder: folder.to_string(),
                manifest_path,
                manifest,
            }),
            Err(e) => warn!("[SCAN] Skipping '{}': {}", folder, e),
        }
    }

    addons.sort_by(|a, b| a.folder.to_lowercase().cmp(&b.folder.to_lowercase()));
    Ok(addons)
}

/// A `## DependsOn` entry with no matching folder under the addon root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// Folder of the addon declaring the dependency.
    pub addon: String,
    /// Required folder name.
    pub dependency: String,
}

/// Lists required dependencies that no discovered folder satisfies.
///
/// Folder names compare case-insensitively, as the game does.
#[must_use]
pub fn missing_dependencies(addons: &[DiscoveredAddon]) -> Vec<MissingDependency> {
    let present: HashSet<String> = addons.iter().map(|a| a.folder.to_lowercase()).collect();

    addons
        .iter()
        .flat_map(|addon| {
            addon
                .manifest
                .required_folders()
                .filter(|dep| !present.contains(&dep.to_lowercase()))
                .map(|dep| MissingDependency {
                    addon: addon.folder.clone(),
                    dependency: dep.to_string(),
                })
        })
        .collect()
}

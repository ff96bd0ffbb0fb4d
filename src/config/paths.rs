//! Filesystem locations.
//!
//! The addon root is the game's `AddOns` folder; everything addonctl owns
//! lives under `~/.addonctl/`.

use std::path::{Path, PathBuf};

/// Path of the addon folder below a Documents directory.
const ESO_ADDONS_RELATIVE: &str = "Elder Scrolls Online/live/AddOns";

/// Steam Proton prefix of the game (app id 306130).
#[cfg(target_os = "linux")]
const STEAM_PREFIX: &str =
    ".steam/steam/steamapps/compatdata/306130/pfx/drive_c/users/steamuser/Documents";

/// Default Lutris prefix.
#[cfg(target_os = "linux")]
const LUTRIS_PREFIX: &str = "Games/elder-scrolls-online/drive_c/users/steamuser/Documents";

/// Returns `~/.addonctl/`.
#[must_use]
pub fn data_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".addonctl")
}

/// Returns the install record file.
#[must_use]
pub fn records_path() -> PathBuf {
    data_directory().join("installed.toml")
}

/// Returns the catalog cache directory.
#[must_use]
pub fn cache_directory() -> PathBuf {
    data_directory().join("cache")
}

/// Resolves the addon root.
///
/// An existing override wins; otherwise the platform defaults are tried in order.
/// Returns `None` when nothing exists on disk.
#[must_use]
pub fn addon_root_directory(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        if path.is_dir() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(
            "Configured addon directory {} does not exist, probing defaults",
            path.display()
        );
    }

    default_candidates().into_iter().find(|p| p.is_dir())
}

/// Returns the platform default locations in search order.
#[must_use]
pub fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    #[cfg(any(target_os = "windows", target_os = "macos"))]
    {
        if let Some(docs) = dirs::document_dir() {
            candidates.push(docs.join(ESO_ADDONS_RELATIVE));
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(STEAM_PREFIX).join(ESO_ADDONS_RELATIVE));
            candidates.push(home.join(LUTRIS_PREFIX).join(ESO_ADDONS_RELATIVE));
        }
        if let Some(docs) = dirs::document_dir() {
            candidates.push(docs.join(ESO_ADDONS_RELATIVE));
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_override_wins_when_present() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            addon_root_directory(Some(dir.path())),
            Some(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_locations_under_data_directory() {
        assert!(records_path().starts_with(data_directory()));
        assert!(cache_directory().ends_with(".addonctl/cache"));
    }

    #[test]
    fn test_candidates_end_in_addons() {
        for candidate in default_candidates() {
            assert!(candidate.ends_with("AddOns"));
        }
    }
}

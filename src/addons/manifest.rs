//! Addon manifest parsing.
//!
//! A manifest is a text file named after its folder (`Foo/Foo.txt` or
//! `Foo/Foo.addon`) whose `## Key: Value` header lines describe the addon.
//! Every other non-comment line is a file the game loads.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::types::AddonError;

/// Parsed addon manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonManifest {
    /// `## Title`
    pub title: String,
    /// `## APIVersion`
    pub api_version: Option<String>,
    /// `## Author`
    pub author: Option<String>,
    /// `## Version`, falling back to `## AddOnVersion`.
    pub version: Option<String>,
    /// `## Description`
    pub description: Option<String>,
    /// `## DependsOn`, space separated.
    pub dependencies: Vec<String>,
    /// `## OptionalDependsOn`, space separated.
    pub optional_dependencies: Vec<String>,
    /// `## SavedVariables`, space separated.
    pub saved_variables: Vec<String>,
    /// Listed source files.
    pub files: Vec<String>,
}

impl AddonManifest {
    /// Returns the title without `|cRRGGBB` / `|r` color escapes.
    #[must_use]
    pub fn display_title(&self) -> String {
        let mut out = String::with_capacity(self.title.len());
        let mut chars = self.title.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '|' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('c' | 'C') => {
                    chars.next();
                    for _ in 0..6 {
                        if chars.peek().is_some_and(char::is_ascii_hexdigit) {
                            chars.next();
                        }
                    }
                }
                Some('r' | 'R') => {
                    chars.next();
                }
                _ => out.push(c),
            }
        }
        out.trim().to_string()
    }

    /// Folder names from `## DependsOn`, without `>=version` constraints.
    pub fn required_folders(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| strip_constraint(d))
    }

    /// Folder names from `## OptionalDependsOn`.
    pub fn optional_folders(&self) -> impl Iterator<Item = &str> {
        self.optional_dependencies.iter().map(|d| strip_constraint(d))
    }
}

fn strip_constraint(dependency: &str) -> &str {
    dependency
        .split_once(">=")
        .map_or(dependency, |(name, _)| name)
}

/// Reads and parses the manifest at `path`.
pub fn parse_manifest(path: &Path) -> Result<AddonManifest, AddonError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// Parses manifest text.
pub fn parse_manifest_str(content: &str) -> Result<AddonManifest, AddonError> {
    let mut manifest = AddonManifest::default();
    let mut title = None;
    let mut addon_version = None;

    for line in content.lines() {
        // Some manifests start with a UTF-8 BOM
        let line = line.trim().trim_start_matches('\u{feff}');

        if let Some(header) = line.strip_prefix("##") {
            let Some((key, value)) = header.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_lowercase().as_str() {
                "title" => title = Some(value),
                "apiversion" => manifest.api_version = Some(value),
                "author" => manifest.author = Some(value),
                "version" => manifest.version = Some(value),
                "addonversion" => addon_version = Some(value),
                "description" => manifest.description = Some(value),
                "dependson" => manifest.dependencies = split_list(&value),
                "optionaldependson" => manifest.optional_dependencies = split_list(&value),
                "savedvariables" => manifest.saved_variables = split_list(&value),
                _ => {}
            }
        } else if !line.is_empty() && !line.starts_with(';') && !line.starts_with('#') {
            manifest.files.push(line.to_string());
        }
    }

    manifest.title = title
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AddonError::InvalidManifest("missing ## Title:".to_string()))?;
    if manifest.version.is_none() {
        manifest.version = addon_version;
    }

    Ok(manifest)
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}

/// Finds the manifest inside an addon folder.
///
/// Prefers `<folder>.txt`, then `<folder>.addon`, then any `.txt`/`.addon`
/// file carrying a `## Title:` header.
#[must_use]
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
    let folder = dir.file_name()?.to_str()?;
    find_manifest_named(dir, folder)
}

/// Like [`find_manifest`], but expects the manifest to be named `folder`.
///
/// Used while files still sit in a staging directory.
#[must_use]
pub fn find_manifest_named(dir: &Path, folder: &str) -> Option<PathBuf> {
    for ext in ["txt", "addon"] {
        let candidate = dir.join(format!("{}.{}", folder, ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("addon"))
        })
        .filter(|p| {
            fs::read_to_string(p)
                .map(|c| c.contains("## Title:"))
                .unwrap_or(false)
        })
        .collect();

    // Example manifests shipped alongside the real one sort last
    candidates.sort_by_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        (name.contains("example"), name)
    });
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "\
## Title: |c00FF00Combat|r Metrics
## APIVersion: 101041 101042
## Author: Solinur
## AddOnVersion: 1050
## Description: Fight parser
## DependsOn: LibAddonMenu-2.0>=32 LibCombat
## OptionalDependsOn: LibCustomMenu
## SavedVariables: CombatMetrics_Save

; comment
lang/en.lua
CombatMetrics.lua
";

    #[test]
    fn test_parse_manifest() {
        let manifest = parse_manifest_str(MANIFEST).unwrap();
        assert_eq!(manifest.title, "|c00FF00Combat|r Metrics");
        assert_eq!(manifest.version.as_deref(), Some("1050"));
        assert_eq!(manifest.dependencies, vec!["LibAddonMenu-2.0>=32", "LibCombat"]);
        assert_eq!(manifest.optional_dependencies, vec!["LibCustomMenu"]);
        assert_eq!(manifest.saved_variables, vec!["CombatMetrics_Save"]);
        assert_eq!(manifest.files, vec!["lang/en.lua", "CombatMetrics.lua"]);
    }

    #[test]
    fn test_dependency_folders_drop_constraints() {
        let manifest = parse_manifest_str(MANIFEST).unwrap();
        let required: Vec<_> = manifest.required_folders().collect();
        assert_eq!(required, vec!["LibAddonMenu-2.0", "LibCombat"]);
        let optional: Vec<_> = manifest.optional_folders().collect();
        assert_eq!(optional, vec!["LibCustomMenu"]);
    }

    #[test]
    fn test_display_title() {
        let manifest = parse_manifest_str(MANIFEST).unwrap();
        assert_eq!(manifest.display_title(), "Combat Metrics");
    }

    #[test]
    fn test_missing_title() {
        let err = parse_manifest_str("## Author: x\nfile.lua\n").unwrap_err();
        assert!(matches!(err, AddonError::InvalidManifest(_)));
    }

    #[test]
    fn test_find_manifest_prefers_folder_name() {
        let dir = TempDir::new().unwrap();
        let addon = dir.path().join("MyAddon");
        fs::create_dir(&addon).unwrap();
        fs::write(addon.join("Other.txt"), "## Title: Other\n").unwrap();
        fs::write(addon.join("MyAddon.txt"), "## Title: Mine\n").unwrap();

        assert_eq!(find_manifest(&addon), Some(addon.join("MyAddon.txt")));
    }

    #[test]
    fn test_find_manifest_skips_examples() {
        let dir = TempDir::new().unwrap();
        let addon = dir.path().join("Lib");
        fs::create_dir(&addon).unwrap();
        fs::write(addon.join("AExample.txt"), "## Title: Example\n").unwrap();
        fs::write(addon.join("Main.addon"), "## Title: Lib\n").unwrap();
        fs::write(addon.join("readme.txt"), "plain text\n").unwrap();

        assert_eq!(find_manifest(&addon), Some(addon.join("Main.addon")));
    }
}

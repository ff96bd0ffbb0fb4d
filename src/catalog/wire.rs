//! Wire formats of the catalog JSON document.
//!
//! The index has been published in two shapes. Both are translated into
//! [`CatalogEntry`] here so nothing past this module sees optional wire fields.
//!
//! - **v1** (no `format_version`): camelCase keys, a single `downloadUrl` per
//!   release and no install descriptor.
//! - **v2** (`format_version: 2`): snake_case keys, explicit `install`,
//!   `version_info` and an ordered `download_sources` list.

use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    CatalogEntry, CatalogError, CatalogSnapshot, DownloadSource, DownloadSourceKind,
    InstallDescriptor, InstallMethod, Release, SourceDescriptor,
};

/// Newest format version this client understands.
pub const CURRENT_FORMAT_VERSION: u64 = 2;

/// Parses a catalog document of any supported version.
pub fn parse_catalog(
    json: &str,
    fetched_at: Option<String>,
) -> Result<CatalogSnapshot, CatalogError> {
    let value: serde_json::Value = serde_json::from_str(json)?;

    let version = value
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1);

    let entries = match version {
        1 => {
            let index: V1Index = serde_json::from_value(value)?;
            debug!("[CATALOG] Parsing v1 index with {} addons", index.addons.len());
            index.addons.into_iter().filter_map(V1Addon::into_entry).collect()
        }
        v => {
            if v > CURRENT_FORMAT_VERSION {
                warn!(
                    "[CATALOG] Index format {} is newer than supported {}, reading as v2",
                    v, CURRENT_FORMAT_VERSION
                );
            }
            let index: V2Index = serde_json::from_value(value)?;
            debug!("[CATALOG] Parsing v2 index with {} addons", index.addons.len());
            index.addons.into_iter().filter_map(V2Addon::into_entry).collect()
        }
    };

    Ok(CatalogSnapshot::new(entries, fetched_at))
}

/// Derives a folder name from the last segment of "owner/repo".
fn folder_from_repo(repo: &str, fallback: &str) -> String {
    repo.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ============================================================================
// v1
// ============================================================================

#[derive(Debug, Deserialize)]
struct V1Index {
    #[serde(default)]
    addons: Vec<V1Addon>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1Addon {
    #[serde(default)]
    slug: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    source: Option<V1Source>,
    #[serde(default)]
    compatibility: V1Compatibility,
    latest_release: Option<V1Release>,
}

#[derive(Debug, Deserialize)]
struct V1Source {
    #[serde(rename = "type", default)]
    source_type: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1Compatibility {
    #[serde(default)]
    required_dependencies: Vec<String>,
    #[serde(default)]
    optional_dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1Release {
    #[serde(default)]
    version: String,
    download_url: Option<String>,
    published_at: Option<String>,
    file_size: Option<u64>,
    checksum: Option<String>,
}

impl V1Addon {
    fn into_entry(self) -> Option<CatalogEntry> {
        if self.slug.trim().is_empty() {
            warn!("[CATALOG] Skipping v1 entry without slug: '{}'", self.name);
            return None;
        }

        let source = self.source.map_or_else(
            || SourceDescriptor {
                kind: String::new(),
                repo: String::new(),
                branch: String::from("main"),
                path: None,
            },
            |s| SourceDescriptor {
                kind: s.source_type,
                repo: s.repo,
                branch: if s.branch.is_empty() {
                    String::from("main")
                } else {
                    s.branch
                },
                path: None,
            },
        );

        let method = if self.latest_release.is_some() {
            InstallMethod::Release
        } else {
            InstallMethod::Branch
        };

        let install = InstallDescriptor {
            method,
            extract_path: None,
            target_folder: folder_from_repo(&source.repo, &self.slug),
            excludes: Vec::new(),
        };

        let latest_release = self.latest_release.map(|r| Release {
            version: r.version,
            sources: Vec::new(),
            legacy_url: non_empty(r.download_url),
            version_sort_key: None,
            commit_sha: None,
            checksum: non_empty(r.checksum),
            file_size: r.file_size,
            published_at: r.published_at,
        });

        let name = if self.name.is_empty() {
            self.slug.clone()
        } else {
            self.name
        };

        Some(CatalogEntry {
            slug: self.slug,
            name,
            description: self.description,
            authors: self.authors,
            category: self.category,
            tags: self.tags,
            source,
            install,
            required_dependencies: self.compatibility.required_dependencies,
            optional_dependencies: self.compatibility.optional_dependencies,
            latest_release,
        })
    }
}

// ============================================================================
// v2
// ============================================================================

#[derive(Debug, Deserialize)]
struct V2Index {
    #[serde(default)]
    addons: Vec<V2Addon>,
}

#[derive(Debug, Deserialize)]
struct V2Addon {
    #[serde(default)]
    slug: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    source: Option<V2Source>,
    #[serde(default)]
    compatibility: V2Compatibility,
    install: Option<V2Install>,
    latest_release: Option<V2Release>,
    version_info: Option<V2VersionInfo>,
    #[serde(default)]
    download_sources: Vec<V2DownloadSource>,
}

#[derive(Debug, Deserialize)]
struct V2Source {
    #[serde(rename = "type", default)]
    source_type: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: String,
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V2Compatibility {
    #[serde(default)]
    required_dependencies: Vec<String>,
    #[serde(default)]
    optional_dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct V2Install {
    #[serde(default)]
    method: String,
    extract_path: Option<String>,
    target_folder: Option<String>,
    #[serde(default)]
    excludes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct V2Release {
    #[serde(default)]
    version: String,
    download_url: Option<String>,
    published_at: Option<String>,
    file_size: Option<u64>,
    checksum: Option<String>,
    commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V2VersionInfo {
    version_sort_key: Option<i64>,
    release_channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V2DownloadSource {
    #[serde(rename = "type", default)]
    source_type: String,
    #[serde(default)]
    url: String,
}

impl V2Addon {
    fn into_entry(self) -> Option<CatalogEntry> {
        if self.slug.trim().is_empty() {
            warn!("[CATALOG] Skipping v2 entry without slug: '{}'", self.name);
            return None;
        }

        let source = self.source.map_or_else(
            || SourceDescriptor {
                kind: String::new(),
                repo: String::new(),
                branch: String::from("main"),
                path: None,
            },
            |s| SourceDescriptor {
                kind: s.source_type,
                repo: s.repo,
                branch: if s.branch.is_empty() {
                    String::from("main")
                } else {
                    s.branch
                },
                path: non_empty(s.path),
            },
        );

        let install = match self.install {
            Some(i) => InstallDescriptor {
                method: InstallMethod::parse(&i.method),
                extract_path: non_empty(i.extract_path),
                target_folder: non_empty(i.target_folder)
                    .unwrap_or_else(|| folder_from_repo(&source.repo, &self.slug)),
                excludes: i.excludes,
            },
            None => InstallDescriptor {
                method: InstallMethod::Release,
                extract_path: source.path.clone(),
                target_folder: folder_from_repo(&source.repo, &self.slug),
                excludes: Vec::new(),
            },
        };

        let sources: Vec<DownloadSource> = self
            .download_sources
            .into_iter()
            .filter(|s| !s.url.trim().is_empty())
            .map(|s| DownloadSource::new(DownloadSourceKind::parse(&s.source_type), s.url))
            .collect();

        let (sort_key, channel) = self
            .version_info
            .map(|v| (v.version_sort_key, v.release_channel))
            .unwrap_or((None, None));

        let latest_release = match self.latest_release {
            Some(r) => Some(Release {
                version: r.version,
                sources,
                legacy_url: non_empty(r.download_url),
                version_sort_key: sort_key,
                commit_sha: non_empty(r.commit_sha),
                checksum: non_empty(r.checksum),
                file_size: r.file_size,
                published_at: r.published_at,
            }),
            None if !sources.is_empty() => Some(Release {
                version: format!("{}-latest", source.branch),
                sources,
                version_sort_key: sort_key,
                ..Release::default()
            }),
            None => None,
        };

        if channel.as_deref() == Some("branch")
            && latest_release
                .as_ref()
                .is_some_and(|r| r.commit_sha.is_none())
        {
            debug!(
                "[CATALOG] Branch-tracked addon '{}' has no commit sha",
                self.slug
            );
        }

        let name = if self.name.is_empty() {
            self.slug.clone()
        } else {
            self.name
        };

        Some(CatalogEntry {
            slug: self.slug,
            name,
            description: self.description,
            authors: self.authors,
            category: self.category,
            tags: self.tags,
            source,
            install,
            required_dependencies: self.compatibility.required_dependencies,
            optional_dependencies: self.compatibility.optional_dependencies,
            latest_release,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1_INDEX: &str = r#"{
        "addons": [
            {
                "slug": "libaddonmenu-2-0",
                "name": "LibAddonMenu-2.0",
                "description": "Settings panels",
                "authors": ["sirinsidiator"],
                "category": "library",
                "tags": ["lib"],
                "source": { "type": "github", "repo": "sirinsidiator/LibAddonMenu", "branch": "master" },
                "compatibility": {
                    "apiVersion": "101041",
                    "gameVersions": [],
                    "requiredDependencies": ["LibStub"],
                    "optionalDependencies": []
                },
                "latestRelease": {
                    "version": "2.0r34",
                    "downloadUrl": "https://example.com/lam.zip",
                    "publishedAt": "2024-01-01T00:00:00Z"
                }
            },
            { "name": "no slug" }
        ],
        "fetchedAt": "2024-01-02T00:00:00Z"
    }"#;

    const V2_INDEX: &str = r#"{
        "format_version": 2,
        "generated_at": "2024-06-01T00:00:00Z",
        "addon_count": 1,
        "addons": [
            {
                "slug": "combat-metrics",
                "name": "Combat Metrics",
                "description": "Parses fights",
                "authors": ["Solinur"],
                "category": "combat",
                "tags": [],
                "source": { "type": "github", "repo": "Solinur/CombatMetrics", "branch": "main", "path": null },
                "compatibility": {
                    "required_dependencies": ["libaddonmenu-2-0"],
                    "optional_dependencies": ["libcustommenu"]
                },
                "install": {
                    "method": "branch",
                    "extract_path": "CombatMetrics",
                    "target_folder": "CombatMetrics",
                    "excludes": [".*", "*.md"]
                },
                "latest_release": {
                    "version": "main-abc1234",
                    "download_url": "https://example.com/cm.zip",
                    "commit_sha": "abc1234",
                    "checksum": ""
                },
                "version_info": { "version_sort_key": 1005003, "release_channel": "branch" },
                "download_sources": [
                    { "type": "jsdelivr", "url": "https://cdn.example.com/cm.zip" },
                    { "type": "github_archive", "url": "https://github.com/Solinur/CombatMetrics/archive/main.zip" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_v1() {
        let snapshot = parse_catalog(V1_INDEX, None).unwrap();
        assert_eq!(snapshot.len(), 1);

        let entry = snapshot.get("libaddonmenu-2-0").unwrap();
        assert_eq!(entry.install.target_folder, "LibAddonMenu");
        assert_eq!(entry.install.method, InstallMethod::Release);
        assert_eq!(entry.required_dependencies, vec!["LibStub"]);

        let sources = entry.download_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, DownloadSourceKind::Legacy);
        assert_eq!(sources[0].url, "https://example.com/lam.zip");
    }

    #[test]
    fn test_parse_v2() {
        let snapshot = parse_catalog(V2_INDEX, Some("now".to_string())).unwrap();
        assert_eq!(snapshot.fetched_at(), Some("now"));

        let entry = snapshot.get("combat-metrics").unwrap();
        assert_eq!(entry.install.method, InstallMethod::Branch);
        assert_eq!(entry.install.extract_path.as_deref(), Some("CombatMetrics"));
        assert_eq!(entry.install.excludes, vec![".*", "*.md"]);
        assert_eq!(entry.optional_dependencies, vec!["libcustommenu"]);

        let release = entry.latest_release.as_ref().unwrap();
        assert_eq!(release.version_sort_key, Some(1_005_003));
        assert_eq!(release.commit_sha.as_deref(), Some("abc1234"));
        assert!(release.checksum.is_none());

        let sources = entry.download_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, DownloadSourceKind::Cdn);
        assert_eq!(sources[1].kind, DownloadSourceKind::GithubArchive);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_catalog("not json", None).is_err());
    }

    #[test]
    fn test_folder_from_repo() {
        assert_eq!(folder_from_repo("owner/Repo", "x"), "Repo");
        assert_eq!(folder_from_repo("", "fallback"), "fallback");
    }
}

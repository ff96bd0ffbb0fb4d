//! GitHub API client for custom-tracked repositories.
//!
//! Only the few endpoints needed to install and update an addon straight from
//! a repository are used: repository lookup, latest release and branch head.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::types::AddonError;
use crate::catalog::{DownloadSource, DownloadSourceKind};

/// Default GitHub API location.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Default GitHub web location, used for branch archives.
pub const GITHUB_WEB_URL: &str = "https://github.com";

/// Request timeout for API calls.
const API_TIMEOUT_SECS: u64 = 30;

/// A release asset.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// A published release.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    /// Tag name (used as the version label).
    pub tag_name: String,
    /// Release title.
    #[serde(default)]
    pub name: Option<String>,
    /// Publication time.
    #[serde(default)]
    pub published_at: Option<String>,
    /// Source archive of the tag.
    #[serde(default)]
    pub zipball_url: Option<String>,
    /// Uploaded assets.
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

impl GitHubRelease {
    /// Returns download candidates: zip assets first, then the source zipball.
    #[must_use]
    pub fn download_sources(&self) -> Vec<DownloadSource> {
        let mut sources: Vec<DownloadSource> = self
            .assets
            .iter()
            .filter(|a| a.name.to_lowercase().ends_with(".zip"))
            .map(|a| {
                DownloadSource::new(DownloadSourceKind::GithubRelease, &a.browser_download_url)
            })
            .collect();

        if let Some(zipball) = &self.zipball_url {
            sources.push(DownloadSource::new(DownloadSourceKind::GithubArchive, zipball));
        }
        sources
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    default_branch: Option<String>,
}

/// Parsed `owner/repo[@tag|#branch]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Tag requested with `@`.
    pub tag: Option<String>,
    /// Branch requested with `#`.
    pub branch: Option<String>,
}

impl RepoRef {
    /// Returns "owner/name".
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Parses a repository reference.
///
/// Accepts `owner/repo`, `owner/repo@tag`, `owner/repo#branch` and
/// `https://github.com/owner/repo` (a trailing `.git` is dropped).
#[must_use]
pub fn parse_repo_ref(input: &str) -> Option<RepoRef> {
    let input = input.trim();
    let input = input
        .strip_prefix("https://github.com/")
        .or_else(|| input.strip_prefix("http://github.com/"))
        .or_else(|| input.strip_prefix("github.com/"))
        .unwrap_or(input);

    let (repo_part, tag, branch) = if let Some((repo, tag)) = input.split_once('@') {
        (repo, Some(tag.to_string()), None)
    } else if let Some((repo, branch)) = input.split_once('#') {
        (repo, None, Some(branch.to_string()))
    } else {
        (input, None, None)
    };

    let repo_part = repo_part.trim_end_matches('/');
    let parts: Vec<&str> = repo_part.split('/').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let name = parts[1].strip_suffix(".git").unwrap_or(parts[1]);
    if name.is_empty() {
        return None;
    }

    Some(RepoRef {
        owner: parts[0].to_string(),
        name: name.to_string(),
        tag: tag.filter(|t| !t.is_empty()),
        branch: branch.filter(|b| !b.is_empty()),
    })
}

/// Async GitHub client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    web_url: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubClient {
    /// Creates a client against github.com.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_urls(GITHUB_API_URL, GITHUB_WEB_URL)
    }

    /// Creates a client against other hosts (GitHub Enterprise, test servers).
    #[must_use]
    pub fn with_base_urls(api_url: &str, web_url: &str) -> Self {
        assert!(!api_url.is_empty(), "API URL must not be empty");

        let client = reqwest::Client::builder()
            .user_agent(concat!("addonctl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the archive URL of a branch head.
    #[must_use]
    pub fn branch_archive_url(&self, repo: &str, branch: &str) -> String {
        format!("{}/{}/archive/refs/heads/{}.zip", self.web_url, repo, branch)
    }

    /// Returns true if the repository exists.
    pub async fn repo_exists(&self, repo: &str) -> Result<bool, AddonError> {
        Ok(self.default_branch(repo).await?.is_some())
    }

    /// Returns the default branch, or `None` if the repository does not exist.
    pub async fn default_branch(&self, repo: &str) -> Result<Option<String>, AddonError> {
        let url = format!("{}/repos/{}", self.api_url, repo);
        let Some(response) = self.get_json::<RepoResponse>(&url).await? else {
            return Ok(None);
        };
        Ok(Some(
            response
                .default_branch
                .unwrap_or_else(|| "main".to_string()),
        ))
    }

    /// Returns the latest release, or `None` if the repository has none.
    pub async fn latest_release(&self, repo: &str) -> Result<Option<GitHubRelease>, AddonError> {
        info!("[GITHUB] Fetching latest release of {}", repo);
        let url = format!("{}/repos/{}/releases/latest", self.api_url, repo);
        self.get_json(&url).await
    }

    /// Returns the release with `tag`, or `None` if absent.
    pub async fn release_by_tag(
        &self,
        repo: &str,
        tag: &str,
    ) -> Result<Option<GitHubRelease>, AddonError> {
        let url = format!("{}/repos/{}/releases/tags/{}", self.api_url, repo, tag);
        self.get_json(&url).await
    }

    /// Returns the head commit of `branch`, or `None` if absent.
    pub async fn branch_head(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<String>, AddonError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_url, repo, branch);
        Ok(self
            .get_json::<CommitResponse>(&url)
            .await?
            .map(|c| c.sha))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, AddonError> {
        debug!("[GITHUB] GET {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let exhausted = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == "0");
            if exhausted || status == StatusCode::TOO_MANY_REQUESTS {
                warn!("[GITHUB] Rate limit exceeded");
                return Err(AddonError::Network(
                    "GitHub API rate limit exceeded".to_string(),
                ));
            }
        }

        if !status.is_success() {
            return Err(AddonError::Network(format!(
                "GitHub API returned HTTP {}",
                status.as_u16()
            )));
        }

        Ok(Some(response.json::<T>().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_repo_ref_simple() {
        let r = parse_repo_ref("owner/repo").unwrap();
        assert_eq!(r.full_name(), "owner/repo");
        assert!(r.tag.is_none());
        assert!(r.branch.is_none());
    }

    #[test]
    fn test_parse_repo_ref_with_tag_and_branch() {
        let r = parse_repo_ref("owner/repo@v1.2").unwrap();
        assert_eq!(r.tag.as_deref(), Some("v1.2"));

        let r = parse_repo_ref("owner/repo#dev").unwrap();
        assert_eq!(r.branch.as_deref(), Some("dev"));
    }

    #[test]
    fn test_parse_repo_ref_url() {
        let r = parse_repo_ref("https://github.com/Solinur/CombatMetrics.git").unwrap();
        assert_eq!(r.full_name(), "Solinur/CombatMetrics");
    }

    #[test]
    fn test_parse_repo_ref_invalid() {
        assert!(parse_repo_ref("justrepo").is_none());
        assert!(parse_repo_ref("a/b/c").is_none());
        assert!(parse_repo_ref("/repo").is_none());
    }

    #[test]
    fn test_release_sources_order() {
        let release = GitHubRelease {
            tag_name: "v1".to_string(),
            name: None,
            published_at: None,
            zipball_url: Some("https://api.github.com/zipball/v1".to_string()),
            assets: vec![
                GitHubAsset {
                    name: "notes.txt".to_string(),
                    browser_download_url: "https://x/notes.txt".to_string(),
                    size: 1,
                },
                GitHubAsset {
                    name: "Addon.ZIP".to_string(),
                    browser_download_url: "https://x/Addon.zip".to_string(),
                    size: 10,
                },
            ],
        };
        let sources = release.download_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, DownloadSourceKind::GithubRelease);
        assert_eq!(sources[1].kind, DownloadSourceKind::GithubArchive);
    }

    #[test]
    fn test_branch_archive_url() {
        let client = GitHubClient::with_base_urls("http://api.local/", "http://web.local");
        assert_eq!(
            client.branch_archive_url("o/r", "main"),
            "http://web.local/o/r/archive/refs/heads/main.zip"
        );
    }
}

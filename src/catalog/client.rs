//! HTTP client for the community addon index.
//!
//! The index body is cached on disk next to a small TOML metadata file holding
//! the ETag and fetch time. A cache younger than the TTL is served without
//! touching the network; otherwise a conditional request is made and a `304`
//! reuses the cached body.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{CatalogSnapshot, parse_catalog};

/// Default community index location.
pub const DEFAULT_INDEX_URL: &str = "https://xop.co/eso-addon-index/";

/// Request timeout for the index document.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum accepted size of the cached index body (32MB).
const MAX_CACHE_SIZE: u64 = 32 * 1024 * 1024;

const CACHE_BODY_FILE: &str = "catalog.json";
const CACHE_META_FILE: &str = "catalog.meta.toml";

/// Errors raised while obtaining the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Transport failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("Index server returned HTTP {0}")]
    Http(u16),

    /// Malformed index document.
    #[error("Failed to parse index: {0}")]
    Parse(#[from] serde_json::Error),

    /// Cache read or write failure.
    #[error("Cache IO error: {0}")]
    Io(#[from] io::Error),

    /// Cache metadata could not be (de)serialized.
    #[error("Cache metadata error: {0}")]
    Format(String),
}

/// Metadata stored next to the cached index body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheMeta {
    /// URL the body was fetched from.
    url: String,
    /// ETag returned by the server.
    etag: Option<String>,
    /// RFC 3339 fetch time.
    fetched_at: String,
}

impl CacheMeta {
    fn age(&self) -> Option<Duration> {
        let fetched = DateTime::parse_from_rfc3339(&self.fetched_at).ok()?;
        let elapsed = Utc::now().signed_duration_since(fetched.with_timezone(&Utc));
        elapsed.to_std().ok()
    }
}

/// Fetches and caches the catalog.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    url: String,
    cache_dir: PathBuf,
    ttl: Duration,
}

impl CatalogClient {
    /// Creates a new catalog client.
    ///
    /// # Arguments
    /// * `url` - Index document URL.
    /// * `cache_dir` - Directory holding the cached body and metadata.
    /// * `ttl` - Age below which the cache is served without a request.
    #[must_use]
    pub fn new(url: &str, cache_dir: PathBuf, ttl: Duration) -> Self {
        assert!(!url.is_empty(), "Index URL must not be empty");

        let client = reqwest::Client::builder()
            .user_agent(concat!("addonctl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.to_string(),
            cache_dir,
            ttl,
        }
    }

    /// Returns the catalog, refreshing it when the cache is stale.
    ///
    /// With `force_refresh` an unconditional request is made. If the network
    /// fails and a cached body exists, the cached snapshot is returned.
    pub async fn fetch_catalog(
        &self,
        force_refresh: bool,
    ) -> Result<CatalogSnapshot, CatalogError> {
        info!(
            "[CATALOG] fetch_catalog called, force_refresh={}",
            force_refresh
        );

        let meta = self.read_meta();

        if !force_refresh {
            if let Some(meta) = meta.as_ref().filter(|m| m.url == self.url) {
                if meta.age().is_some_and(|age| age < self.ttl) {
                    if let Some(snapshot) = self.cached_snapshot()? {
                        info!("[CATALOG] Serving {} cached entries", snapshot.len());
                        return Ok(snapshot);
                    }
                }
            }
        }

        let etag = if force_refresh {
            None
        } else {
            meta.as_ref()
                .filter(|m| m.url == self.url)
                .and_then(|m| m.etag.clone())
        };

        match self.request(etag.as_deref()).await {
            Ok(Fetched::NotModified) => {
                debug!("[CATALOG] Index not modified");
                let Some(body) = self.read_body()? else {
                    // 304 without a cached body: the cache was removed underneath us
                    return match self.request(None).await? {
                        Fetched::Body { body, etag } => self.store(&body, etag),
                        Fetched::NotModified => Err(CatalogError::Http(304)),
                    };
                };
                let fetched_at = Utc::now().to_rfc3339();
                self.write_meta(&CacheMeta {
                    url: self.url.clone(),
                    etag,
                    fetched_at: fetched_at.clone(),
                })?;
                parse_catalog(&body, Some(fetched_at))
            }
            Ok(Fetched::Body { body, etag }) => self.store(&body, etag),
            Err(e) => match self.cached_snapshot() {
                Ok(Some(snapshot)) => {
                    warn!("[CATALOG] Fetch failed ({}), using stale cache", e);
                    Ok(snapshot)
                }
                _ => Err(e),
            },
        }
    }

    /// Parses a freshly downloaded body and caches it.
    fn store(&self, body: &str, etag: Option<String>) -> Result<CatalogSnapshot, CatalogError> {
        let fetched_at = Utc::now().to_rfc3339();
        let snapshot = parse_catalog(body, Some(fetched_at.clone()))?;
        info!("[CATALOG] Fetched {} entries from {}", snapshot.len(), self.url);
        self.write_cache(body, &CacheMeta {
            url: self.url.clone(),
            etag,
            fetched_at,
        })?;
        Ok(snapshot)
    }

    /// Returns the cached snapshot without any network access.
    pub fn cached_snapshot(&self) -> Result<Option<CatalogSnapshot>, CatalogError> {
        let Some(body) = self.read_body()? else {
            return Ok(None);
        };
        let fetched_at = self.read_meta().map(|m| m.fetched_at);
        parse_catalog(&body, fetched_at).map(Some)
    }

    async fn request(&self, etag: Option<&str>) -> Result<Fetched, CatalogError> {
        let mut request = self.client.get(&self.url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(CatalogError::Http(status.as_u16()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(Fetched::Body { body, etag })
    }

    fn body_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_BODY_FILE)
    }

    fn meta_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_META_FILE)
    }

    fn read_body(&self) -> Result<Option<String>, CatalogError> {
        let path = self.body_path();
        if !path.exists() {
            return Ok(None);
        }
        if fs::metadata(&path)?.len() > MAX_CACHE_SIZE {
            warn!("[CATALOG] Cached index exceeds size cap, ignoring");
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn read_meta(&self) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        toml::from_str(&content).ok()
    }

    fn write_meta(&self, meta: &CacheMeta) -> Result<(), CatalogError> {
        fs::create_dir_all(&self.cache_dir)?;
        let content =
            toml::to_string_pretty(meta).map_err(|e| CatalogError::Format(e.to_string()))?;
        write_atomic(&self.meta_path(), content.as_bytes())?;
        Ok(())
    }

    fn write_cache(&self, body: &str, meta: &CacheMeta) -> Result<(), CatalogError> {
        fs::create_dir_all(&self.cache_dir)?;
        write_atomic(&self.body_path(), body.as_bytes())?;
        self.write_meta(meta)
    }
}

/// Outcome of a single index request.
enum Fetched {
    NotModified,
    Body { body: String, etag: Option<String> },
}

fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INDEX: &str = r#"{"format_version": 2, "addons": [{"slug": "a", "name": "A"}]}"#;

    #[test]
    fn test_cached_snapshot_empty() {
        let dir = TempDir::new().unwrap();
        let client = CatalogClient::new(
            DEFAULT_INDEX_URL,
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
        );
        assert!(client.cached_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_served_without_network() {
        let dir = TempDir::new().unwrap();
        // Unroutable URL: any request would fail
        let client = CatalogClient::new(
            "http://127.0.0.1:9/index.json",
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
        );
        client
            .write_cache(INDEX, &CacheMeta {
                url: client.url.clone(),
                etag: Some("\"abc\"".to_string()),
                fetched_at: Utc::now().to_rfc3339(),
            })
            .unwrap();

        let snapshot = client.fetch_catalog(false).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("a").is_some());
    }

    #[tokio::test]
    async fn test_stale_cache_on_network_failure() {
        let dir = TempDir::new().unwrap();
        let client = CatalogClient::new(
            "http://127.0.0.1:9/index.json",
            dir.path().to_path_buf(),
            Duration::from_secs(0),
        );
        client
            .write_cache(INDEX, &CacheMeta {
                url: client.url.clone(),
                etag: None,
                fetched_at: "2020-01-01T00:00:00Z".to_string(),
            })
            .unwrap();

        let snapshot = client.fetch_catalog(true).await.unwrap();
        assert_eq!(snapshot.fetched_at(), Some("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn test_meta_age() {
        let meta = CacheMeta {
            url: String::new(),
            etag: None,
            fetched_at: Utc::now().to_rfc3339(),
        };
        assert!(meta.age().is_some_and(|a| a < Duration::from_secs(60)));

        let bad = CacheMeta {
            fetched_at: "garbage".to_string(),
            ..meta
        };
        assert!(bad.age().is_none());
    }
}

//! Archive download with source fallback.
//!
//! # Architecture
//!
//! - [`ArchiveFetcher`]: one GET of one URL, reporting byte progress
//! - [`HttpFetcher`]: reqwest implementation streaming the body
//! - [`DownloadOrchestrator`]: tries sources strictly in order, each under its
//!   own timeout, and only gives up once every candidate failed

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::events::{CancelToken, DownloadEvent, DownloadProgress};
use super::types::{AddonError, AttemptFailure};
use crate::catalog::DownloadSource;

/// Default timeout of one download attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest archive accepted (256MB).
pub const MAX_ARCHIVE_SIZE: u64 = 256 * 1024 * 1024;

/// Failure of a single fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Server answered with a non-success status.
    #[error("HTTP {0}")]
    Status(u16),

    /// Connection or body transfer failed.
    #[error("{0}")]
    Transport(String),

    /// Body exceeded the size cap.
    #[error("Archive larger than {MAX_ARCHIVE_SIZE} bytes")]
    TooLarge,
}

/// Fetches the bytes behind a URL.
pub trait ArchiveFetcher: Send + Sync {
    /// Downloads `url`, calling `on_progress` as bytes arrive.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        on_progress: &'a mut (dyn FnMut(DownloadProgress) + Send),
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a;
}

/// HTTP fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Creates a fetcher with the addonctl user agent.
    ///
    /// No overall timeout is set; attempts are bounded by the orchestrator.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("addonctl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        on_progress: &'a mut (dyn FnMut(DownloadProgress) + Send),
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a {
        async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let total = response.content_length().filter(|&t| t > 0);
            if total.is_some_and(|t| t > MAX_ARCHIVE_SIZE) {
                return Err(FetchError::TooLarge);
            }

            let capacity = total.unwrap_or(0) as usize;
            let mut bytes = Vec::with_capacity(capacity);
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FetchError::Transport(e.to_string()))?;
                bytes.extend_from_slice(&chunk);

                let received = bytes.len() as u64;
                if received > MAX_ARCHIVE_SIZE {
                    return Err(FetchError::TooLarge);
                }

                on_progress(match total {
                    Some(total) => DownloadProgress::Bytes {
                        received,
                        total: total.max(received),
                    },
                    None => DownloadProgress::Indeterminate { received },
                });
            }

            Ok(bytes)
        }
    }
}

/// Tries download sources in order until one succeeds.
#[derive(Debug, Clone)]
pub struct DownloadOrchestrator<F> {
    fetcher: F,
    attempt_timeout: Duration,
}

impl<F: ArchiveFetcher> DownloadOrchestrator<F> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(fetcher: F, attempt_timeout: Duration) -> Self {
        assert!(!attempt_timeout.is_zero(), "Attempt timeout must be positive");
        Self {
            fetcher,
            attempt_timeout,
        }
    }

    /// Downloads the first source that yields a valid archive.
    ///
    /// Each failed attempt produces one `SourceFailed` event. When
    /// `expected_checksum` is set, a body with a different SHA-256 counts as
    /// a failed attempt. Cancellation aborts the running attempt.
    pub async fn download(
        &self,
        sources: &[DownloadSource],
        expected_checksum: Option<&str>,
        cancel: &CancelToken,
        mut on_event: impl FnMut(DownloadEvent) + Send,
    ) -> Result<Vec<u8>, AddonError> {
        let mut attempts: Vec<AttemptFailure> = Vec::with_capacity(sources.len());

        for source in sources {
            if cancel.is_cancelled() {
                return Err(AddonError::Cancelled);
            }

            info!("[DOWNLOAD] Trying {} source {}", source.kind, source.url);
            on_event(DownloadEvent::AttemptStarted {
                kind: source.kind,
                url: source.url.clone(),
            });

            let outcome = {
                let mut forward = |p: DownloadProgress| on_event(DownloadEvent::Progress(p));
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!("[DOWNLOAD] Cancelled during {}", source.url);
                        return Err(AddonError::Cancelled);
                    }
                    result = tokio::time::timeout(
                        self.attempt_timeout,
                        self.fetcher.fetch(&source.url, &mut forward),
                    ) => result,
                }
            };

            let reason = match outcome {
                Ok(Ok(bytes)) => match verify_checksum(&bytes, expected_checksum) {
                    Ok(()) => {
                        info!(
                            "[DOWNLOAD] Downloaded {} bytes from {}",
                            bytes.len(),
                            source.url
                        );
                        return Ok(bytes);
                    }
                    Err(reason) => reason,
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}s", self.attempt_timeout.as_secs()),
            };

            warn!("[DOWNLOAD] {} source {} failed: {}", source.kind, source.url, reason);
            on_event(DownloadEvent::SourceFailed {
                kind: source.kind,
                url: source.url.clone(),
                reason: reason.clone(),
            });
            attempts.push(AttemptFailure {
                kind: source.kind,
                url: source.url.clone(),
                reason,
            });
        }

        Err(AddonError::AllSourcesExhausted { attempts })
    }
}

/// Compares the SHA-256 of `bytes` with an expected hex digest.
///
/// A `sha256:` prefix and letter case are ignored. `None` or a blank
/// expectation always passes.
pub fn verify_checksum(bytes: &[u8], expected: Option<&str>) -> Result<(), String> {
    let Some(expected) = expected.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(());
    };
    let expected = expected
        .strip_prefix("sha256:")
        .unwrap_or(expected)
        .to_lowercase();

    let actual = format!("{:x}", Sha256::digest(bytes));
    if actual == expected {
        debug!("[DOWNLOAD] Checksum verified");
        Ok(())
    } else {
        Err(format!("checksum mismatch (expected {}, got {})", expected, actual))
    }
}

//! Progress events and cancellation.
//!
//! Each install reports an ordered stream of [`InstallEvent`]s over a tokio
//! channel. Receivers may `recv().await` or poll with `try_recv` from a
//! synchronous loop.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::catalog::DownloadSourceKind;

/// Byte progress of the current download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProgress {
    /// Content length known.
    Bytes {
        /// Bytes received so far.
        received: u64,
        /// Total expected bytes.
        total: u64,
    },
    /// Server did not announce a length.
    Indeterminate {
        /// Bytes received so far.
        received: u64,
    },
}

impl DownloadProgress {
    /// Returns the completed fraction in `0.0..=1.0`, if known.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        match *self {
            Self::Bytes { received, total } if total > 0 => {
                Some((received as f64 / total as f64).min(1.0))
            }
            Self::Bytes { .. } => Some(1.0),
            Self::Indeterminate { .. } => None,
        }
    }

    /// Returns the number of bytes received.
    #[must_use]
    pub fn received(&self) -> u64 {
        match *self {
            Self::Bytes { received, .. } | Self::Indeterminate { received } => received,
        }
    }
}

/// Low-level event emitted by the download orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// A source is about to be tried.
    AttemptStarted {
        /// Source kind.
        kind: DownloadSourceKind,
        /// Source URL.
        url: String,
    },
    /// Bytes arrived for the current attempt.
    Progress(DownloadProgress),
    /// The current attempt failed; the next source will be tried.
    SourceFailed {
        /// Source kind.
        kind: DownloadSourceKind,
        /// Source URL.
        url: String,
        /// Failure reason.
        reason: String,
    },
}

/// Phase of a single package install.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallStatus {
    /// Archive download in progress.
    Downloading(DownloadProgress),
    /// A source failed and the next is being tried.
    SourceFailed {
        /// Source kind.
        kind: DownloadSourceKind,
        /// Failure reason.
        reason: String,
    },
    /// Archive is being extracted.
    Extracting,
    /// Install finished and was recorded.
    Complete,
    /// Install failed.
    Failed(String),
}

impl InstallStatus {
    /// Returns true for `Complete` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// Event tagged with the slug it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallEvent {
    /// Package slug.
    pub slug: String,
    /// New status.
    pub status: InstallStatus,
}

/// Sending half of an install event stream.
///
/// A sink without a receiver drops events silently.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<InstallEvent>>,
}

impl EventSink {
    /// Creates a connected sink and its receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InstallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a sink that discards events.
    #[must_use]
    pub fn none() -> Self {
        Self { tx: None }
    }

    /// Emits an event for `slug`.
    pub fn emit(&self, slug: &str, status: InstallStatus) {
        if let Some(tx) = &self.tx {
            // Receiver gone: the caller stopped listening
            let _ = tx.send(InstallEvent {
                slug: slug.to_string(),
                status,
            });
        }
    }
}

/// Cooperative cancellation shared between a caller and running installs.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates an un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling: never resolves
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fraction() {
        let p = DownloadProgress::Bytes {
            received: 50,
            total: 200,
        };
        assert_eq!(p.fraction(), Some(0.25));
        assert_eq!(DownloadProgress::Indeterminate { received: 9 }.fraction(), None);
        assert_eq!(DownloadProgress::Indeterminate { received: 9 }.received(), 9);
    }

    #[test]
    fn test_sink_try_recv() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit("a", InstallStatus::Extracting);
        sink.emit("a", InstallStatus::Complete);

        assert_eq!(rx.try_recv().unwrap().status, InstallStatus::Extracting);
        let last = rx.try_recv().unwrap();
        assert!(last.status.is_terminal());
        assert!(rx.try_recv().is_err());

        EventSink::none().emit("a", InstallStatus::Complete);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let clone = token.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });

        assert!(!token.is_cancelled());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }
}

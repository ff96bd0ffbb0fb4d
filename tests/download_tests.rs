//! Integration tests for download source fallback over real HTTP.
//!
//! A local axum server plays the CDN and GitHub roles. These tests verify
//! that:
//! - A failing source is followed by the next one, with one failure event
//! - A hung source is abandoned after the attempt timeout
//! - Exhaustion reports every attempt in order
//! - Byte progress carries the announced content length

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use addonctl::addons::{
    AddonError, CancelToken, DownloadEvent, DownloadOrchestrator, DownloadProgress, HttpFetcher,
};
use addonctl::catalog::{DownloadSource, DownloadSourceKind};
use axum::Router;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::get;
use sha2::{Digest, Sha256};

const ARCHIVE: &[u8] = b"PK\x03\x04 pretend archive body";

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/missing.zip", get(|| async { StatusCode::NOT_FOUND }))
        .route("/broken.zip", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/good.zip", get(|| async { Bytes::from_static(ARCHIVE) }))
        .route(
            "/slow.zip",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Bytes::from_static(ARCHIVE)
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn source(addr: SocketAddr, kind: DownloadSourceKind, path: &str) -> DownloadSource {
    DownloadSource::new(kind, format!("http://{addr}{path}"))
}

fn orchestrator(timeout: Duration) -> DownloadOrchestrator<HttpFetcher> {
    DownloadOrchestrator::new(HttpFetcher::new(), timeout)
}

fn failures(events: &[DownloadEvent]) -> Vec<(DownloadSourceKind, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::SourceFailed { kind, reason, .. } => Some((*kind, reason.clone())),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn test_falls_back_after_not_found() {
    let addr = serve().await;
    let sources = [
        source(addr, DownloadSourceKind::Cdn, "/missing.zip"),
        source(addr, DownloadSourceKind::GithubArchive, "/good.zip"),
    ];

    let mut events = Vec::new();
    let bytes = orchestrator(Duration::from_secs(10))
        .download(&sources, None, &CancelToken::new(), |e| events.push(e))
        .await
        .unwrap();

    assert_eq!(bytes, ARCHIVE);
    let failed = failures(&events);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, DownloadSourceKind::Cdn);
    assert!(failed[0].1.contains("404"));
}

#[tokio::test]
async fn test_hung_source_times_out() {
    let addr = serve().await;
    let sources = [
        source(addr, DownloadSourceKind::Cdn, "/slow.zip"),
        source(addr, DownloadSourceKind::Direct, "/good.zip"),
    ];

    let mut events = Vec::new();
    let started = std::time::Instant::now();
    let bytes = orchestrator(Duration::from_millis(300))
        .download(&sources, None, &CancelToken::new(), |e| events.push(e))
        .await
        .unwrap();

    assert_eq!(bytes, ARCHIVE);
    assert!(started.elapsed() < Duration::from_secs(5));
    let failed = failures(&events);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].1.contains("timed out"));
}

#[tokio::test]
async fn test_exhaustion_lists_every_attempt() {
    let addr = serve().await;
    let sources = [
        source(addr, DownloadSourceKind::Cdn, "/missing.zip"),
        source(addr, DownloadSourceKind::GithubRelease, "/broken.zip"),
    ];

    let err = orchestrator(Duration::from_secs(10))
        .download(&sources, None, &CancelToken::new(), |_| {})
        .await
        .unwrap_err();

    let attempts = match err {
        AddonError::AllSourcesExhausted { attempts } => attempts,
        other => panic!("expected exhaustion, got {other:?}"),
    };
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].kind, DownloadSourceKind::Cdn);
    assert!(attempts[1].reason.contains("500"));
}

#[tokio::test]
async fn test_refused_connection_is_a_failed_attempt() {
    let addr = serve().await;
    let sources = [
        DownloadSource::new(DownloadSourceKind::Cdn, "http://127.0.0.1:9/refused.zip"),
        source(addr, DownloadSourceKind::Legacy, "/good.zip"),
    ];

    let mut events = Vec::new();
    let bytes = orchestrator(Duration::from_secs(10))
        .download(&sources, None, &CancelToken::new(), |e| events.push(e))
        .await
        .unwrap();

    assert_eq!(bytes, ARCHIVE);
    assert_eq!(failures(&events).len(), 1);
}

// ============================================================================
// Progress, checksum and cancellation
// ============================================================================

#[tokio::test]
async fn test_progress_reports_content_length() {
    let addr = serve().await;
    let sources = [source(addr, DownloadSourceKind::Cdn, "/good.zip")];

    let mut events = Vec::new();
    orchestrator(Duration::from_secs(10))
        .download(&sources, None, &CancelToken::new(), |e| events.push(e))
        .await
        .unwrap();

    let last = events
        .iter()
        .rev()
        .find_map(|e| match e {
            DownloadEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .unwrap();
    let len = ARCHIVE.len() as u64;
    assert_eq!(
        last,
        DownloadProgress::Bytes {
            received: len,
            total: len
        }
    );
    assert_eq!(last.fraction(), Some(1.0));
}

#[tokio::test]
async fn test_checksum_mismatch_exhausts_sources() {
    let addr = serve().await;
    let sources = [source(addr, DownloadSourceKind::Cdn, "/good.zip")];
    let wrong = format!("{:x}", Sha256::digest(b"something else"));

    let err = orchestrator(Duration::from_secs(10))
        .download(&sources, Some(&wrong), &CancelToken::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, AddonError::AllSourcesExhausted { .. }));

    let right = format!("sha256:{:x}", Sha256::digest(ARCHIVE));
    let bytes = orchestrator(Duration::from_secs(10))
        .download(&sources, Some(&right), &CancelToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(bytes, ARCHIVE);
}

#[tokio::test]
async fn test_cancel_aborts_running_attempt() {
    let addr = serve().await;
    let sources = [
        source(addr, DownloadSourceKind::Cdn, "/slow.zip"),
        source(addr, DownloadSourceKind::Direct, "/good.zip"),
    ];

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = orchestrator(Duration::from_secs(30))
        .download(&sources, None, &cancel, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, AddonError::Cancelled));
}

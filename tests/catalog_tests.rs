//! Integration tests for conditional catalog refresh.
//!
//! A local axum server answers with an ETag and honours `If-None-Match`.
//! These tests verify that:
//! - A stale cache is revalidated and a `304` reuses the cached body
//! - A forced refresh skips the conditional header
//! - Server errors without a cache surface as `CatalogError::Http`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use addonctl::catalog::{CatalogClient, CatalogError};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use helpers::fixtures::{EntrySpec, catalog_v2};
use tempfile::TempDir;

const ETAG: &str = "\"index-v1\"";

#[derive(Default)]
struct Hits {
    full: AtomicUsize,
    not_modified: AtomicUsize,
}

async fn index(State(hits): State<Arc<Hits>>, headers: HeaderMap) -> Response {
    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == ETAG);
    if matches {
        hits.not_modified.fetch_add(1, Ordering::SeqCst);
        return StatusCode::NOT_MODIFIED.into_response();
    }

    hits.full.fetch_add(1, Ordering::SeqCst);
    let body = catalog_v2(&[
        EntrySpec::new("lib-x", "LibX"),
        EntrySpec {
            deps: &["lib-x"],
            ..EntrySpec::new("addon-a", "AddonA")
        },
    ]);
    ([(header::ETAG, ETAG)], body).into_response()
}

async fn serve() -> (SocketAddr, Arc<Hits>) {
    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/index.json", get(index))
        .route("/down.json", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

// ============================================================================
// Conditional refresh
// ============================================================================

#[tokio::test]
async fn test_stale_cache_is_revalidated_with_etag() {
    let (addr, hits) = serve().await;
    let cache = TempDir::new().unwrap();
    let client = CatalogClient::new(
        &format!("http://{addr}/index.json"),
        cache.path().to_path_buf(),
        Duration::ZERO,
    );

    let first = client.fetch_catalog(false).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(cache.path().join("catalog.json").is_file());

    let second = client.fetch_catalog(false).await.unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.lookup("addon-a").is_some());

    assert_eq!(hits.full.load(Ordering::SeqCst), 1);
    assert_eq!(hits.not_modified.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fresh_cache_makes_no_request() {
    let (addr, hits) = serve().await;
    let cache = TempDir::new().unwrap();
    let client = CatalogClient::new(
        &format!("http://{addr}/index.json"),
        cache.path().to_path_buf(),
        Duration::from_secs(3600),
    );

    client.fetch_catalog(false).await.unwrap();
    client.fetch_catalog(false).await.unwrap();

    assert_eq!(hits.full.load(Ordering::SeqCst), 1);
    assert_eq!(hits.not_modified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_forced_refresh_downloads_again() {
    let (addr, hits) = serve().await;
    let cache = TempDir::new().unwrap();
    let client = CatalogClient::new(
        &format!("http://{addr}/index.json"),
        cache.path().to_path_buf(),
        Duration::from_secs(3600),
    );

    client.fetch_catalog(false).await.unwrap();
    client.fetch_catalog(true).await.unwrap();

    assert_eq!(hits.full.load(Ordering::SeqCst), 2);
    assert_eq!(hits.not_modified.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_server_error_without_cache() {
    let (addr, _hits) = serve().await;
    let cache = TempDir::new().unwrap();
    let client = CatalogClient::new(
        &format!("http://{addr}/down.json"),
        cache.path().to_path_buf(),
        Duration::ZERO,
    );

    let err = client.fetch_catalog(false).await.unwrap_err();
    assert!(matches!(err, CatalogError::Http(500)));
}

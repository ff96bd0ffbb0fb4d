//! Zip archives, catalogs and a scripted fetcher for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::future::Future;
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::time::Duration;

use addonctl::addons::{ArchiveFetcher, DownloadProgress, FetchError};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Builds a zip from `(path, contents)` pairs. Paths ending in `/` are directories.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (path, contents) in entries {
        if path.ends_with('/') {
            writer.add_directory(*path, options).unwrap();
        } else {
            writer.start_file(*path, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Builds a zip holding one symlink entry next to a valid addon.
pub fn zip_with_symlink(folder: &str, link: &str, target: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer
        .start_file(format!("{folder}/{folder}.txt"), options)
        .unwrap();
    writer.write_all(manifest(folder, &[]).as_bytes()).unwrap();
    writer.add_symlink(link, target, options).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Manifest text for an addon titled `title`.
pub fn manifest(title: &str, depends_on: &[&str]) -> String {
    let mut text = format!("## Title: {title}\n## APIVersion: 101042\n## Version: 1.0\n");
    if !depends_on.is_empty() {
        text.push_str(&format!("## DependsOn: {}\n", depends_on.join(" ")));
    }
    text.push_str("\nmain.lua\n");
    text
}

/// A GitHub-style archive: `<Folder>-main/<Folder>.txt` plus a source file.
pub fn addon_zip(folder: &str) -> Vec<u8> {
    let root = format!("{folder}-main/");
    let manifest_path = format!("{folder}-main/{folder}.txt");
    let lua_path = format!("{folder}-main/main.lua");
    let text = manifest(folder, &[]);
    zip_bytes(&[
        (root.as_str(), ""),
        (manifest_path.as_str(), text.as_str()),
        (lua_path.as_str(), "-- lua"),
    ])
}

/// One catalog entry in the v2 wire shape.
pub struct EntrySpec<'a> {
    pub slug: &'a str,
    pub folder: &'a str,
    pub version: &'a str,
    pub sort_key: Option<i64>,
    pub deps: &'a [&'a str],
    pub urls: &'a [&'a str],
}

impl<'a> EntrySpec<'a> {
    pub fn new(slug: &'a str, folder: &'a str) -> Self {
        Self {
            slug,
            folder,
            version: "1.0.0",
            sort_key: None,
            deps: &[],
            urls: &[],
        }
    }
}

/// Renders a v2 catalog document.
pub fn catalog_v2(entries: &[EntrySpec<'_>]) -> String {
    let addons: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            let urls: Vec<String> = if e.urls.is_empty() {
                vec![format!("https://cdn.test/{}.zip", e.slug)]
            } else {
                e.urls.iter().map(|u| (*u).to_string()).collect()
            };
            serde_json::json!({
                "slug": e.slug,
                "name": e.folder,
                "category": "library",
                "source": { "type": "github", "repo": format!("test/{}", e.folder), "branch": "main" },
                "compatibility": { "required_dependencies": e.deps },
                "install": { "method": "release", "target_folder": e.folder },
                "version_info": { "version_sort_key": e.sort_key },
                "latest_release": { "version": e.version },
                "download_sources": urls
                    .iter()
                    .map(|u| serde_json::json!({ "type": "cdn", "url": u }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({ "format_version": 2, "addons": addons }).to_string()
}

/// Serves scripted bodies per URL and records the order of requests.
#[derive(Default)]
pub struct ScriptedFetcher {
    bodies: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArchiveFetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        on_progress: &'a mut (dyn FnMut(DownloadProgress) + Send),
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a {
        async move {
            self.calls.lock().unwrap().push(url.to_string());
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            match self.bodies.get(url) {
                Some(body) => {
                    on_progress(DownloadProgress::Bytes {
                        received: body.len() as u64,
                        total: body.len() as u64,
                    });
                    Ok(body.clone())
                }
                None => Err(FetchError::Status(404)),
            }
        }
    }
}

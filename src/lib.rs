//! addonctl
//!
//! Dependency-aware addon installer for The Elder Scrolls Online.
//!
//! # Architecture
//!
//! - **Catalog Module**: Community index fetch, cache and format translation
//! - **Addons Module**: Resolution, download fallback, safe extraction and
//!   install records
//! - **Config Module**: `~/.addonrc` settings and filesystem locations
//! - **Logging Module**: File logging with retention
//!
//! # Usage
//!
//! ```no_run
//! use addonctl::addons::{AddonManager, MemoryRecordStore};
//! use addonctl::catalog::parse_catalog;
//!
//! let snapshot = parse_catalog(r#"{"format_version": 2, "addons": []}"#, None)
//!     .expect("valid catalog");
//! let manager = AddonManager::new(
//!     Box::new(MemoryRecordStore::new()),
//!     None,
//!     std::time::Duration::from_secs(60),
//! );
//! manager.set_catalog(snapshot);
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::unnested_or_patterns)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod addons;
pub mod catalog;
pub mod config;
pub mod logging;

// Re-export main types
pub use addons::{AddonError, AddonManager};
pub use catalog::{CatalogClient, CatalogSnapshot};
pub use config::Config;

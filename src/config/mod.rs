//! Configuration module for addonctl.
//!
//! Handles loading and parsing the `~/.addonrc` configuration file.

pub mod paths;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::addons::DEFAULT_ATTEMPT_TIMEOUT;
use crate::catalog::DEFAULT_INDEX_URL;
use crate::logging::LogConfig;

/// Default catalog cache lifetime in minutes.
pub const DEFAULT_CATALOG_TTL_MINUTES: u64 = 60;

/// Default .addonrc file content with all settings documented.
const DEFAULT_ADDONRC: &str = r#"# addonctl Configuration File
# ============================
# Lines starting with '#' are comments.
#
# Add-on Directory
# ----------------
# Path of the game's AddOns folder. When unset the usual Steam, Lutris and
# Documents locations are searched.
# addon_directory = /path/to/Elder Scrolls Online/live/AddOns

# Catalog
# -------
# index_url = https://xop.co/eso-addon-index/
# catalog_ttl_minutes = 60          # Minutes before the cached catalog is refreshed

# Downloads
# ---------
# download_timeout_secs = 120       # Per-source attempt timeout

# Updates
# -------
# check_updates_on_startup = false  # Print available updates before each command

# Logging Configuration
# ---------------------
# Logs are stored in ~/.addonctl/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 72       # Hours to keep log files
"#;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to config file.
    pub config_path: PathBuf,
    /// Configured addon root, if any.
    pub addon_directory: Option<PathBuf>,
    /// Catalog index URL.
    pub index_url: String,
    /// Catalog cache lifetime in minutes.
    pub catalog_ttl_minutes: u64,
    /// Per-source download timeout in seconds.
    pub download_timeout_secs: u64,
    /// Report updates before running a command.
    pub check_updates_on_startup: bool,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            addon_directory: None,
            index_url: DEFAULT_INDEX_URL.to_string(),
            catalog_ttl_minutes: DEFAULT_CATALOG_TTL_MINUTES,
            download_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT.as_secs(),
            check_updates_on_startup: false,
            log_config: LogConfig::default(),
        }
    }
}

impl Config {
    /// Returns the default config file path (`~/.addonrc`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".addonrc")
    }

    /// Loads configuration from the default path, creating it if it doesn't exist.
    pub fn load() -> io::Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Loads configuration from a specific path, creating it if it doesn't exist.
    pub fn load_from(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            fs::write(path, DEFAULT_ADDONRC)?;
        }

        let content = fs::read_to_string(path)?;
        Ok(Self::parse(path, &content))
    }

    /// Parses config content read from `path`.
    #[must_use]
    pub fn parse(path: &Path, content: &str) -> Self {
        let mut config = Self {
            config_path: path.to_path_buf(),
            ..Self::default()
        };

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                // Remove inline comments
                let value = value.split('#').next().unwrap_or(value).trim();
                config.apply_setting(key, value);
            }
        }

        config
    }

    /// Applies a single setting. Unknown keys and malformed values are ignored.
    fn apply_setting(&mut self, key: &str, value: &str) {
        match key {
            "addon_directory" | "addon_dir" => {
                self.addon_directory = (!value.is_empty()).then(|| expand_home(value));
            }
            "index_url" => {
                if !value.is_empty() {
                    self.index_url = value.to_string();
                }
            }
            "catalog_ttl_minutes" => {
                if let Ok(minutes) = value.parse() {
                    self.catalog_ttl_minutes = minutes;
                }
            }
            "download_timeout_secs" => {
                if let Ok(secs) = value.parse::<u64>() {
                    if secs > 0 {
                        self.download_timeout_secs = secs;
                    }
                }
            }
            "check_updates_on_startup" => {
                self.check_updates_on_startup = parse_bool(value);
            }
            "log_level" => {
                self.log_config.level = LogConfig::parse_level(value);
            }
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value);
            }
            "log_enabled" | "logging" => {
                self.log_config.enabled = parse_bool(value);
            }
            _ => {
                tracing::debug!("Ignoring unknown setting '{}'", key);
            }
        }
    }

    /// Returns the catalog cache lifetime.
    #[must_use]
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_minutes * 60)
    }

    /// Returns the per-source download timeout.
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Saves a single setting to the config file.
    pub fn save_setting(&self, key: &str, value: &str) -> io::Result<()> {
        save_setting(&self.config_path, key, value)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

/// Writes `key = value` into the file at `path`.
///
/// An existing uncommented line for `key` is replaced in place; otherwise
/// the setting is appended.
pub fn save_setting(path: &Path, key: &str, value: &str) -> io::Result<()> {
    assert!(!key.is_empty(), "Setting key cannot be empty");

    let content = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };

    fs::write(path, update_or_append_setting(&content, key, value))
}

fn update_or_append_setting(content: &str, key: &str, value: &str) -> String {
    let setting_line = format!("{} = {}", key, value);
    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    let existing = lines.iter().position(|line| {
        let trimmed = line.trim();
        !trimmed.starts_with('#')
            && trimmed
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key)
    });

    match existing {
        Some(index) => lines[index] = setting_line,
        None => lines.push(setting_line),
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

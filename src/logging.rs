//! File logging for addonctl.
//!
//! Logs are written to `~/.addonctl/logs/addonctl_<timestamp>.log` through a
//! non-blocking writer. Files older than the retention window are removed
//! on start-up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::paths;

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 72;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const LEVEL_ALIASES: &[(&[&str], &str)] = &[
    (&["trace"], "trace"),
    (&["debug"], "debug"),
    (&["info"], "info"),
    (&["warn", "warning"], "warn"),
    (&["error"], "error"),
    (&["off", "none", "disabled"], "off"),
];

const NOISY_TARGETS: [&str; 4] = ["hyper", "hyper_util", "reqwest", "rustls"];

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Whether logging is enabled.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Parses a log level, falling back to the default.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        let wanted = value.trim().to_ascii_lowercase();
        LEVEL_ALIASES
            .iter()
            .find(|(aliases, _)| aliases.contains(&wanted.as_str()))
            .map_or(DEFAULT_LOG_LEVEL, |&(_, level)| level)
            .to_string()
    }

    /// Builds the filter directives for this level.
    ///
    /// HTTP client crates are capped at `warn` so archive downloads do not
    /// flood the log at `debug` and `trace`.
    #[must_use]
    pub fn directives(&self) -> String {
        let mut out = self.level.clone();
        for target in NOISY_TARGETS {
            out.push_str(&format!(",{target}=warn"));
        }
        out
    }

    /// Parses retention hours, falling back to the default.
    #[must_use]
    pub fn parse_retention(value: &str) -> u32 {
        value.parse().unwrap_or(DEFAULT_LOG_RETENTION_HOURS)
    }
}

/// Returns the log directory (`~/.addonctl/logs/`).
#[must_use]
pub fn log_directory() -> PathBuf {
    paths::data_directory().join("logs")
}

fn log_file_name() -> String {
    format!(
        "addonctl_{}.log",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Removes `.log` files in `dir` older than `retention_hours`.
pub fn cleanup_old_logs(dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if expired && fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }

    Ok(deleted)
}

/// Initializes file logging.
///
/// Returns `None` when logging is disabled. The returned guard flushes the
/// writer on drop and must be held for the life of the program.
pub fn init(config: &LogConfig) -> io::Result<Option<WorkerGuard>> {
    if !config.enabled || config.level == "off" {
        return Ok(None);
    }

    let log_dir = log_directory();
    fs::create_dir_all(&log_dir)?;
    let deleted = cleanup_old_logs(&log_dir, config.retention_hours)?;

    let file_name = log_file_name();
    let appender = tracing_appender::rolling::never(&log_dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // ADDONCTL_LOG overrides the configured level entirely
    let filter = EnvFilter::try_from_env("ADDONCTL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(
        "addonctl {} logging initialized",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        "Writing {} (level {}, keeping {}h)",
        log_dir.join(&file_name).display(),
        config.level,
        config.retention_hours
    );
    if deleted > 0 {
        tracing::debug!("Removed {} expired log file(s)", deleted);
    }

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_level_aliases() {
        for (input, expected) in [
            (" DEBUG ", "debug"),
            ("warning", "warn"),
            ("disabled", "off"),
            ("verbose", DEFAULT_LOG_LEVEL),
        ] {
            assert_eq!(LogConfig::parse_level(input), expected, "{input:?}");
        }
    }

    #[test]
    fn test_directives_quiet_http_stack() {
        let config = LogConfig {
            level: "trace".to_string(),
            ..LogConfig::default()
        };
        let directives = config.directives();
        assert!(directives.starts_with("trace,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn test_retention_falls_back() {
        assert_eq!(LogConfig::parse_retention("24"), 24);
        assert_eq!(LogConfig::parse_retention("-1"), DEFAULT_LOG_RETENTION_HOURS);
    }

    #[test]
    fn test_cleanup_keeps_fresh_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("addonctl_now.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 1).unwrap(), 0);
        assert!(dir.path().join("addonctl_now.log").exists());
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(cleanup_old_logs(&dir.path().join("nope"), 1).unwrap(), 0);
    }

    #[test]
    fn test_log_directory() {
        let dir = log_directory();
        assert!(dir.ends_with(".addonctl/logs"));
    }

    #[test]
    fn test_disabled_init_is_noop() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init(&config).unwrap().is_none());
    }
}

//! # Logging Setup
//!
//! One call per binary installs the global `tracing` subscriber:
//!
//! - a console layer on stdout with targets and ANSI colours;
//! - a JSON layer written through a non-blocking appender to
//!   `<log_dir>/<app>_<YYYY-MM-DD_HH-MM-SS>.log`.
//!
//! `RUST_LOG`, when set, overrides the configured level. Before the new file is
//! opened, older files of the same app are removed except the most recent one.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Faults raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory could not be created or scanned.
    #[error("log directory error: {0}")]
    Io(#[from] std::io::Error),
    /// The level string is not a valid filter directive.
    #[error("invalid log level '{level}': {reason}")]
    Filter {
        /// Rejected directive.
        level: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber was already installed.
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// # Setup Logging
///
/// Installs the subscriber. The returned guard flushes the file writer when
/// dropped and must be held for the lifetime of `main`.
pub fn setup_logging(app_name: &str, log_dir: &Path, level: &str) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir)?;
    cleanup_old_logs(log_dir, app_name)?;

    let file_name = format!("{app_name}_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let file_appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggingError::Filter {
            level: level.to_string(),
            reason: e.to_string(),
        })?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    info!(app = app_name, file = %log_dir.join(&file_name).display(), "logging initialized");
    Ok(guard)
}

/// # Cleanup Old Logs
///
/// Deletes `<app_name>_*.log` files in `log_dir`, keeping the newest one.
/// Returns how many files were removed. Files that cannot be removed are
/// reported on stderr and skipped, since no subscriber exists yet.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<usize, LoggingError> {
    let prefix = format!("{app_name}_");
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .filter(|e| {
            let path = e.path();
            let is_log = path.extension().is_some_and(|ext| ext == "log");
            let ours = e.file_name().to_string_lossy().starts_with(&prefix);
            is_log && ours
        })
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .collect();

    // Newest first; ties broken by name, which embeds the start time.
    entries.sort_by(|a, b| Reverse((&a.0, &a.1)).cmp(&Reverse((&b.0, &b.1))));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {e}", path.display()),
        }
    }
    Ok(removed)
}

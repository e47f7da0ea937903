//! File-based logging with automatic cleanup.
//!
//! Lifecycle operations log through `tracing`; log files land in
//! ~/.addonhost/logs/ and are pruned by age on startup.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Whether logging is enabled.
    pub enabled: bool,
    /// Mirror log lines to stderr as well as the log file.
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
            stderr: false,
        }
    }
}

impl LogConfig {
    /// Parses log level from string.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Returns the log directory path (~/.addonhost/logs/).
#[must_use]
pub fn log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".addonhost")
        .join("logs")
}

/// Returns the current log file path.
#[must_use]
pub fn current_log_path() -> PathBuf {
    let now = chrono::Local::now();
    let filename = format!("addonhost_{}.log", now.format("%Y-%m-%d_%H-%M-%S"));
    log_directory().join(filename)
}

/// Cleans up log files older than the specified retention period.
///
/// # Errors
/// Returns error if directory cannot be read.
pub fn cleanup_old_logs(retention_hours: u32) -> io::Result<u32> {
    let log_dir = log_directory();

    if !log_dir.exists() {
        return Ok(0);
    }

    let retention_duration = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted_count = 0;

    for entry in fs::read_dir(&log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = now.duration_since(modified) {
                    if age > retention_duration && fs::remove_file(&path).is_ok() {
                        deleted_count += 1;
                    }
                }
            }
        }
    }

    Ok(deleted_count)
}

/// Initializes the logging system.
///
/// Sets up file-based logging with the specified configuration and
/// prunes old log files.
///
/// # Errors
/// Returns error if logging cannot be initialized.
pub fn init(config: &LogConfig) -> io::Result<()> {
    if !config.enabled || config.level == "off" {
        return Ok(());
    }

    let log_dir = log_directory();
    fs::create_dir_all(&log_dir)?;

    let deleted = cleanup_old_logs(config.retention_hours)?;

    let log_path = current_log_path();
    let log_file = File::create(&log_path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(log_file.with_max_level(tracing::Level::TRACE))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!("addonhost logging initialized");
    tracing::info!("Log file: {}", log_path.display());
    tracing::info!("Log level: {}", config.level);
    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(())
}

//! Tracing setup: console output at the configured level plus a daily log file.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::ConfigError;

/// Prefix of the daily log files (`ai_secretary.YYYY-MM-DD.log`).
pub const LOG_FILE_PREFIX: &str = "ai_secretary";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Console level, accepts both tracing (`warn`) and Python-style (`WARNING`) names.
    pub level: String,
    /// Directory for the daily rolling files.
    pub dir: PathBuf,
}

/// Map a level name onto a tracing filter directive.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "info",
    }
}

/// Install the global subscriber.
///
/// The console honours `RUST_LOG` when set and falls back to the configured
/// level; the file always records DEBUG and above. Keep the returned guard
/// alive for the process lifetime or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard, ConfigError> {
    std::fs::create_dir_all(&config.dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(&config.dir)
        .map_err(|e| ConfigError::InvalidValue {
            key: "LOG_DIR".to_string(),
            message: e.to_string(),
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.level)));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug")),
        )
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            key: "LOG_LEVEL".to_string(),
            message: format!("failed to install tracing subscriber: {e}"),
        })?;

    Ok(guard)
}

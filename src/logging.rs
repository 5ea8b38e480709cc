use crate::config::LogConfig;
use crate::error::AppError;
use axum::http::StatusCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keeps the file writer flushing; drop it only at shutdown.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber: JSON to stdout, plus one JSON file per day
/// under `dir` when configured, keeping at most `retention_days` files.
pub fn init_tracing(config: &LogConfig) -> Result<LogGuard, AppError> {
    let Some(level) = config.level.as_deref() else {
        return Ok(LogGuard { _file: None });
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},qwen2api={level}")));

    let (file_layer, guard) = match config.dir.as_ref() {
        Some(dir) => {
            let appender = daily_appender(dir, config.retention_days)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(file_layer)
        .try_init()
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "logging_init_failed",
                err.to_string(),
            )
        })?;
    Ok(LogGuard { _file: guard })
}

/// Files are named `<YYYY-MM-DD>.log`.
pub fn daily_appender(
    dir: &std::path::Path,
    retention_days: usize,
) -> Result<RollingFileAppender, AppError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_suffix("log")
        .max_log_files(retention_days.max(1))
        .build(dir)
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "log_dir_init_failed",
                err.to_string(),
            )
        })
}

//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Pick the filter from `RUST_LOG`, falling back to the configured level
//! - Format stdout as human-readable text or JSON lines
//! - Mirror every event into a daily-rotated log file when one is configured
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - The file is written from a background thread; the returned guard flushes it
//! - A second initialization is a no-op, so tests can call it freely

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

const DEFAULT_FILE_NAME: &str = "edge-proxy.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log directory {}: {source}", .dir.display())]
    File {
        dir: PathBuf,
        #[source]
        source: InitError,
    },
}

/// Keeps the file writer alive. Events logged after it drops are lost.
#[derive(Debug)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Default filter for a configured level.
pub fn default_filter(level: &str) -> String {
    format!("edge_proxy={level},tower_http={level}", level = level)
}

/// Daily appender for `path`: files are named `<file name>.<date>` in its directory.
pub fn file_appender(path: &Path, max_files: usize) -> Result<RollingFileAppender, LoggingError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|source| LoggingError::File {
            dir: dir.to_path_buf(),
            source,
        })
}

pub fn init(config: &ObservabilityConfig) -> Result<LogGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let (file_layer, file_guard) = match &config.log_file {
        Some(path) => {
            let appender = file_appender(Path::new(path), config.log_max_files)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let result = match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(LogGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn filter_covers_crate_and_tower_http() {
        assert_eq!(default_filter("debug"), "edge_proxy=debug,tower_http=debug");
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = ObservabilityConfig {
            log_file: None,
            ..ObservabilityConfig::default()
        };
        init(&config).unwrap();
        init(&config).unwrap();
    }

    #[test]
    fn file_appender_writes_dated_files_in_the_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("system.log");

        let mut appender = file_appender(&path, 7).unwrap();
        appender.write_all(b"reset applied\n").unwrap();
        appender.flush().unwrap();

        let written: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(written.len(), 1);
        let name = written[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("system.log."), "unexpected file {name}");
        assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), "reset applied\n");
    }
}

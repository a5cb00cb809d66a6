//! Logging utilities for Strix
//!
//! Initialises a `tracing` subscriber for embedders that do not install
//! their own. Every pipeline stage runs on a named thread
//! (`strix-l34-emitter`, `strix-l7-worker-3`, ...), so thread names are
//! enabled to attribute each log line to its stage.

use crate::config::LoggingConfig;
use std::path::Path;
use tracing::Level;

/// Initialise logging from the crate's logging configuration.
///
/// Unrecognised level strings fall back to `info`.
pub fn init_from_config(config: &LoggingConfig) {
    let level = config.log_level.parse().unwrap_or(Level::INFO);
    init_logging(level, config.log_file.as_deref());
}

/// Initialise the logging system.
///
/// With a log file the subscriber appends there (without ANSI colour);
/// otherwise it writes to stderr. Does nothing if a global subscriber is
/// already installed.
pub fn init_logging(log_level: Level, log_file: Option<&str>) {
    let file = log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(path))
            .map_err(|e| eprintln!("Failed to open log file {}: {}", path, e))
            .ok()
    });

    let result = match file {
        Some(file) => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_max_level(log_level)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .finish(),
        ),
        None => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_max_level(log_level)
                .with_thread_names(true)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish(),
        ),
    };

    if result.is_err() {
        tracing::debug!("global subscriber already set, keeping it");
    }
}

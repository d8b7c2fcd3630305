//! Tracing setup
//!
//! Logs go to stderr and, when it can be opened, to an append-only file in
//! the data directory. stdin carries key chords and stdout carries console
//! narration, so the file is the durable record.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Name of the log file inside the data directory
pub const LOG_FILE_NAME: &str = "vision-assist.log";

/// Install the global subscriber. Returns the log file path, or `None` when
/// only stderr logging could be set up.
pub fn init(data_dir: &Path) -> Option<PathBuf> {
    let path = data_dir.join(LOG_FILE_NAME);
    let (file_layer, file_error) = match open_log_file(&path) {
        Ok(file) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    match file_error {
        None => {
            info!(path = %path.display(), "logging to file");
            Some(path)
        }
        Some(e) => {
            warn!(error = %e, "file logging disabled");
            None
        }
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

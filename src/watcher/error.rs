use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the file watcher or its backend.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The OS notification primitive failed.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// Path resolution failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A watched file must live inside a directory.
    #[error("path has no parent directory: {}", .0.display())]
    NoParent(PathBuf),

    /// Backend-specific failure.
    #[error("watch backend error: {0}")]
    Backend(String),
}

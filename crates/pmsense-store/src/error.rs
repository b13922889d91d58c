//! Error types for pmsense-store.

use std::path::PathBuf;

/// Result type for pmsense-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pmsense-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timestamp formatting error.
    #[error("Timestamp format error: {0}")]
    Format(#[from] time::error::Format),
}

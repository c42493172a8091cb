//! Error types shared by the screener crates.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for configuration and filesystem work.
#[derive(Error, Debug)]
pub enum Error {
    /// Directory could not be created or is not writable
    #[error("Directory not writable: {}", .path.display())]
    DirectoryNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

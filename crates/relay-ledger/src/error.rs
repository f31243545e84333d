//! Persistence error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for ledger and prefix map persistence.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// IO error while writing or removing an artifact
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The artifact path has no parent directory or file name
    #[error("Invalid artifact path: {0}")]
    InvalidPath(PathBuf),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using LedgerError.
pub type LedgerResult<T> = Result<T, LedgerError>;

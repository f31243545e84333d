//! Error types for distribution runs.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a distribution run.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The license gate refused the run; nothing was sent.
    #[error("License denied: {0}")]
    LicenseDenied(String),

    /// The reply destination could not be resolved.
    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// Connecting, subscribing or another run-fatal transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] relay_transport::TransportError),

    /// Persistence failure that cannot be degraded.
    #[error("Ledger error: {0}")]
    Ledger(#[from] relay_ledger::LedgerError),

    /// The item source could not be read.
    #[error("Cannot read items from {path}: {source}")]
    ItemSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request itself is unusable (no channels, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

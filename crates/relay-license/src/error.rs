//! Error types for the license client.

use thiserror::Error;

/// Errors talking to the license server.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Network or transport-level HTTP error (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("License server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// The health check failed.
    #[error("License server unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid server URL or client setup.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using LicenseError.
pub type LicenseResult<T> = Result<T, LicenseError>;

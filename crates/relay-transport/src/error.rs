//! Transport error types.

use std::path::PathBuf;

use thiserror::Error;

/// MTProto error names meaning the peer does not exist or is not visible.
const PEER_NOT_FOUND: [&str; 5] = [
    "USERNAME_INVALID",
    "USERNAME_NOT_OCCUPIED",
    "CHANNEL_INVALID",
    "CHANNEL_PRIVATE",
    "PEER_ID_INVALID",
];

/// Errors raised by a messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network or transport-level HTTP error. Never carries the request URL.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The messaging API rejected a call.
    #[error("{method} failed ({code}): {description}")]
    Api {
        method: String,
        code: i64,
        description: String,
    },

    /// An MTProto request failed.
    #[error("{method} failed: {message}")]
    Mtproto {
        method: &'static str,
        message: String,
    },

    /// The user session exists but has not been logged in.
    #[error("telegram session is not authorized (run `card-relay login`)")]
    NotAuthorized,

    /// The session file could not be read or written.
    #[error("session file {}: {source}", path.display())]
    Session {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A call was made before `connect` or after `disconnect`.
    #[error("transport is not connected")]
    NotConnected,

    /// The remote side is unavailable or refused the operation.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid credentials or endpoint configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether the error means the target chat does not exist or is not visible.
    pub fn is_chat_not_found(&self) -> bool {
        match self {
            Self::Api { description, .. } => {
                description.to_ascii_lowercase().contains("chat not found")
            }
            Self::Mtproto { message, .. } => PEER_NOT_FOUND.iter().any(|name| message.contains(name)),
            _ => false,
        }
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_not_found_covers_both_apis() {
        let bot = TransportError::Api {
            method: "getChat".to_string(),
            code: 400,
            description: "Bad Request: chat not found".to_string(),
        };
        let user = TransportError::Mtproto {
            method: "resolve_username",
            message: "rpc error 400: USERNAME_NOT_OCCUPIED".to_string(),
        };
        let flood = TransportError::Mtproto {
            method: "send_message",
            message: "rpc error 420: FLOOD_WAIT (value: 30)".to_string(),
        };

        assert!(bot.is_chat_not_found());
        assert!(user.is_chat_not_found());
        assert!(!flood.is_chat_not_found());
        assert!(!TransportError::NotConnected.is_chat_not_found());
    }
}

//! Configuration and path errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why the relay's configuration or state directory is unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting a command needs is not configured. The message names the
    /// command that sets it.
    #[error("{0}")]
    Missing(String),

    /// A setting has a value the relay cannot use.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid URL in {field}: {source}")]
    Url {
        field: &'static str,
        source: url::ParseError,
    },

    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("cannot write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("{} is not valid config JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not determine the home directory")]
    NoHomeDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_name_the_file() {
        let err = ConfigError::Read {
            path: PathBuf::from("/tmp/relay/config.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /tmp/relay/config.json: denied");
    }

    #[test]
    fn invalid_names_the_field() {
        let err = ConfigError::Invalid {
            field: "api_id",
            reason: "must be positive".to_string(),
        };
        assert_eq!(err.to_string(), "invalid api_id: must be positive");
    }
}

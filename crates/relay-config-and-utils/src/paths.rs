//! File system paths for card-relay.

use crate::{ConfigError, ConfigResult};
use std::path::PathBuf;

/// Directory name under the user's home.
const BASE_DIR_NAME: &str = ".card-relay";
/// Per-channel sent-history ledger.
const LEDGER_FILE_NAME: &str = "send_state.json";
/// Per-channel outgoing label map.
const PREFIX_FILE_NAME: &str = "prefix_state.json";
/// Default item source, one item per line.
const CARDS_FILE_NAME: &str = "cards.txt";
/// MTProto user session (auth key and cached peers).
const SESSION_FILE_NAME: &str = "my_account.session";

/// Manages file system paths.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for all state (~/.card-relay)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.card-relay`.
    pub fn new() -> ConfigResult<Self> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.card-relay).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.card-relay/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the ledger file path (~/.card-relay/send_state.json).
    pub fn ledger_file(&self) -> PathBuf {
        self.base_dir.join(LEDGER_FILE_NAME)
    }

    /// Get the prefix map file path (~/.card-relay/prefix_state.json).
    pub fn prefix_file(&self) -> PathBuf {
        self.base_dir.join(PREFIX_FILE_NAME)
    }

    /// Get the default item source (~/.card-relay/cards.txt).
    pub fn cards_file(&self) -> PathBuf {
        self.base_dir.join(CARDS_FILE_NAME)
    }

    /// Get the user session file (~/.card-relay/my_account.session).
    pub fn session_file(&self) -> PathBuf {
        self.base_dir.join(SESSION_FILE_NAME)
    }

    /// Get the logs directory (~/.card-relay/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.card-relay/logs/relay.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("relay.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        for dir in [self.base_dir.clone(), self.logs_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| ConfigError::Write { path: dir, source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-card-relay");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.ledger_file(), base.join("send_state.json"));
        assert_eq!(paths.prefix_file(), base.join("prefix_state.json"));
        assert_eq!(paths.cards_file(), base.join("cards.txt"));
        assert_eq!(paths.session_file(), base.join("my_account.session"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.log_file(), base.join("logs/relay.jsonl"));
    }

    #[test]
    fn test_paths_default() {
        let paths = Paths::new().unwrap();
        let home = dirs::home_dir().unwrap();

        assert_eq!(paths.base_dir(), &home.join(".card-relay"));
    }

    #[test]
    fn test_ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("card-relay");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());

        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.logs_dir().exists());
    }
}

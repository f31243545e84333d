use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::atomic::atomic_write_text;
use crate::LedgerResult;

/// Durable map channel key -> label prepended to outgoing items.
#[derive(Debug, Clone)]
pub struct PrefixMap {
    path: PathBuf,
    labels: BTreeMap<String, String>,
}

impl PrefixMap {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Load the prefix map at `path`; missing or corrupt files yield an empty map.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::empty(path),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "prefix map unreadable, starting empty");
                return Self::empty(path);
            }
        };

        match serde_json::from_str(&raw) {
            Ok(labels) => Self { path, labels },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "prefix map corrupt, starting empty");
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Label for `channel`, empty when none is configured.
    pub fn get(&self, channel: &str) -> &str {
        self.labels.get(channel).map(String::as_str).unwrap_or("")
    }

    /// Set the label for `channel`, returning the previous one.
    pub fn set(&mut self, channel: &str, label: &str) -> Option<String> {
        self.labels
            .insert(channel.to_string(), label.trim().to_string())
    }

    pub fn remove(&mut self, channel: &str) -> Option<String> {
        self.labels.remove(channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .map(|(channel, label)| (channel.as_str(), label.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn save(&self) -> LedgerResult<()> {
        let content = serde_json::to_string(&self.labels)?;
        atomic_write_text(&self.path, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unknown_channel_has_empty_label() {
        let dir = tempdir().unwrap();
        let prefixes = PrefixMap::load(dir.path().join("prefix_state.json"));

        assert_eq!(prefixes.get("@nobody"), "");
        assert!(prefixes.is_empty());
    }

    #[test]
    fn set_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefix_state.json");

        let mut prefixes = PrefixMap::empty(&path);
        assert_eq!(prefixes.set("@a", " .au "), None);
        assert_eq!(prefixes.set("@a", ".chk"), Some(".au".to_string()));
        prefixes.set("-1001", ".b3");
        prefixes.save().unwrap();

        let loaded = PrefixMap::load(&path);
        assert_eq!(loaded.get("@a"), ".chk");
        assert_eq!(loaded.get("-1001"), ".b3");
        assert_eq!(loaded.iter().count(), 2);
    }

    #[test]
    fn reads_plain_json_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefix_state.json");
        std::fs::write(&path, r#"{"@a": ".au", "@b": ""}"#).unwrap();

        let prefixes = PrefixMap::load(&path);

        assert_eq!(prefixes.get("@a"), ".au");
        assert_eq!(prefixes.get("@b"), "");
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefix_state.json");
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(PrefixMap::load(&path).is_empty());
    }
}

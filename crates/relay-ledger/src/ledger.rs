use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::atomic::atomic_write_text;
use crate::{LedgerError, LedgerResult};

/// Durable map channel key -> items already delivered to that channel.
///
/// Items keep their delivery order within a channel and never repeat.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
    entries: BTreeMap<String, Vec<String>>,
    index: HashMap<String, HashSet<String>>,
}

impl LedgerStore {
    /// Empty ledger bound to `path`; nothing is read.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    /// Load the ledger at `path`.
    ///
    /// A missing, unreadable or corrupt file yields an empty ledger. Duplicate
    /// items inside a stored entry are collapsed to their first occurrence.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ledger on disk, starting empty");
                return Self::empty(path);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ledger unreadable, starting empty");
                return Self::empty(path);
            }
        };

        let stored: BTreeMap<String, Vec<String>> = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ledger corrupt, starting empty");
                return Self::empty(path);
            }
        };

        let mut ledger = Self::empty(path);
        for (channel, items) in stored {
            ledger.ensure_channel(&channel);
            for item in items {
                ledger.record(&channel, &item);
            }
        }
        debug!(
            path = %ledger.path.display(),
            channels = ledger.entries.len(),
            items = ledger.total_items(),
            "ledger loaded"
        );
        ledger
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure `channel` has an entry, empty if new.
    pub fn ensure_channel(&mut self, channel: &str) {
        self.entries.entry(channel.to_string()).or_default();
        self.index.entry(channel.to_string()).or_default();
    }

    /// Whether `item` was already delivered to `channel`.
    pub fn contains(&self, channel: &str, item: &str) -> bool {
        self.index
            .get(channel)
            .is_some_and(|items| items.contains(item))
    }

    /// Append `item` to `channel`'s entry. Returns false if it was already there.
    pub fn record(&mut self, channel: &str, item: &str) -> bool {
        let seen = self.index.entry(channel.to_string()).or_default();
        if !seen.insert(item.to_string()) {
            return false;
        }
        self.entries
            .entry(channel.to_string())
            .or_default()
            .push(item.to_string());
        true
    }

    /// Items delivered to `channel`, in delivery order.
    pub fn entry(&self, channel: &str) -> &[String] {
        self.entries
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn total_items(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Persist the whole ledger atomically.
    pub fn save(&self) -> LedgerResult<()> {
        let content = serde_json::to_string(&self.entries)?;
        atomic_write_text(&self.path, &content)
    }

    /// Delete the on-disk artifact. Returns whether a file was removed.
    pub fn remove_artifact(&self) -> LedgerResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(LedgerError::io(&self.path, err)),
        }
    }
}

//! Ordered, in-memory sequence of items read once per run.

use std::path::{Path, PathBuf};

use crate::{DispatchError, DispatchResult};

/// Where a run reads its items from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Items given inline, one per entry.
    Lines(Vec<String>),
    /// A text file with one item per line.
    File(PathBuf),
}

impl ItemSource {
    pub fn load(&self) -> DispatchResult<ItemQueue> {
        match self {
            Self::Lines(lines) => Ok(ItemQueue::from_lines(lines.iter().map(String::as_str))),
            Self::File(path) => ItemQueue::from_file(path),
        }
    }
}

/// Items in source order. Lines are trimmed and blank lines dropped;
/// duplicates are kept, the ledger decides what a channel already has.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQueue {
    items: Vec<String>,
}

impl ItemQueue {
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            items: lines
                .into_iter()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn from_file(path: &Path) -> DispatchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DispatchError::ItemSource {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_lines(content.lines()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn trims_and_drops_blank_lines() {
        let queue = ItemQueue::from_lines(["  4111|01|27 ", "", "   ", "5500|02|28"]);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get(0), Some("4111|01|27"));
        assert_eq!(queue.get(1), Some("5500|02|28"));
        assert_eq!(queue.get(2), None);
    }

    #[test]
    fn keeps_duplicates_in_order() {
        let queue = ItemQueue::from_lines(["a", "b", "a"]);
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec!["a", "b", "a"]);
    }

    #[test]
    fn reads_file_with_crlf_line_endings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cards.txt");
        std::fs::write(&path, "one\r\ntwo\r\n\r\nthree").unwrap();

        let queue = ItemSource::File(path).load().unwrap();

        assert_eq!(queue.iter().collect::<Vec<_>>(), vec!["one", "two", "three"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.txt");

        let err = ItemSource::File(path.clone()).load().unwrap_err();

        match err {
            DispatchError::ItemSource { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inline_lines_source() {
        let source = ItemSource::Lines(vec!["x".into(), " ".into(), "y".into()]);
        assert_eq!(source.load().unwrap().len(), 2);
    }
}

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::{LedgerError, LedgerResult};

/// Write `content` to `path` through a sibling temp file and a rename.
///
/// Parent directories are created. On failure the temp file is removed and
/// the previous content of `path`, if any, is untouched.
pub fn atomic_write_text(path: &Path, content: &str) -> LedgerResult<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LedgerError::InvalidPath(path.to_path_buf()))?;

    fs::create_dir_all(dir).map_err(|err| LedgerError::io(dir, err))?;

    let tmp_name = format!(
        ".{}.relay.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let tmp_path = dir.join(tmp_name);

    let write_result = (|| -> Result<(), io::Error> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = fs::File::open(dir) {
            let _ = parent_dir.sync_all();
        }

        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(LedgerError::io(path, err));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_and_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        atomic_write_text(&path, "{}").unwrap();
        atomic_write_text(&path, "{\"a\":[]}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":[]}");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");

        atomic_write_text(&path, "{}").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        atomic_write_text(&path, "{}").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }
}

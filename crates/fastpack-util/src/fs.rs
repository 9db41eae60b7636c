use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Render a path with forward slashes regardless of platform.
///
/// Rule patterns and module ids are matched against this form so a
/// configuration behaves the same on Windows and Unix.
#[must_use]
pub fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// Missing parent directories are created. Readers of `path` see either the
/// old contents or the new contents, never a partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Windows refuses to rename over an existing file.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Delete every regular file under `dir` that is not listed in `keep`.
///
/// Returns the removed paths in walk order. A missing `dir` is not an error.
///
/// # Errors
/// Returns an error if a file cannot be removed.
pub fn remove_stale_files(dir: &Path, keep: &HashSet<PathBuf>) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.exists() {
        return Ok(removed);
    }

    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if !keep.contains(&path) {
            fs::remove_file(&path)?;
            removed.push(path);
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_slashes() {
        assert_eq!(
            normalize_slashes(Path::new("a\\node_modules\\fable-core\\x.js")),
            "a/node_modules/fable-core/x.js"
        );
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fonts").join("a.woff");

        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        atomic_write(&path, b"world").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "world");
    }

    #[test]
    fn test_atomic_write_no_temp_left_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");

        atomic_write(&path, b"content").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].as_ref().unwrap().file_name().to_str().unwrap(),
            "test.txt"
        );
    }

    #[test]
    fn test_remove_stale_files_keeps_listed() {
        let dir = tempdir().unwrap();
        let keep_path = dir.path().join("bundle.js");
        let stale_path = dir.path().join("old").join("bundle.abc.js");
        atomic_write(&keep_path, b"new").unwrap();
        atomic_write(&stale_path, b"old").unwrap();

        let keep: HashSet<PathBuf> = [keep_path.clone()].into_iter().collect();
        let removed = remove_stale_files(dir.path(), &keep).unwrap();

        assert_eq!(removed, vec![stale_path.clone()]);
        assert!(keep_path.exists());
        assert!(!stale_path.exists());
    }

    #[test]
    fn test_remove_stale_files_missing_dir() {
        let dir = tempdir().unwrap();
        let removed = remove_stale_files(&dir.path().join("nope"), &HashSet::new()).unwrap();
        assert!(removed.is_empty());
    }
}

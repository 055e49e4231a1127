//! Crash-safe file writes

use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temp path next to `path` so the final rename stays on one filesystem
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `contents` to a temp file, sync it, then rename over `path`.
///
/// Readers observe either the old file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::persist(format!("Failed to write {}: {}", tmp.display(), e)));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::persist(format!("Failed to replace {}: {}", path.display(), e))
    })
}

/// Write one line per item, each terminated by `\n`
pub fn write_lines_atomic<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line.as_ref());
        buf.push('\n');
    }
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");

        write_atomic(&path, b"old\n").unwrap();
        write_atomic(&path, b"new\n").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new\n");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_write_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.txt");

        write_lines_atomic(&path, ["a:1", "b:2"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a:1\nb:2\n");
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/data/proxy.txt");
        assert_eq!(temp_path(p), PathBuf::from("/data/proxy.txt.tmp"));
    }
}

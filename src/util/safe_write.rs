//! Crash-safe file writes.
//!
//! Manifests, snapshots, and the profile database are never written in
//! place: content goes to a sibling temp file first and lands via rename,
//! so a crash mid-write leaves the previous version intact.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Write `contents` to `path` via `path.tmp` + rename.
pub fn safe_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path, "tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Write `contents` to `path`, keeping the previous version at
/// `path.prev`.
///
/// Order matters for crash safety: the old file is moved aside first,
/// then the new content is written under a unique name and renamed into
/// place. A crash between any two steps leaves either the old file or
/// the `.prev` copy readable.
pub fn safe_write_keep_prev(path: &Path, contents: &[u8]) -> io::Result<()> {
    if path.exists() {
        std::fs::rename(path, tmp_path(path, "prev"))?;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let staged = tmp_path(path, &nanos.to_string());
    std::fs::write(&staged, contents)?;
    std::fs::rename(&staged, path)
}

fn tmp_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_write_creates_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest");
        safe_write(&path, b"v1").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v1");
    }

    #[test]
    fn test_safe_write_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest");
        safe_write(&path, b"v1").unwrap();
        safe_write(&path, b"v2").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
        assert!(!temp.path().join("manifest.tmp").exists());
    }

    #[test]
    fn test_crash_between_temp_write_and_rename_keeps_original() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest");
        safe_write(&path, b"v1").unwrap();

        // Simulate the crash window: temp file written, rename never ran.
        std::fs::write(temp.path().join("manifest.tmp"), b"v2-partial").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"v1");
    }

    #[test]
    fn test_keep_prev_retains_old_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest");
        safe_write(&path, b"v1").unwrap();
        safe_write_keep_prev(&path, b"v2").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
        assert_eq!(
            std::fs::read(temp.path().join("manifest.prev")).unwrap(),
            b"v1"
        );
    }

    #[test]
    fn test_keep_prev_without_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifest");
        safe_write_keep_prev(&path, b"v1").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"v1");
        assert!(!temp.path().join("manifest.prev").exists());
    }
}

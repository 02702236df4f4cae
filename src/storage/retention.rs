//! Rotated file retention
//!
//! Keeps only the newest N auto-save files for a base name and format. File names embed
//! their creation timestamp (`{base}_{yyyyMMdd_HHmmss}[_NN]{ext}`), so name order is
//! creation order. Cleanup is best-effort: individual deletion failures are collected and
//! reported, never fatal.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::WriterError;
use crate::format::LogFormat;

/// Outcome of a cleanup pass
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files that were removed
    pub deleted: Vec<PathBuf>,
    /// Files that could not be removed
    pub failures: Vec<WriterError>,
}

/// Check whether `name` is a rotated file for this base name and format
fn is_rotated_file(name: &str, base_file_name: &str, format: LogFormat) -> bool {
    let Some(rest) = name.strip_prefix(base_file_name) else {
        return false;
    };
    let Some(stamp) = rest
        .strip_prefix('_')
        .and_then(|r| r.strip_suffix(format.extension()))
    else {
        return false;
    };

    // yyyyMMdd_HHmmss, optionally followed by _NN
    let bytes = stamp.as_bytes();
    if bytes.len() < 15 || bytes[8] != b'_' {
        return false;
    }
    let digits_ok = |s: &[u8]| s.iter().all(u8::is_ascii_digit);
    if !digits_ok(&bytes[..8]) || !digits_ok(&bytes[9..15]) {
        return false;
    }
    match &bytes[15..] {
        [] => true,
        [b'_', suffix @ ..] => !suffix.is_empty() && digits_ok(suffix),
        _ => false,
    }
}

/// List rotated files for a base name and format, oldest first
pub fn list_rotated_files(
    dir: &Path,
    base_file_name: &str,
    format: LogFormat,
) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| is_rotated_file(n, base_file_name, format))
                .unwrap_or(false)
        })
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Delete all but the newest `keep` rotated files
///
/// Fails only if the directory cannot be listed; per-file failures land in the report.
pub fn cleanup_rotated_files(
    dir: &Path,
    base_file_name: &str,
    format: LogFormat,
    keep: usize,
) -> Result<CleanupReport, WriterError> {
    let files = list_rotated_files(dir, base_file_name, format).map_err(|source| {
        WriterError::Cleanup {
            path: dir.to_path_buf(),
            source,
        }
    })?;

    let mut report = CleanupReport::default();
    let excess = files.len().saturating_sub(keep);

    for path in files.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted rotated log file");
                report.deleted.push(path);
            }
            Err(source) => {
                warn!(path = %path.display(), "Failed to delete rotated log file: {}", source);
                report.failures.push(WriterError::Cleanup { path, source });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(b"test").unwrap();
        path
    }

    #[test]
    fn test_is_rotated_file() {
        assert!(is_rotated_file("AutoSave_20240101_120000.txt", "AutoSave", LogFormat::Txt));
        assert!(is_rotated_file("AutoSave_20240101_120000_03.txt", "AutoSave", LogFormat::Txt));
        assert!(!is_rotated_file("AutoSave_20240101_120000.csv", "AutoSave", LogFormat::Txt));
        assert!(!is_rotated_file("AutoSave_notes.txt", "AutoSave", LogFormat::Txt));
        assert!(!is_rotated_file("Other_20240101_120000.txt", "AutoSave", LogFormat::Txt));
        assert!(!is_rotated_file("AutoSave_20240101_120000_.txt", "AutoSave", LogFormat::Txt));
        assert!(!is_rotated_file("AutoSaveX_20240101_120000.txt", "AutoSave", LogFormat::Txt));
    }

    #[test]
    fn test_cleanup_nonexistent_dir() {
        let path = Path::new("/nonexistent/path/for/testing");
        let report = cleanup_rotated_files(path, "AutoSave", LogFormat::Txt, 2).unwrap();
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let oldest = touch(dir, "AutoSave_20240101_100000.json");
        let older = touch(dir, "AutoSave_20240101_100000_01.json");
        let newer = touch(dir, "AutoSave_20240101_110000.json");
        let newest = touch(dir, "AutoSave_20240102_090000.json");

        let report = cleanup_rotated_files(dir, "AutoSave", LogFormat::Json, 2).unwrap();

        assert_eq!(report.deleted, vec![oldest.clone(), older.clone()]);
        assert!(report.failures.is_empty());
        assert!(!oldest.exists());
        assert!(!older.exists());
        assert!(newer.exists());
        assert!(newest.exists());
    }

    #[test]
    fn test_cleanup_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let other_format = touch(dir, "AutoSave_20240101_100000.csv");
        let other_base = touch(dir, "Logs_20240101_100000.txt");
        let unrelated = touch(dir, "notes.txt");
        touch(dir, "AutoSave_20240101_100000.txt");
        touch(dir, "AutoSave_20240101_100001.txt");

        let report = cleanup_rotated_files(dir, "AutoSave", LogFormat::Txt, 1).unwrap();

        assert_eq!(report.deleted.len(), 1);
        assert!(other_format.exists());
        assert!(other_base.exists());
        assert!(unrelated.exists());
        assert_eq!(list_rotated_files(dir, "AutoSave", LogFormat::Txt).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_under_limit_deletes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "AutoSave_20240101_100000.log");

        let report = cleanup_rotated_files(temp_dir.path(), "AutoSave", LogFormat::Log, 5).unwrap();
        assert!(report.deleted.is_empty());
    }
}

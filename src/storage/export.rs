//! One-shot export of retained entries
//!
//! Independent of the rotating auto-save file: writes a complete document in one go.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::entry::LogEntry;
use crate::error::WriterError;
use crate::format::{render_document, LogFormat};

/// Prefix of exports written with a generated name
pub const EXPORT_FILE_PREFIX: &str = "Logs";

/// Generate `Logs_{yyyyMMdd_HHmmss}{ext}` inside `dir`
pub fn default_export_path(dir: &Path, format: LogFormat) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!(
        "{}_{}{}",
        EXPORT_FILE_PREFIX,
        timestamp,
        format.extension()
    ))
}

/// Write every entry to `path` in the given format, replacing any existing file
pub fn export_entries(
    path: &Path,
    entries: &[LogEntry],
    format: LogFormat,
) -> Result<(), WriterError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| WriterError::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let document = render_document(entries, format);
    let mut file = fs::File::create(path).map_err(|source| WriterError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(document.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|source| WriterError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;

    info!(path = %path.display(), entries = entries.len(), "Exported logs");
    Ok(())
}

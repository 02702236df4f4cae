//! Rotating auto-save writer
//!
//! Owns exactly one open output file, keeps it well-formed for its format while entries are
//! appended one at a time, and rotates to a fresh timestamped file once the size limit is
//! exceeded.
//!
//! JSON files always hold a complete array ending in `\n]`. An append truncates those two
//! bytes, writes the separator and the new object, then re-closes the array. If a previous
//! sequence was interrupted the tail is repaired before patching, on rotation and on close.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::entry::LogEntry;
use crate::error::WriterError;
use crate::format::{format_entry, LogFormat, JSON_CLOSE, JSON_INDENT};

use super::retention::{cleanup_rotated_files, CleanupReport};

/// Bytes per megabyte for size limits
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Number of trailing bytes inspected when repairing a JSON file
const REPAIR_WINDOW: u64 = 256;

/// Rotation parameters, frozen for the lifetime of a writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    /// Directory the files are written to
    pub directory: PathBuf,
    /// File name prefix before the `_{timestamp}` suffix
    pub base_file_name: String,
    pub format: LogFormat,
    /// Rotate once the current file grows beyond this many bytes
    pub max_file_size_bytes: u64,
    /// Newest rotated files kept by cleanup
    pub max_files_to_retain: usize,
    /// Flush buffered output after this many entries
    pub flush_interval: usize,
}

impl RotationSettings {
    pub fn new(
        directory: impl Into<PathBuf>,
        base_file_name: impl Into<String>,
        format: LogFormat,
    ) -> Self {
        Self {
            directory: directory.into(),
            base_file_name: base_file_name.into(),
            format,
            max_file_size_bytes: 10 * BYTES_PER_MB,
            max_files_to_retain: 2,
            flush_interval: 1,
        }
    }
}

/// Result of a rotation
#[derive(Debug)]
pub struct Rotation {
    /// File that was closed
    pub previous: PathBuf,
    /// File now receiving entries
    pub current: PathBuf,
    /// Outcome of retention cleanup (`None` if the directory could not be listed)
    pub cleanup: Option<CleanupReport>,
    /// Listing failure, if any
    pub cleanup_error: Option<WriterError>,
}

/// Writer that appends formatted entries to size-bounded rotating files
pub struct RotatingWriter {
    settings: RotationSettings,
    file: Option<BufWriter<File>>,
    path: PathBuf,
    size: u64,
    entries_in_file: usize,
    unflushed: usize,
}

impl RotatingWriter {
    /// Create the directory if needed and open a fresh timestamped file
    pub fn open(settings: RotationSettings) -> Result<Self, WriterError> {
        let (file, path, size) = create_file(&settings)?;
        info!(path = %path.display(), format = ?settings.format, "Opened auto-save file");
        Ok(Self {
            settings,
            file: Some(file),
            path,
            size,
            entries_in_file: 0,
            unflushed: 0,
        })
    }

    /// Path of the file currently being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tracked size of the current file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entries written to the current file
    pub fn entries_in_file(&self) -> usize {
        self.entries_in_file
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Check the size limit and append, rotating first when needed
    pub fn write_entry(&mut self, entry: &LogEntry) -> Result<Option<Rotation>, WriterError> {
        let rotation = self.check_rotation()?;
        self.append(entry)?;
        Ok(rotation)
    }

    /// Rotate to a new file if the current one exceeds the size limit
    pub fn check_rotation(&mut self) -> Result<Option<Rotation>, WriterError> {
        if self.file.is_none() || self.size <= self.settings.max_file_size_bytes {
            return Ok(None);
        }

        let previous = self.path.clone();
        self.close()?;

        let (file, path, size) = create_file(&self.settings)?;
        self.file = Some(file);
        self.path = path;
        self.size = size;
        self.entries_in_file = 0;
        self.unflushed = 0;

        info!(
            previous = %previous.display(),
            current = %self.path.display(),
            "Rotated auto-save file"
        );

        let (cleanup, cleanup_error) = match self.cleanup() {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!("Rotation cleanup failed: {}", e);
                (None, Some(e))
            }
        };

        Ok(Some(Rotation {
            previous,
            current: self.path.clone(),
            cleanup,
            cleanup_error,
        }))
    }

    /// Delete all but the newest rotated files for this base name and format
    pub fn cleanup(&self) -> Result<CleanupReport, WriterError> {
        cleanup_rotated_files(
            &self.settings.directory,
            &self.settings.base_file_name,
            self.settings.format,
            self.settings.max_files_to_retain,
        )
    }

    /// Format and append one entry to the current file
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), WriterError> {
        let formatted = format_entry(entry, self.settings.format);
        match self.settings.format {
            LogFormat::Json => self.append_json(&formatted)?,
            _ => self.append_line(&formatted)?,
        }
        self.entries_in_file += 1;
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> Result<(), WriterError> {
        let path = self.path.clone();
        let file = self.file.as_mut().ok_or_else(|| closed_error(&path))?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|source| WriterError::FileWrite {
                path: path.clone(),
                source,
            })?;
        self.size += line.len() as u64 + 1;

        self.unflushed += 1;
        if self.unflushed >= self.settings.flush_interval.max(1) {
            file.flush().map_err(|source| WriterError::FileWrite { path, source })?;
            self.unflushed = 0;
        }
        Ok(())
    }

    fn append_json(&mut self, fragment: &str) -> Result<(), WriterError> {
        let path = self.path.clone();
        let first = self.entries_in_file == 0;
        let file = self.file.as_mut().ok_or_else(|| closed_error(&path))?;
        let write_err = |source| WriterError::FileWrite {
            path: path.clone(),
            source,
        };

        file.flush().map_err(write_err)?;

        if !json_tail_is_closed(file.get_mut()).map_err(write_err)? {
            warn!(path = %path.display(), "JSON array not terminated, repairing before append");
            repair_json_handle(file.get_mut(), &path)?;
        }

        let len = file.get_ref().metadata().map_err(write_err)?.len();
        file.get_ref()
            .set_len(len.saturating_sub(JSON_CLOSE.len() as u64))
            .map_err(|source| WriterError::FileTruncate {
                path: path.clone(),
                source,
            })?;
        file.seek(SeekFrom::End(0)).map_err(write_err)?;

        let separator = if first { "\n" } else { ",\n" };
        let chunk = format!("{}{}{}{}", separator, JSON_INDENT, fragment, JSON_CLOSE);
        file.write_all(chunk.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;

        // Truncation changes the length non-additively, so re-stat
        self.size = file.get_ref().metadata().map_err(write_err)?.len();
        self.unflushed = 0;
        Ok(())
    }

    /// Flush and close the current file, repairing JSON arrays
    ///
    /// Calling close on an already closed writer is a no-op.
    pub fn close(&mut self) -> Result<(), WriterError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        file.flush().map_err(|source| WriterError::FileWrite {
            path: self.path.clone(),
            source,
        })?;
        drop(file);

        if self.settings.format == LogFormat::Json && self.path.exists() {
            repair_json_file(&self.path)?;
        }

        debug!(
            path = %self.path.display(),
            entries = self.entries_in_file,
            "Closed auto-save file"
        );
        Ok(())
    }
}

impl Drop for RotatingWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close auto-save file on drop: {}", e);
        }
    }
}

fn closed_error(path: &Path) -> WriterError {
    WriterError::FileWrite {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotConnected, "writer is closed"),
    }
}

/// Create `{base}_{yyyyMMdd_HHmmss}{ext}` with the format preamble, never reusing an
/// existing name
///
/// Files created within the same second get a `_NN` suffix, which still sorts after the
/// unsuffixed name and before the next second.
fn create_file(
    settings: &RotationSettings,
) -> Result<(BufWriter<File>, PathBuf, u64), WriterError> {
    fs::create_dir_all(&settings.directory).map_err(|source| WriterError::DirectoryCreate {
        path: settings.directory.clone(),
        source,
    })?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let ext = settings.format.extension();

    let mut attempt = 0u32;
    let (file, path) = loop {
        let name = if attempt == 0 {
            format!("{}_{}{}", settings.base_file_name, stamp, ext)
        } else {
            format!("{}_{}_{:02}{}", settings.base_file_name, stamp, attempt, ext)
        };
        let path = settings.directory.join(name);
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => break (file, path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 99 => attempt += 1,
            Err(source) => return Err(WriterError::FileOpen { path, source }),
        }
    };

    let preamble = settings.format.file_preamble();
    let mut writer = BufWriter::new(file);
    writer
        .write_all(preamble.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|source| WriterError::FileWrite {
            path: path.clone(),
            source,
        })?;

    Ok((writer, path, preamble.len() as u64))
}

/// Whether the file ends in `\n]` with no dangling comma before it
fn json_tail_is_closed(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    let close = JSON_CLOSE.as_bytes();
    if len <= close.len() as u64 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-(close.len() as i64 + 1)))?;
    let mut tail = [0u8; 3];
    file.read_exact(&mut tail)?;
    Ok(&tail[1..] == close && tail[0] != b',')
}

/// Repair a JSON array file left behind by an interrupted append
///
/// Strips a dangling trailing comma and re-writes a clean `\n]` ending. Returns whether
/// the file was modified.
pub fn repair_json_file(path: &Path) -> Result<bool, WriterError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| WriterError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
    let repaired = repair_json_handle(&mut file, path)?;
    if repaired {
        info!(path = %path.display(), "Repaired JSON log file");
    }
    Ok(repaired)
}

fn repair_json_handle(file: &mut File, path: &Path) -> Result<bool, WriterError> {
    let write_err = |source| WriterError::FileWrite {
        path: path.to_path_buf(),
        source,
    };

    let len = file.metadata().map_err(write_err)?.len();
    if len == 0 {
        file.seek(SeekFrom::End(0)).map_err(write_err)?;
        file.write_all(format!("[{}", JSON_CLOSE).as_bytes()).map_err(write_err)?;
        return Ok(true);
    }

    let window = len.min(REPAIR_WINDOW);
    let tail_start = len - window;
    let mut tail = vec![0u8; window as usize];
    file.seek(SeekFrom::Start(tail_start)).map_err(write_err)?;
    file.read_exact(&mut tail).map_err(write_err)?;

    let body_end = json_body_end(&tail);
    let mut canonical = tail[..body_end].to_vec();
    canonical.extend_from_slice(JSON_CLOSE.as_bytes());
    if canonical == tail {
        return Ok(false);
    }

    file.set_len(tail_start + body_end as u64)
        .map_err(|source| WriterError::FileTruncate {
            path: path.to_path_buf(),
            source,
        })?;
    file.seek(SeekFrom::End(0)).map_err(write_err)?;
    file.write_all(JSON_CLOSE.as_bytes()).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    Ok(true)
}

/// Length of the array body once the closing bracket, trailing whitespace and a dangling
/// comma are removed
fn json_body_end(tail: &[u8]) -> usize {
    let trim = |mut end: usize| {
        while end > 0 && tail[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        end
    };

    let mut end = trim(tail.len());
    if end > 0 && tail[end - 1] == b']' {
        end = trim(end - 1);
    }
    if end > 0 && tail[end - 1] == b',' {
        end = trim(end - 1);
    }
    end
}

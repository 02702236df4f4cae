//! The collector's own diagnostic logging
//!
//! Diagnostics go through `tracing` to a timestamped file and to stderr. These files are
//! separate from collected log entries and are pruned by age, not by count.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default retention period in days
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

const FILE_PREFIX: &str = "netlog-";
const FILE_EXTENSION: &str = ".log";

/// Generate a timestamped diagnostics file path
pub fn create_log_file_path(dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("{}{}{}", FILE_PREFIX, timestamp, FILE_EXTENSION))
}

/// Writer handed to the fmt layer for each event
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut file) = self.file.lock() {
            file.write_all(buf)?;
            file.flush()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.file.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

struct SharedFileWriterMaker {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for SharedFileWriterMaker {
    type Writer = SharedFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Keeps the diagnostics file open; hold it for the lifetime of the process
pub struct DiagnosticsGuard {
    path: PathBuf,
    _file: Arc<Mutex<File>>,
}

impl DiagnosticsGuard {
    /// Path of the diagnostics file being written
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Install the global tracing subscriber
///
/// Filtering follows `RUST_LOG`, defaulting to `netlog=info`.
pub fn init_tracing(dir: &Path) -> Result<DiagnosticsGuard> {
    fs::create_dir_all(dir).context("Failed to create diagnostics directory")?;

    let path = create_log_file_path(dir);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context("Failed to open diagnostics file")?;
    let file = Arc::new(Mutex::new(file));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(SharedFileWriterMaker {
            file: Arc::clone(&file),
        })
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "netlog=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(DiagnosticsGuard { path, _file: file })
}

/// Delete diagnostics files older than `retention_days`
///
/// Returns the number of files deleted.
pub fn cleanup_old_diagnostics(dir: &Path, retention_days: u64) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut deleted = 0;
    for entry in fs::read_dir(dir).context("Failed to read diagnostics directory")? {
        let entry = entry?;
        let path = entry.path();

        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXTENSION) => {}
            _ => continue,
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            if modified < cutoff && fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_log_file_path() {
        let path = create_log_file_path(Path::new("/tmp/netlog/diagnostics"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("netlog-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cleanup_nonexistent_dir() {
        let count = cleanup_old_diagnostics(Path::new("/nonexistent/netlog/diag"), 7).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_cleanup_keeps_recent_and_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let recent = temp_dir.path().join("netlog-2026-01-21_14-30-45.log");
        let foreign = temp_dir.path().join("AutoSave_20260121_143045.log");
        fs::write(&recent, b"diag").unwrap();
        fs::write(&foreign, b"entry").unwrap();

        assert_eq!(cleanup_old_diagnostics(temp_dir.path(), 7).unwrap(), 0);
        assert!(recent.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_cleanup_with_zero_days_removes_only_diagnostics() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("netlog-2020-01-01_00-00-00.log");
        let other = temp_dir.path().join("notes.txt");
        fs::write(&old, b"diag").unwrap();
        fs::write(&other, b"keep").unwrap();

        // Anything modified before "now" is past a zero-day cutoff
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_diagnostics(temp_dir.path(), 0).unwrap(), 1);
        assert!(!old.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_shared_writer_appends_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");
        let file = Arc::new(Mutex::new(File::create(&path).unwrap()));
        let maker = SharedFileWriterMaker { file };

        maker.make_writer().write_all(b"one\n").unwrap();
        maker.make_writer().write_all(b"two\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}

//! Persistent storage of collected entries
//!
//! Provides the rotating auto-save writer, retention cleanup of rotated files, and
//! one-shot exports.

mod export;
mod retention;
mod writer;

pub use export::{default_export_path, export_entries, EXPORT_FILE_PREFIX};
pub use retention::{cleanup_rotated_files, list_rotated_files, CleanupReport};
pub use writer::{repair_json_file, Rotation, RotatingWriter, RotationSettings, BYTES_PER_MB};

//! Error types for the collector
//!
//! Errors are split by the subsystem that can fail so the collector can isolate them:
//! writer failures only disable auto-save, listener failures only stop ingestion.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the rotating file writer and one-shot exports
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to truncate {path}: {source}")]
    FileTruncate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Non-fatal; reported but never disables auto-save
    #[error("failed to clean up {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriterError {
    /// Underlying IO error
    pub fn io_error(&self) -> &io::Error {
        match self {
            WriterError::DirectoryCreate { source, .. }
            | WriterError::FileOpen { source, .. }
            | WriterError::FileWrite { source, .. }
            | WriterError::FileTruncate { source, .. }
            | WriterError::Cleanup { source, .. } => source,
        }
    }

    /// Path the failed operation targeted
    pub fn path(&self) -> &PathBuf {
        match self {
            WriterError::DirectoryCreate { path, .. }
            | WriterError::FileOpen { path, .. }
            | WriterError::FileWrite { path, .. }
            | WriterError::FileTruncate { path, .. }
            | WriterError::Cleanup { path, .. } => path,
        }
    }

    /// Whether this error should disable auto-save
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WriterError::Cleanup { .. })
    }
}

/// Socket failures of a listener
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to receive datagram: {0}")]
    Receive(#[source] io::Error),
}

/// Rejected session configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("base file name must not be empty")]
    EmptyBaseName,

    #[error("base file name '{0}' must not contain path separators")]
    InvalidBaseName(String),

    #[error("max log file size must be between 1 and 10000 MB (got {0})")]
    MaxFileSize(u64),

    #[error("files to retain must be between 1 and 100 (got {0})")]
    FilesToRetain(usize),

    #[error("auto-save interval must be at least 1 (got {0})")]
    AutoSaveInterval(usize),

    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("save path {path} is not usable: {reason}")]
    SavePath { path: PathBuf, reason: String },
}

/// Errors surfaced by the collector session API
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("socket error: {0}")]
    Socket(#[from] ListenerError),

    #[error("writing log file failed: {0}")]
    AutoSave(#[from] WriterError),

    #[error("collector is already running")]
    AlreadyRunning,

    #[error("no logs to export")]
    NothingToExport,
}

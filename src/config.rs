//! Configuration management for netlog
//!
//! `Config` is the persisted, user-editable TOML file. A running collector never reads it
//! directly: `Config::session_config` produces an immutable `SessionConfig` that is frozen
//! for the lifetime of one start/stop cycle.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::entry::Protocol;
use crate::error::ConfigError;
use crate::format::LogFormat;
use crate::listener::{Framing, DEFAULT_PORT};
use crate::storage::{RotationSettings, BYTES_PER_MB};

/// Upper bound for `max_log_file_size_mb`
pub const MAX_LOG_FILE_SIZE_MB: u64 = 10_000;

/// Upper bound for `max_log_files_to_retain`
pub const MAX_LOG_FILES_TO_RETAIN: usize = 100;

/// Categories of disk errors for user-friendly messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Get a user-friendly message for this error kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "Disk full - free space needed to keep saving logs",
            DiskErrorKind::PermissionDenied => "Permission denied writing to the save location",
            DiskErrorKind::NotFound => "File or directory not found",
            DiskErrorKind::Other => "Failed to save logs",
        }
    }
}

/// Categorize an IO error into a user-friendly category
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    // ENOSPC = 28; EDQUOT = 122 on Linux, 69 on macOS
                    if os_error == 28 || os_error == 122 || os_error == 69 {
                        return DiskErrorKind::DiskFull;
                    }
                    // EACCES
                    if os_error == 13 {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Create a user-friendly error message from an IO error
pub fn friendly_io_error_message(e: &std::io::Error, context: &str) -> String {
    let kind = categorize_io_error(e);
    match kind {
        DiskErrorKind::DiskFull | DiskErrorKind::PermissionDenied => {
            format!("{}: {}", context, kind.user_message())
        }
        DiskErrorKind::NotFound => format!("{}: file or directory not found", context),
        DiskErrorKind::Other => format!("{}: {}", context, e),
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Local address the listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port for both TCP and UDP (default: 514)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport to listen on: "tcp" or "udp"
    #[serde(default)]
    pub protocol: Protocol,

    /// Storage format: "txt", "csv", "json" or "log"
    #[serde(default)]
    pub format: LogFormat,

    /// TCP message boundaries: "line" or "chunk"
    #[serde(default)]
    pub framing: Framing,

    /// Directory auto-save and exports are written to
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,

    /// Auto-save file name prefix
    #[serde(default = "default_base_file_name")]
    pub base_file_name: String,

    /// Persist every received entry to a rotating file
    #[serde(default = "default_true")]
    pub auto_save_enabled: bool,

    /// Flush the auto-save file every N entries (default: 1)
    #[serde(default = "default_auto_save_interval")]
    pub auto_save_interval: usize,

    /// Rotate the auto-save file beyond this size in MB (default: 10)
    #[serde(default = "default_max_log_file_size_mb")]
    pub max_log_file_size_mb: u64,

    /// Rotated files kept on disk (default: 2)
    #[serde(default = "default_max_log_files_to_retain")]
    pub max_log_files_to_retain: usize,

    /// Entries kept in memory (default: 1000)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Pending collector events before new ones are dropped
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_save_path() -> PathBuf {
    dirs::document_dir()
        .map(|d| d.join("TCPLogs"))
        .unwrap_or_else(|| config_dir().join("logs"))
}

fn default_base_file_name() -> String {
    "AutoSave".to_string()
}

fn default_true() -> bool {
    true
}

fn default_auto_save_interval() -> usize {
    1
}

fn default_max_log_file_size_mb() -> u64 {
    10
}

fn default_max_log_files_to_retain() -> usize {
    2
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            protocol: Protocol::default(),
            format: LogFormat::default(),
            framing: Framing::default(),
            save_path: default_save_path(),
            base_file_name: default_base_file_name(),
            auto_save_enabled: default_true(),
            auto_save_interval: default_auto_save_interval(),
            max_log_file_size_mb: default_max_log_file_size_mb(),
            max_log_files_to_retain: default_max_log_files_to_retain(),
            buffer_capacity: default_buffer_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from file, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific file, or return default if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Build the frozen settings for one collector run
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let bind_address: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BindAddress(self.bind_address.clone()))?;

        let session = SessionConfig {
            bind_address,
            port: self.port,
            protocol: self.protocol,
            format: self.format,
            framing: self.framing,
            save_path: self.save_path.clone(),
            base_file_name: self.base_file_name.clone(),
            auto_save_enabled: self.auto_save_enabled,
            auto_save_interval: self.auto_save_interval,
            max_log_file_size_mb: self.max_log_file_size_mb,
            max_log_files_to_retain: self.max_log_files_to_retain,
        };
        session.validate()?;
        Ok(session)
    }
}

/// Immutable settings of one running collector session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub format: LogFormat,
    pub framing: Framing,
    pub save_path: PathBuf,
    pub base_file_name: String,
    pub auto_save_enabled: bool,
    pub auto_save_interval: usize,
    pub max_log_file_size_mb: u64,
    pub max_log_files_to_retain: usize,
}

impl SessionConfig {
    /// Settings for `protocol` on `port`, all other values at their defaults
    pub fn new(protocol: Protocol, port: u16, save_path: impl Into<PathBuf>) -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port,
            protocol,
            format: LogFormat::default(),
            framing: Framing::default(),
            save_path: save_path.into(),
            base_file_name: default_base_file_name(),
            auto_save_enabled: default_true(),
            auto_save_interval: default_auto_save_interval(),
            max_log_file_size_mb: default_max_log_file_size_mb(),
            max_log_files_to_retain: default_max_log_files_to_retain(),
        }
    }

    /// Check value ranges without touching the filesystem
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_file_name.trim().is_empty() {
            return Err(ConfigError::EmptyBaseName);
        }
        if self
            .base_file_name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == std::path::MAIN_SEPARATOR)
        {
            return Err(ConfigError::InvalidBaseName(self.base_file_name.clone()));
        }
        if !(1..=MAX_LOG_FILE_SIZE_MB).contains(&self.max_log_file_size_mb) {
            return Err(ConfigError::MaxFileSize(self.max_log_file_size_mb));
        }
        if !(1..=MAX_LOG_FILES_TO_RETAIN).contains(&self.max_log_files_to_retain) {
            return Err(ConfigError::FilesToRetain(self.max_log_files_to_retain));
        }
        if self.auto_save_interval == 0 {
            return Err(ConfigError::AutoSaveInterval(self.auto_save_interval));
        }
        Ok(())
    }

    /// Create the save directory if it does not exist yet
    pub fn ensure_save_path(&self) -> Result<(), ConfigError> {
        if self.save_path.as_os_str().is_empty() {
            return Err(ConfigError::SavePath {
                path: self.save_path.clone(),
                reason: "path is empty".to_string(),
            });
        }
        std::fs::create_dir_all(&self.save_path).map_err(|e| ConfigError::SavePath {
            path: self.save_path.clone(),
            reason: friendly_io_error_message(&e, "cannot create directory"),
        })?;
        if !self.save_path.is_dir() {
            return Err(ConfigError::SavePath {
                path: self.save_path.clone(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(())
    }

    /// Address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_log_file_size_mb * BYTES_PER_MB
    }

    /// Settings for the rotating auto-save writer
    pub fn rotation_settings(&self) -> RotationSettings {
        RotationSettings {
            directory: self.save_path.clone(),
            base_file_name: self.base_file_name.clone(),
            format: self.format,
            max_file_size_bytes: self.max_file_size_bytes(),
            max_files_to_retain: self.max_log_files_to_retain,
            flush_interval: self.auto_save_interval,
        }
    }
}

/// Get the base configuration directory (~/.netlog)
/// Falls back to ./.netlog if home directory cannot be determined
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| {
        tracing::warn!("Could not determine home directory, using current directory for config");
        PathBuf::from(".netlog")
    })
}

/// Try to get the base configuration directory, returning None if home dir is unavailable
pub fn try_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".netlog"))
}

/// Get the path to the config file
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the path to the collector's own diagnostic logs
pub fn diagnostics_dir() -> PathBuf {
    config_dir().join("diagnostics")
}

/// Ensure all required directories exist
pub fn ensure_directories() -> Result<()> {
    std::fs::create_dir_all(config_dir()).context("Failed to create config directory")?;
    std::fs::create_dir_all(diagnostics_dir()).context("Failed to create diagnostics directory")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session(dir: &TempDir) -> SessionConfig {
        SessionConfig::new(Protocol::Udp, 0, dir.path())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 514);
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.format, LogFormat::Txt);
        assert_eq!(config.base_file_name, "AutoSave");
        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.max_log_file_size_mb, 10);
        assert_eq!(config.max_log_files_to_retain, 2);
        assert!(config.auto_save_enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            protocol = "udp"
            format = "json"
            port = 5514
            "#,
        )
        .unwrap();
        assert_eq!(parsed.protocol, Protocol::Udp);
        assert_eq!(parsed.format, LogFormat::Json);
        assert_eq!(parsed.port, 5514);
        assert_eq!(parsed.framing, Framing::Line);
        assert_eq!(parsed.auto_save_interval, 1);
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        assert_eq!(Config::load_from(&path).unwrap(), Config::default());

        let mut config = Config::default();
        config.framing = Framing::Chunk;
        config.max_log_files_to_retain = 7;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.framing, Framing::Chunk);
        assert_eq!(loaded.max_log_files_to_retain, 7);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_session_config_from_config() {
        let mut config = Config::default();
        config.bind_address = "127.0.0.1".to_string();
        config.port = 6000;
        let session = config.session_config().unwrap();
        assert_eq!(session.socket_addr(), "127.0.0.1:6000".parse().unwrap());
        assert_eq!(session.max_file_size_bytes(), 10 * 1024 * 1024);

        config.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            config.session_config(),
            Err(ConfigError::BindAddress(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let temp_dir = TempDir::new().unwrap();

        let mut c = session(&temp_dir);
        c.base_file_name = "  ".to_string();
        assert_eq!(c.validate(), Err(ConfigError::EmptyBaseName));

        let mut c = session(&temp_dir);
        c.base_file_name = "../escape".to_string();
        assert!(matches!(c.validate(), Err(ConfigError::InvalidBaseName(_))));

        let mut c = session(&temp_dir);
        c.max_log_file_size_mb = 0;
        assert_eq!(c.validate(), Err(ConfigError::MaxFileSize(0)));

        let mut c = session(&temp_dir);
        c.max_log_files_to_retain = 101;
        assert_eq!(c.validate(), Err(ConfigError::FilesToRetain(101)));

        let mut c = session(&temp_dir);
        c.auto_save_interval = 0;
        assert_eq!(c.validate(), Err(ConfigError::AutoSaveInterval(0)));

        assert!(session(&temp_dir).validate().is_ok());
    }

    #[test]
    fn test_ensure_save_path() {
        let temp_dir = TempDir::new().unwrap();
        let mut c = session(&temp_dir);
        c.save_path = temp_dir.path().join("new").join("dir");
        c.ensure_save_path().unwrap();
        assert!(c.save_path.is_dir());

        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        c.save_path = blocker;
        assert!(matches!(
            c.ensure_save_path(),
            Err(ConfigError::SavePath { .. })
        ));
    }

    #[test]
    fn test_rotation_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut c = session(&temp_dir);
        c.format = LogFormat::Csv;
        c.max_log_file_size_mb = 3;
        c.auto_save_interval = 5;
        let settings = c.rotation_settings();
        assert_eq!(settings.directory, temp_dir.path());
        assert_eq!(settings.format, LogFormat::Csv);
        assert_eq!(settings.max_file_size_bytes, 3 * 1024 * 1024);
        assert_eq!(settings.flush_interval, 5);
    }

    #[test]
    fn test_categorize_io_error() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(categorize_io_error(&denied), DiskErrorKind::PermissionDenied);
        assert!(friendly_io_error_message(&denied, "Auto-save")
            .starts_with("Auto-save: Permission denied"));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(categorize_io_error(&missing), DiskErrorKind::NotFound);

        #[cfg(unix)]
        {
            let full = std::io::Error::from_raw_os_error(28);
            assert_eq!(categorize_io_error(&full), DiskErrorKind::DiskFull);
        }
    }

    #[test]
    fn test_config_dir_does_not_panic() {
        let dir = config_dir();
        assert!(dir.ends_with(".netlog"));
    }
}

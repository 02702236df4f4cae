//! netlog - network log collector
//!
//! Receives log messages over TCP or UDP, keeps the most recent ones in memory and
//! persists them to size-rotated files in TXT, CSV, JSON or syslog-style format.

pub mod buffer;
pub mod collector;
pub mod config;
pub mod diagnostics;
pub mod entry;
pub mod error;
pub mod format;
pub mod listener;
pub mod storage;

//! Log entry model
//!
//! A `LogEntry` is created once per received message (or lifecycle event) and never
//! mutated afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Source address used for entries produced by the collector itself
pub const SYSTEM_SOURCE: &str = "System";

/// Transport a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Get the display name for this protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// A single received log message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Local time the message was received
    pub timestamp: DateTime<Local>,
    /// Transport the message arrived on
    pub protocol: Protocol,
    /// Sender IP, or "System" for lifecycle entries
    pub source: String,
    /// Raw message text (may be empty)
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current local time
    pub fn new(protocol: Protocol, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(Local::now(), protocol, source, message)
    }

    /// Create an entry with an explicit timestamp
    pub fn at(
        timestamp: DateTime<Local>,
        protocol: Protocol,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            protocol,
            source: source.into(),
            message: message.into(),
        }
    }

    /// Create a lifecycle entry attributed to the collector itself
    pub fn system(protocol: Protocol, message: impl Into<String>) -> Self {
        Self::new(protocol, SYSTEM_SOURCE, message)
    }

    /// Check if this entry was produced by the collector rather than a sender
    pub fn is_system(&self) -> bool {
        self.source == SYSTEM_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
        assert_eq!(Protocol::Udp.to_string(), "UDP");
    }

    #[test]
    fn test_protocol_serde_lowercase() {
        let parsed: Protocol = serde_json::from_str("\"udp\"").unwrap();
        assert_eq!(parsed, Protocol::Udp);
        assert_eq!(serde_json::to_string(&Protocol::Tcp).unwrap(), "\"tcp\"");
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_system_entry() {
        let entry = LogEntry::system(Protocol::Udp, "Started listening on UDP port 514");
        assert!(entry.is_system());
        assert_eq!(entry.source, "System");
        assert_eq!(entry.protocol, Protocol::Udp);
    }

    #[test]
    fn test_entry_allows_empty_message() {
        let entry = LogEntry::new(Protocol::Tcp, "10.0.0.1", "");
        assert!(entry.message.is_empty());
        assert!(!entry.is_system());
    }
}

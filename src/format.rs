//! Entry formatting for the supported storage formats
//!
//! Formatting is pure and infallible: every entry renders to one line (TXT, CSV, LOG)
//! or one JSON object fragment (JSON).

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::entry::{LogEntry, Protocol};

/// Timestamp layout shared by TXT, CSV and JSON
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header row written once at the top of every CSV file
pub const CSV_HEADER: &str = "Timestamp,Protocol,SourceIP,Message";

/// Indentation of each object inside a JSON array file
pub const JSON_INDENT: &str = "  ";

/// Closing sequence of a JSON array file; always the last two bytes when not mid-append
pub const JSON_CLOSE: &str = "\n]";

/// Persisted file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `[yyyy-MM-dd HH:mm:ss] [Protocol] SourceIP: Message`
    #[default]
    Txt,
    /// `yyyy-MM-dd HH:mm:ss,Protocol,SourceIP,"Message"`
    Csv,
    /// Single top-level array of objects
    Json,
    /// Syslog-like `Mon DD HH:mm:ss [Protocol] SourceIP Message`
    Log,
}

impl LogFormat {
    pub const ALL: [LogFormat; 4] = [
        LogFormat::Txt,
        LogFormat::Csv,
        LogFormat::Json,
        LogFormat::Log,
    ];

    /// File extension including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Txt => ".txt",
            LogFormat::Csv => ".csv",
            LogFormat::Json => ".json",
            LogFormat::Log => ".log",
        }
    }

    /// Content written when a new file is created
    pub fn file_preamble(&self) -> &'static str {
        match self {
            LogFormat::Csv => "Timestamp,Protocol,SourceIP,Message\n",
            LogFormat::Json => "[\n]",
            LogFormat::Txt | LogFormat::Log => "",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LogFormat::Txt => "Text (.txt)",
            LogFormat::Csv => "CSV (.csv)",
            LogFormat::Json => "JSON (.json)",
            LogFormat::Log => "Syslog (.log)",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(LogFormat::Txt),
            "csv" => Ok(LogFormat::Csv),
            "json" => Ok(LogFormat::Json),
            "log" | "syslog" => Ok(LogFormat::Log),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Wire shape of one JSON array element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JsonRecord {
    timestamp: String,
    protocol: String,
    source: String,
    message: String,
}

/// Render an entry in the given format (no trailing newline)
pub fn format_entry(entry: &LogEntry, format: LogFormat) -> String {
    match format {
        LogFormat::Txt => format!(
            "[{}] [{}] {}: {}",
            entry.timestamp.format(TIMESTAMP_FORMAT),
            entry.protocol,
            entry.source,
            entry.message
        ),
        LogFormat::Csv => format!(
            "{},{},{},\"{}\"",
            entry.timestamp.format(TIMESTAMP_FORMAT),
            entry.protocol,
            entry.source,
            entry.message.replace('"', "\"\"")
        ),
        LogFormat::Json => json_fragment(entry),
        // %e pads the day with a space, as traditional syslog does
        LogFormat::Log => format!(
            "{} [{}] {} {}",
            entry.timestamp.format("%b %e %H:%M:%S"),
            entry.protocol,
            entry.source,
            entry.message
        ),
    }
}

/// Render an entry by format name; unknown names fall back to the raw message
pub fn format_entry_named(entry: &LogEntry, format: &str) -> String {
    match format.parse::<LogFormat>() {
        Ok(format) => format_entry(entry, format),
        Err(_) => entry.message.clone(),
    }
}

fn json_fragment(entry: &LogEntry) -> String {
    let record = JsonRecord {
        timestamp: entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        protocol: entry.protocol.to_string(),
        source: entry.source.clone(),
        message: entry.message.clone(),
    };
    serde_json::to_string(&record).unwrap_or_else(|_| {
        format!(
            "{{\"timestamp\":\"{}\",\"protocol\":\"{}\",\"source\":\"{}\",\"message\":\"{}\"}}",
            record.timestamp,
            record.protocol,
            record.source.replace('"', "\\\""),
            record.message.replace('"', "\\\"")
        )
    })
}

/// Render a complete document (header, every entry, JSON brackets) for one-shot exports
///
/// The JSON layout matches what the rotating writer produces incrementally.
pub fn render_document(entries: &[LogEntry], format: LogFormat) -> String {
    match format {
        LogFormat::Json => {
            if entries.is_empty() {
                return format!("[{}", JSON_CLOSE);
            }
            let body: Vec<String> = entries
                .iter()
                .map(|e| format!("{}{}", JSON_INDENT, json_fragment(e)))
                .collect();
            format!("[\n{}{}", body.join(",\n"), JSON_CLOSE)
        }
        _ => {
            let mut out = String::from(format.file_preamble());
            for entry in entries {
                out.push_str(&format_entry(entry, format));
                out.push('\n');
            }
            out
        }
    }
}

/// Fields recovered from a persisted CSV row or JSON object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub timestamp: NaiveDateTime,
    pub protocol: Protocol,
    pub source: String,
    pub message: String,
}

impl ParsedRecord {
    /// Check whether this record describes the given entry (second resolution)
    pub fn matches(&self, entry: &LogEntry) -> bool {
        let ts = entry.timestamp.format(TIMESTAMP_FORMAT).to_string();
        self.timestamp.format(TIMESTAMP_FORMAT).to_string() == ts
            && self.protocol == entry.protocol
            && self.source == entry.source
            && self.message == entry.message
    }
}

/// Parse one CSV data row produced by [`format_entry`]
pub fn parse_csv_line(line: &str) -> Option<ParsedRecord> {
    let mut parts = line.splitn(4, ',');
    let timestamp = NaiveDateTime::parse_from_str(parts.next()?, TIMESTAMP_FORMAT).ok()?;
    let protocol = parts.next()?.parse().ok()?;
    let source = parts.next()?.to_string();
    let quoted = parts.next()?;
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;

    Some(ParsedRecord {
        timestamp,
        protocol,
        source,
        message: inner.replace("\"\"", "\""),
    })
}

/// Parse one JSON object fragment produced by [`format_entry`]
pub fn parse_json_fragment(fragment: &str) -> Option<ParsedRecord> {
    let record: JsonRecord = serde_json::from_str(fragment.trim()).ok()?;
    Some(ParsedRecord {
        timestamp: NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT).ok()?,
        protocol: record.protocol.parse().ok()?,
        source: record.source,
        message: record.message,
    })
}

// Log record domain model

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Which child stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamTag::Stdout => write!(f, "stdout"),
            StreamTag::Stderr => write!(f, "stderr"),
        }
    }
}

/// One captured line, stamped at arrival.
///
/// Immutable once built; appended to sinks in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Epoch ms at which the writer observed the line
    pub timestamp: i64,
    pub stream: StreamTag,
    pub line: String,
}

impl LogRecord {
    pub fn new(timestamp: i64, stream: StreamTag, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            stream,
            line: line.into(),
        }
    }

    /// Line as written to the per-stream sink: `<rfc3339> <line>`
    pub fn format_stream(&self) -> String {
        format!("{} {}", self.rfc3339(), self.line)
    }

    /// Line as written to the combined sink: `<rfc3339> [<stream>] <line>`
    pub fn format_combined(&self) -> String {
        format!("{} [{}] {}", self.rfc3339(), self.stream, self.line)
    }

    fn rfc3339(&self) -> String {
        match Utc.timestamp_millis_opt(self.timestamp).single() {
            Some(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            None => self.timestamp.to_string(),
        }
    }
}

use chrono::{DateTime, TimeZone, Utc};
use ratatui::style::Color;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Keys of the record payload that are rendered in their own column
pub const RESERVED_KEYS: [&str; 3] = ["time", "level", "message"];

/// Severity of a log record, ordered from least to most severe
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Level {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Debug, Level::Info, Level::Warn, Level::Error];

    /// Parse the level name stored in preferences. Only the four canonical
    /// names are accepted.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }

    /// Map a level as emitted by the server onto the four severities.
    /// Anything unrecognised is treated as debug.
    pub fn from_wire(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" | "fatal" | "panic" => Level::Error,
            _ => Level::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    /// Three-letter tag shown in the level column
    pub fn tag(&self) -> &'static str {
        match self {
            Level::Debug => "dbg",
            Level::Info => "inf",
            Level::Warn => "wrn",
            Level::Error => "err",
        }
    }

    /// Get the color for this log level
    pub fn color(&self) -> Color {
        match self {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Blue,
        }
    }
}

/// A single record of the remote stream
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    /// Server-assigned id, strictly increasing over the stream's lifetime
    pub id: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Level,
    pub message: String,
    /// The `error` payload, if present and not null
    pub error: Option<Value>,
    /// Remaining structured context, in the order the server sent it
    pub fields: Map<String, Value>,
}

#[cfg(test)]
impl LogRecord {
    pub fn new(id: u64, level: Level, message: &str) -> Self {
        Self {
            id,
            timestamp: None,
            level,
            message: message.to_string(),
            error: None,
            fields: Map::new(),
        }
    }
}

/// Record as it appears on the wire: `{"ID": 7, "Data": {...}}`
#[derive(Deserialize)]
struct WireRecord {
    #[serde(rename = "ID")]
    id: u64,
    #[serde(rename = "Data", default)]
    data: Map<String, Value>,
}

impl From<WireRecord> for LogRecord {
    fn from(wire: WireRecord) -> Self {
        let mut data = wire.data;

        let timestamp = data.shift_remove("time").as_ref().and_then(parse_time);
        let level = match data.shift_remove("level") {
            Some(Value::String(name)) => Level::from_wire(&name),
            _ => Level::Debug,
        };
        let message = match data.shift_remove("message") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let error = data.shift_remove("error").filter(|v| !v.is_null());

        Self {
            id: wire.id,
            timestamp,
            level,
            message,
            error,
            fields: data,
        }
    }
}

/// Parse a response body into records, keeping the server's order
pub fn parse_batch(body: &[u8]) -> Result<Vec<LogRecord>, serde_json::Error> {
    let wire: Vec<WireRecord> = serde_json::from_slice(body)?;
    Ok(wire.into_iter().map(LogRecord::from).collect())
}

/// Accepts RFC 3339 strings and UNIX timestamps in seconds or milliseconds
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                if secs.abs() >= MILLIS_THRESHOLD {
                    Utc.timestamp_millis_opt(secs).single()
                } else {
                    Utc.timestamp_opt(secs, 0).single()
                }
            } else {
                n.as_f64()
                    .and_then(|f| Utc.timestamp_millis_opt((f * 1000.0) as i64).single())
            }
        }
        _ => None,
    }
}

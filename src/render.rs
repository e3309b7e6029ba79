//! Turns visible records into display lines.
//!
//! A display line is a sequence of fragments (id, time, level tag, message,
//! error, and one key/value pair per structured field). Each fragment holds
//! one or more segments; a fresh render produces exactly one unemphasized
//! segment per fragment and the highlighter later splits them.

use std::fmt::Display;

use chrono::{Local, TimeZone};
use serde_json::Value;

use crate::record::{Level, LogRecord, RESERVED_KEYS};

/// Width the record id is zero-padded to
pub const ID_WIDTH: usize = 5;

/// Shown in place of the time when the record carried none we could parse
const UNKNOWN_TIME: &str = "--:--:--";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentKind {
    Id,
    Time,
    Level,
    Message,
    Error,
    FieldKey,
    FieldValue,
}

impl FragmentKind {
    /// Whether a space precedes this fragment when the line is laid out
    pub fn spaced(&self) -> bool {
        !matches!(self, FragmentKind::Id | FragmentKind::FieldValue)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub emphasized: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub segments: Vec<Segment>,
}

impl Fragment {
    fn plain(kind: FragmentKind, text: String) -> Self {
        Self {
            kind,
            segments: vec![Segment {
                text,
                emphasized: false,
            }],
        }
    }

    /// Full text of the fragment, ignoring emphasis
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

/// One rendered record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayLine {
    pub id: u64,
    pub level: Level,
    pub fragments: Vec<Fragment>,
}

impl DisplayLine {
    /// Lay the line out as text, passing emphasized segments through `emphasize`
    pub fn to_text(&self, emphasize: impl Fn(&str) -> String) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            if fragment.kind.spaced() && !out.is_empty() {
                out.push(' ');
            }
            for segment in &fragment.segments {
                if segment.emphasized {
                    out.push_str(&emphasize(&segment.text));
                } else {
                    out.push_str(&segment.text);
                }
            }
        }
        out
    }

    pub fn plain_text(&self) -> String {
        self.to_text(str::to_string)
    }
}

/// Render records in local time
pub fn render(visible: &[&LogRecord]) -> Vec<DisplayLine> {
    render_in(visible, &Local)
}

/// Render records with times shown in `tz`
pub fn render_in<Tz>(visible: &[&LogRecord], tz: &Tz) -> Vec<DisplayLine>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    visible.iter().map(|record| render_record(record, tz)).collect()
}

fn render_record<Tz>(record: &LogRecord, tz: &Tz) -> DisplayLine
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let time = record
        .timestamp
        .map(|t| t.with_timezone(tz).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| UNKNOWN_TIME.to_string());

    let mut fragments = vec![
        Fragment::plain(FragmentKind::Id, format!("{:0width$}", record.id, width = ID_WIDTH)),
        Fragment::plain(FragmentKind::Time, time),
        Fragment::plain(FragmentKind::Level, record.level.tag().to_string()),
        Fragment::plain(FragmentKind::Message, record.message.clone()),
    ];

    if let Some(error) = &record.error {
        fragments.push(Fragment::plain(
            FragmentKind::Error,
            format!("error={}", format_value(error)),
        ));
    }

    for (key, value) in &record.fields {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        fragments.push(Fragment::plain(FragmentKind::FieldKey, format!("{}=", key)));
        fragments.push(Fragment::plain(FragmentKind::FieldValue, format_value(value)));
    }

    DisplayLine {
        id: record.id,
        level: record.level,
        fragments,
    }
}

/// Objects and arrays as compact JSON, strings quoted, scalars literally
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

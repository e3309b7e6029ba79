use std::ops::Range;

use regex::Regex;

use crate::record::{Level, LogRecord};

/// Records of `buffer` at or above `threshold`, in buffer order
pub fn visible(buffer: &[LogRecord], threshold: Level) -> Vec<&LogRecord> {
    buffer.iter().filter(|r| r.level >= threshold).collect()
}

/// The active search term used for highlighting
#[derive(Clone, Debug, Default)]
pub struct SearchTerm {
    /// The pattern string
    pub pattern: String,
    /// Whether to treat the pattern as a regex
    pub is_regex: bool,
    /// Compiled regex (if is_regex is true and pattern is valid)
    compiled: Option<Regex>,
}

impl SearchTerm {
    pub fn new(pattern: String, is_regex: bool) -> Self {
        let compiled = if is_regex && !pattern.is_empty() {
            Regex::new(&pattern).ok()
        } else {
            None
        };

        Self {
            pattern,
            is_regex,
            compiled,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Byte ranges of every non-overlapping match in `text`
    pub fn find_matches(&self, text: &str) -> Vec<Range<usize>> {
        if self.pattern.is_empty() {
            return Vec::new();
        }

        match &self.compiled {
            Some(regex) => regex
                .find_iter(text)
                .filter(|m| !m.is_empty())
                .map(|m| m.range())
                .collect(),
            // Plain substring, and the fallback for an invalid regex
            None => text
                .match_indices(self.pattern.as_str())
                .map(|(start, m)| start..start + m.len())
                .collect(),
        }
    }
}

//! Merge and eviction steps for the record buffer.
//!
//! The buffer is a plain `Vec<LogRecord>` kept strictly ascending by id with
//! no duplicates. Both steps take the buffer by value and hand back the new
//! one, so the owning session can chain them without intermediate copies.

use std::collections::BTreeMap;

use crate::record::LogRecord;

/// How many records survive when the buffer grows past its cap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EvictionPolicy {
    /// Keep exactly `max` records, the highest ids
    #[default]
    Strict,
    /// Reproduce the web viewer's slice: keep the `max - 1` records below the
    /// newest one, dropping the newest record as well as the oldest ones
    Legacy,
}

/// Fold `batch` into `buffer`. A record whose id appears more than once keeps
/// its last copy in concatenation order; the result is sorted by id.
pub fn merge(buffer: Vec<LogRecord>, batch: Vec<LogRecord>) -> Vec<LogRecord> {
    if batch.is_empty() {
        return buffer;
    }

    let mut by_id: BTreeMap<u64, LogRecord> = BTreeMap::new();
    for record in buffer.into_iter().chain(batch) {
        by_id.insert(record.id, record);
    }
    by_id.into_values().collect()
}

/// Enforce the buffer cap, dropping the lowest ids first
pub fn evict(mut buffer: Vec<LogRecord>, max: usize, policy: EvictionPolicy) -> Vec<LogRecord> {
    let len = buffer.len();
    if len <= max {
        return buffer;
    }

    match policy {
        EvictionPolicy::Strict => {
            buffer.drain(..len - max);
        }
        EvictionPolicy::Legacy => {
            buffer.truncate(len - 1);
            let oldest = (len - max).min(buffer.len());
            buffer.drain(..oldest);
        }
    }
    buffer
}

//! The in-memory access record for one request/response cycle.
//!
//! A [`LogRecord`] is assembled once per request, handed to the encoder by
//! value or reference, and never mutated afterwards.

use crate::value::EntryValue;
use chrono::{DateTime, Local};
use std::time::Duration;

/// A named, typed entry (path parameter or metadata field).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub value: EntryValue,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<EntryValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One query-string pair. `value` is still URL-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntry {
    pub key: String,
    pub value: String,
}

impl QueryEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered metadata set filled by the field extractors.
///
/// Entries are append-only: `set` never replaces an earlier entry with the
/// same key, so the emitted array reflects every extractor's contribution in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<Entry>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<EntryValue>) {
        self.0.push(Entry::new(key, value));
    }

    /// First entry stored under `key`.
    pub fn get(&self, key: &str) -> Option<&EntryValue> {
        self.0.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Entry>> for Fields {
    fn from(entries: Vec<Entry>) -> Self {
        Self(entries)
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A completed request/response cycle, ready for encoding.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Wall-clock instant the request started, rendered when human time is on.
    pub now: DateTime<Local>,
    /// Same instant as Unix milliseconds, emitted when human time is off.
    pub timestamp: i64,
    pub latency: Duration,
    pub code: u16,
    pub method: String,
    pub path: String,
    /// Empty when IP capture is off or the peer is unknown.
    pub ip: String,
    pub query: Vec<QueryEntry>,
    pub path_params: Vec<Entry>,
    pub fields: Fields,
    /// Whether request body capture is enabled for this record.
    pub request_body: bool,
    /// Whether response body capture is enabled for this record.
    pub response_body: bool,
    /// Minified request body.
    pub request: String,
    /// Minified response body.
    pub response: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl LogRecord {
    /// A record with the required fields set and every optional field empty.
    pub fn new(
        now: DateTime<Local>,
        method: impl Into<String>,
        path: impl Into<String>,
        code: u16,
    ) -> Self {
        Self {
            now,
            timestamp: now.timestamp_millis(),
            latency: Duration::ZERO,
            code,
            method: method.into(),
            path: path.into(),
            ip: String::new(),
            query: Vec::new(),
            path_params: Vec::new(),
            fields: Fields::new(),
            request_body: false,
            response_body: false,
            request: String::new(),
            response: String::new(),
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Latency in whole milliseconds, truncated.
    pub fn latency_ms(&self) -> u64 {
        (self.latency.as_nanos() / 1_000_000) as u64
    }
}

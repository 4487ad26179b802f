use crate::record::Entry;
use bytes::Bytes;
use chrono::{DateTime, Local};
use http::HeaderMap;
use std::borrow::Cow;
use std::time::Duration;

/// A completed request/response exchange as reported by the host framework.
///
/// This is the input boundary of the pipeline: extractors read it, the
/// assembler turns it into a `LogRecord`.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Caller-supplied correlation id.
    pub id: String,
    pub started_at: DateTime<Local>,
    pub latency: Duration,
    pub method: String,
    pub path: String,
    /// Query string exactly as received, without the leading `?`.
    pub raw_query: String,
    pub headers: HeaderMap,
    pub client_ip: String,
    pub path_params: Vec<Entry>,
    pub status: u16,
    pub request_body: Bytes,
    pub response_body: Bytes,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl Exchange {
    pub fn new(id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: Local::now(),
            latency: Duration::ZERO,
            method: method.into(),
            path: path.into(),
            raw_query: String::new(),
            headers: HeaderMap::new(),
            client_ip: String::new(),
            path_params: Vec::new(),
            status: 0,
            request_body: Bytes::new(),
            response_body: Bytes::new(),
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Header value as text; `None` when absent. UTF-8 values are returned
    /// as sent, other bytes are replaced lossily.
    pub fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
    }
}

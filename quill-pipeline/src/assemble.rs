//! Turns a completed exchange plus extracted metadata into a [`LogRecord`].

use quill_core::config::AccessLogConfig;
use quill_core::exchange::Exchange;
use quill_core::record::{Fields, LogRecord, QueryEntry};

use crate::minify;

/// Applies the `access_log` capture toggles while building records.
#[derive(Debug, Clone)]
pub struct RecordAssembler {
    ip: bool,
    request_body: bool,
    response_body: bool,
    body_minify: bool,
    bytes_received: bool,
    bytes_sent: bool,
}

impl RecordAssembler {
    pub fn new(config: &AccessLogConfig) -> Self {
        Self {
            ip: config.ip,
            request_body: config.request_body,
            response_body: config.response_body,
            body_minify: config.body_minify,
            bytes_received: config.bytes_received,
            bytes_sent: config.bytes_sent,
        }
    }

    pub fn assemble(&self, exchange: &Exchange, fields: Fields) -> LogRecord {
        let mut record = LogRecord::new(
            exchange.started_at,
            exchange.method.as_str(),
            exchange.path.as_str(),
            exchange.status,
        );
        record.latency = exchange.latency;
        record.query = parse_query(&exchange.raw_query);
        record.path_params = exchange.path_params.clone();
        record.fields = fields;

        if self.ip {
            record.ip = exchange.client_ip.clone();
        }
        if self.request_body {
            record.request_body = true;
            record.request = self.render_body(&exchange.request_body);
        }
        if self.response_body {
            record.response_body = true;
            record.response = self.render_body(&exchange.response_body);
        }
        if self.bytes_received {
            record.bytes_received = exchange.bytes_received;
        }
        if self.bytes_sent {
            record.bytes_sent = exchange.bytes_sent;
        }
        record
    }

    fn render_body(&self, body: &[u8]) -> String {
        if body.is_empty() {
            String::new()
        } else if self.body_minify {
            minify::minify(body)
        } else {
            minify::verbatim(body)
        }
    }
}

/// Split a raw query string into ordered `(key, raw value)` pairs.
///
/// Segments are separated by `&` and split on their first `=`; a segment
/// with no `=` has an empty value. Empty segments are skipped. Nothing is
/// decoded here.
pub fn parse_query(raw: &str) -> Vec<QueryEntry> {
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) => QueryEntry::new(key, value),
            None => QueryEntry::new(segment, ""),
        })
        .collect()
}

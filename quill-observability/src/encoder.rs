//! Uniform JSON access-record encoder.
//!
//! Builds each record directly into a byte buffer, key by key, in a fixed
//! order that downstream log shippers depend on:
//!
//! ```text
//! timestamp, server_name, environment, instance_key, log_type, latency,
//! code, method, path, [ip], [query], [params], [fields], req_id, user,
//! [request], [response], [bytes_received], [bytes_sent]
//! ```
//!
//! Bracketed keys are omitted when empty or zero. `req_id` and `user` are
//! always present and are `null` when the metadata set has no such entry.

use quill_core::config::{AccessLogConfig, ServiceIdentity};
use quill_core::error::QuillError;
use quill_core::record::LogRecord;
use quill_core::value::EntryValue;
use std::fmt::Write as _;

use crate::unescape::query_unescape;

/// Discriminator written as `log_type`.
pub const ACCESS_LOG_TYPE: &str = "access";

/// A metadata key whose value is duplicated as a top-level key.
#[derive(Debug, Clone, Copy)]
pub struct PromotedField {
    /// Metadata entry key to capture.
    pub key: &'static str,
    /// Top-level JSON key to emit.
    pub name: &'static str,
}

pub const PROMOTED_FIELDS: [PromotedField; 2] = [
    PromotedField { key: "req_id", name: "req_id" },
    PromotedField { key: "user", name: "user" },
];

/// Encoder for access records. Holds only read-only state, so one instance
/// can be shared across threads without locking.
#[derive(Debug, Clone)]
pub struct UniformJson {
    human_time: bool,
    time_format: String,
    /// `,"server_name":…,"environment":…,"instance_key":…,"log_type":"access"`,
    /// rendered once.
    identity_prefix: Vec<u8>,
}

impl UniformJson {
    pub fn new(identity: &ServiceIdentity, config: &AccessLogConfig) -> Result<Self, QuillError> {
        config.check_time_format()?;
        let mut identity_prefix = Vec::with_capacity(128);
        write_key(&mut identity_prefix, "server_name");
        write_str(&mut identity_prefix, &identity.server_name)?;
        write_key(&mut identity_prefix, "environment");
        write_str(&mut identity_prefix, &identity.environment)?;
        write_key(&mut identity_prefix, "instance_key");
        write_str(&mut identity_prefix, &identity.instance_key)?;
        write_key(&mut identity_prefix, "log_type");
        write_str(&mut identity_prefix, ACCESS_LOG_TYPE)?;

        Ok(Self {
            human_time: config.human_time,
            time_format: config.time_format.clone(),
            identity_prefix,
        })
    }

    /// Encode `record` into a fresh newline-terminated buffer.
    pub fn encode(&self, record: &LogRecord) -> Result<Vec<u8>, QuillError> {
        let mut buf = Vec::with_capacity(512 + record.request.len() + record.response.len());
        self.encode_into(record, &mut buf)?;
        Ok(buf)
    }

    /// Append one encoded record to `out`. On error `out` is left exactly as
    /// it was, so no partial record can reach the sink.
    pub fn encode_into(&self, record: &LogRecord, out: &mut Vec<u8>) -> Result<(), QuillError> {
        let start = out.len();
        let result = self.write_record(record, out);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn write_record(&self, r: &LogRecord, out: &mut Vec<u8>) -> Result<(), QuillError> {
        let mut num = itoa::Buffer::new();

        out.extend_from_slice(b"{\"timestamp\":");
        if self.human_time {
            let mut rendered = String::with_capacity(32);
            write!(rendered, "{}", r.now.format(&self.time_format)).map_err(|_| {
                QuillError::Encode(serde::ser::Error::custom(format!(
                    "cannot render timestamp with {:?}",
                    self.time_format
                )))
            })?;
            write_str(out, &rendered)?;
        } else {
            out.extend_from_slice(num.format(r.timestamp).as_bytes());
        }

        out.extend_from_slice(&self.identity_prefix);

        write_key(out, "latency");
        out.extend_from_slice(num.format(r.latency_ms()).as_bytes());
        write_key(out, "code");
        out.extend_from_slice(num.format(r.code).as_bytes());
        write_key(out, "method");
        write_str(out, &r.method)?;
        write_key(out, "path");
        write_str(out, &r.path)?;

        if !r.ip.is_empty() {
            write_key(out, "ip");
            write_str(out, &r.ip)?;
        }

        if !r.query.is_empty() {
            write_key(out, "query");
            out.push(b'[');
            for (i, q) in r.query.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let decoded = query_unescape(&q.value).map_err(|e| QuillError::UrlDecode {
                    key: q.key.clone(),
                    reason: e.to_string(),
                })?;
                open_entry(out, &q.key)?;
                write_str(out, &decoded)?;
                out.push(b'}');
            }
            out.push(b']');
        }

        if !r.path_params.is_empty() {
            write_key(out, "params");
            out.push(b'[');
            for (i, p) in r.path_params.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                open_entry(out, &p.key)?;
                p.value.write_json(out)?;
                out.push(b'}');
            }
            out.push(b']');
        }

        let mut promoted: [Option<&EntryValue>; PROMOTED_FIELDS.len()] =
            [None; PROMOTED_FIELDS.len()];

        if !r.fields.is_empty() {
            write_key(out, "fields");
            out.push(b'[');
            for (i, f) in r.fields.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                open_entry(out, &f.key)?;
                match &f.value {
                    EntryValue::UrlEncoded(raw) => {
                        let decoded = query_unescape(raw).map_err(|e| QuillError::UrlDecode {
                            key: f.key.clone(),
                            reason: e.to_string(),
                        })?;
                        write_str(out, &decoded)?;
                    }
                    value => value.write_json(out)?,
                }
                out.push(b'}');

                // Last occurrence wins; every occurrence stays in the array.
                if let Some(slot) = PROMOTED_FIELDS.iter().position(|p| p.key == f.key) {
                    promoted[slot] = Some(&f.value);
                }
            }
            out.push(b']');
        }

        for (field, value) in PROMOTED_FIELDS.iter().zip(promoted) {
            write_key(out, field.name);
            match value {
                Some(v) => v.write_json(out)?,
                None => out.extend_from_slice(b"null"),
            }
        }

        if r.request_body && !r.request.is_empty() {
            write_key(out, "request");
            write_str(out, &r.request)?;
        }
        if r.response_body && !r.response.is_empty() {
            write_key(out, "response");
            write_str(out, &r.response)?;
        }
        if r.bytes_received != 0 {
            write_key(out, "bytes_received");
            out.extend_from_slice(num.format(r.bytes_received).as_bytes());
        }
        if r.bytes_sent != 0 {
            write_key(out, "bytes_sent");
            out.extend_from_slice(num.format(r.bytes_sent).as_bytes());
        }

        out.extend_from_slice(b"}\n");
        Ok(())
    }
}

/// `,"key":`. Keys are static ASCII identifiers and need no escaping.
#[inline]
fn write_key(out: &mut Vec<u8>, key: &str) {
    out.extend_from_slice(b",\"");
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(b"\":");
}

#[inline]
fn write_str(out: &mut Vec<u8>, s: &str) -> Result<(), QuillError> {
    serde_json::to_writer(&mut *out, s)?;
    Ok(())
}

/// `{"key":<key>,"value":`. The caller writes the value and the closing brace.
#[inline]
fn open_entry(out: &mut Vec<u8>, key: &str) -> Result<(), QuillError> {
    out.extend_from_slice(b"{\"key\":");
    write_str(out, key)?;
    out.extend_from_slice(b",\"value\":");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use quill_core::record::{Entry, QueryEntry};
    use std::time::Duration;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            server_name: "svc".into(),
            environment: "prod".into(),
            instance_key: "i-1".into(),
        }
    }

    fn encoder(human_time: bool) -> UniformJson {
        let cfg = AccessLogConfig {
            human_time,
            ..AccessLogConfig::default()
        };
        UniformJson::new(&identity(), &cfg).unwrap()
    }

    fn record() -> LogRecord {
        let now = Local.timestamp_millis_opt(1_700_000_000_123).unwrap();
        LogRecord::new(now, "GET", "/users", 200)
    }

    fn encode_str(enc: &UniformJson, r: &LogRecord) -> String {
        String::from_utf8(enc.encode(r).unwrap()).unwrap()
    }

    fn parse(line: &str) -> serde_json::Value {
        serde_json::from_str(line.trim_end()).unwrap()
    }

    /// Assert that every `"key":` in `keys` occurs in `line`, in that order.
    fn assert_key_order(line: &str, keys: &[&str]) {
        let mut last = 0;
        for key in keys {
            let needle = format!("\"{key}\":");
            let pos = line[last..]
                .find(&needle)
                .unwrap_or_else(|| panic!("{key} missing or out of order in {line}"));
            last += pos + needle.len();
        }
    }

    // ── Fixed prefix & ordering ──────────────────────────────────

    #[test]
    fn leading_keys_are_in_fixed_order() {
        let line = encode_str(&encoder(false), &record());
        assert!(line.starts_with(
            r#"{"timestamp":1700000000123,"server_name":"svc","environment":"prod","instance_key":"i-1","log_type":"access","latency":0,"code":200,"method":"GET","path":"/users""#
        ));
        assert!(line.ends_with("}\n"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn human_time_uses_configured_format() {
        let r = record();
        let line = encode_str(&encoder(true), &r);
        let expected = r.now.format("%Y-%m-%d %H:%M:%S").to_string();
        assert_eq!(parse(&line)["timestamp"], expected.as_str());
    }

    #[test]
    fn invalid_time_format_is_rejected_at_construction() {
        let cfg = AccessLogConfig {
            time_format: "%Y-%Q".into(),
            ..AccessLogConfig::default()
        };
        let err = UniformJson::new(&identity(), &cfg).err().unwrap();
        assert!(matches!(err, QuillError::Config(_)));
    }

    #[test]
    fn full_record_emits_every_key_in_order() {
        let mut r = record();
        r.ip = "10.0.0.1".into();
        r.query = vec![QueryEntry::new("q", "a%20b")];
        r.path_params = vec![Entry::new("id", 7i64)];
        r.fields.set("req_id", "abc");
        r.fields.set("user", "alice");
        r.request_body = true;
        r.response_body = true;
        r.request = r#"{"in":1}"#.into();
        r.response = r#"{"out":2}"#.into();
        r.bytes_received = 8;
        r.bytes_sent = 9;

        let line = encode_str(&encoder(false), &r);
        assert_key_order(
            &line,
            &[
                "timestamp", "server_name", "environment", "instance_key", "log_type",
                "latency", "code", "method", "path", "ip", "query", "params", "fields",
                "req_id", "user", "request", "response", "bytes_received", "bytes_sent",
            ],
        );
        assert_eq!(parse(&line).as_object().unwrap().len(), 19);
    }

    // ── Latency ──────────────────────────────────────────────────

    #[test]
    fn latency_is_truncated_to_milliseconds() {
        let mut r = record();
        r.latency = Duration::from_nanos(1_500_000);
        let line = encode_str(&encoder(false), &r);
        assert!(line.contains(r#""latency":1,"#));
    }

    // ── Conditional emission ─────────────────────────────────────

    #[test]
    fn zero_and_empty_fields_are_omitted() {
        let line = encode_str(&encoder(false), &record());
        let v = parse(&line);
        for key in ["ip", "query", "params", "fields", "request", "response", "bytes_received", "bytes_sent"] {
            assert!(v.get(key).is_none(), "{key} should be omitted");
        }
    }

    #[test]
    fn bytes_sent_is_emitted_only_when_non_zero() {
        let mut r = record();
        assert!(!encode_str(&encoder(false), &r).contains("bytes_sent"));
        r.bytes_sent = 42;
        assert!(encode_str(&encoder(false), &r).contains(r#""bytes_sent":42"#));
    }

    #[test]
    fn bodies_require_capture_flag_and_content() {
        let mut r = record();
        r.request = "payload".into();
        r.response = String::new();
        r.response_body = true;
        let v = parse(&encode_str(&encoder(false), &r));
        assert!(v.get("request").is_none(), "capture flag off");
        assert!(v.get("response").is_none(), "body empty");

        r.request_body = true;
        let v = parse(&encode_str(&encoder(false), &r));
        assert_eq!(v["request"], "payload");
    }

    // ── Promoted fields ──────────────────────────────────────────

    #[test]
    fn promoted_keys_are_null_without_metadata() {
        let v = parse(&encode_str(&encoder(false), &record()));
        assert!(v["req_id"].is_null());
        assert!(v["user"].is_null());
    }

    #[test]
    fn correlation_id_is_promoted_and_kept_in_array() {
        let mut r = record();
        r.fields.set("req_id", "abc-123");
        r.fields.set("url_params", EntryValue::url_encoded("x=1"));
        let v = parse(&encode_str(&encoder(false), &r));
        assert_eq!(v["req_id"], "abc-123");
        assert!(v["user"].is_null());
        assert_eq!(v["fields"][0], serde_json::json!({"key": "req_id", "value": "abc-123"}));
        assert_eq!(v["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn last_duplicate_designated_key_is_promoted() {
        let mut r = record();
        r.fields.set("user", "first");
        r.fields.set("user", "second");
        let v = parse(&encode_str(&encoder(false), &r));
        assert_eq!(v["user"], "second");
        assert_eq!(v["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn promoted_value_keeps_its_type() {
        let mut r = record();
        r.fields.set("req_id", 99i64);
        let line = encode_str(&encoder(false), &r);
        assert!(line.contains(r#""req_id":99,"user":null"#));
    }

    // ── URL decoding ─────────────────────────────────────────────

    #[test]
    fn query_values_are_url_decoded() {
        let mut r = record();
        r.query = vec![QueryEntry::new("q", "a%20b")];
        let line = encode_str(&encoder(false), &r);
        assert!(line.contains(r#""query":[{"key":"q","value":"a b"}]"#));
    }

    #[test]
    fn url_encoded_metadata_is_decoded_in_array() {
        let mut r = record();
        r.fields.set("url_params", EntryValue::url_encoded("name=%E5%BC%A0&x=1+2"));
        let v = parse(&encode_str(&encoder(false), &r));
        assert_eq!(v["fields"][0]["value"], "name=张&x=1 2");
    }

    #[test]
    fn decode_failure_aborts_without_partial_output() {
        let enc = encoder(false);
        let mut r = record();
        r.query = vec![QueryEntry::new("q", "bad%zz")];

        let mut buf = b"previous\n".to_vec();
        let err = enc.encode_into(&r, &mut buf).unwrap_err();
        assert!(matches!(err, QuillError::UrlDecode { ref key, .. } if key == "q"));
        assert_eq!(buf, b"previous\n");
    }

    #[test]
    fn decode_failure_in_metadata_is_an_error() {
        let mut r = record();
        r.fields.set("url_params", EntryValue::url_encoded("%"));
        assert!(encoder(false).encode(&r).is_err());
    }

    // ── Values & escaping ────────────────────────────────────────

    #[test]
    fn path_params_use_value_serialization() {
        let mut r = record();
        r.path_params = vec![
            Entry::new("id", 7i64),
            Entry::new("flag", true),
            Entry::new("obj", serde_json::json!({"k": "v"})),
            Entry::new("raw", EntryValue::raw("[1,2]").unwrap()),
        ];
        let line = encode_str(&encoder(false), &r);
        assert!(line.contains(
            r#""params":[{"key":"id","value":7},{"key":"flag","value":true},{"key":"obj","value":{"k":"v"}},{"key":"raw","value":[1,2]}]"#
        ));
    }

    #[test]
    fn strings_are_escaped_without_html_escaping() {
        let mut r = record();
        r.path = "/a\"b\n<c>&".into();
        let line = encode_str(&encoder(false), &r);
        assert!(line.contains(r#""path":"/a\"b\n<c>&""#));
        assert_eq!(parse(&line)["path"], "/a\"b\n<c>&");
    }

    #[test]
    fn identity_strings_are_escaped() {
        let id = ServiceIdentity {
            server_name: "s\"vc".into(),
            environment: "prod".into(),
            instance_key: String::new(),
        };
        let enc = UniformJson::new(&id, &AccessLogConfig::default()).unwrap();
        let v = parse(&encode_str(&enc, &record()));
        assert_eq!(v["server_name"], "s\"vc");
        assert_eq!(v["instance_key"], "");
    }

    // ── Determinism ──────────────────────────────────────────────

    #[test]
    fn re_encoding_is_byte_identical() {
        let mut r = record();
        r.fields.set("req_id", "abc");
        r.fields.set("url_params", EntryValue::url_encoded("a=%20"));
        r.query = vec![QueryEntry::new("a", "%20")];
        let enc = encoder(true);
        let first = enc.encode(&r).unwrap();
        for _ in 0..5 {
            assert_eq!(enc.encode(&r).unwrap(), first);
        }
    }
}

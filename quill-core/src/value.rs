//! Typed values for path-param and metadata entries.
//!
//! Every variant has one serialization rule, applied by [`EntryValue::write_json`]:
//!
//! | Variant      | Output                                                    |
//! |--------------|-----------------------------------------------------------|
//! | `Str`        | JSON string                                               |
//! | `Int`        | JSON integer                                              |
//! | `Float`      | JSON number (`null` when not finite)                      |
//! | `Bool`       | `true` / `false`                                          |
//! | `Object`     | the value's own JSON form                                 |
//! | `Raw`        | the pre-encoded JSON text, verbatim                       |
//! | `UrlEncoded` | JSON string of the still-encoded text                     |
//!
//! `UrlEncoded` values are decoded by the record encoder when they appear in
//! the metadata array; everywhere else they behave like `Str`.

use crate::error::QuillError;
use serde_json::value::RawValue;

#[derive(Debug, Clone)]
pub enum EntryValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Object(serde_json::Value),
    Raw(Box<RawValue>),
    UrlEncoded(String),
}

impl EntryValue {
    /// Wrap already-encoded JSON text. Fails when `json` is not valid JSON.
    pub fn raw(json: impl Into<String>) -> Result<Self, QuillError> {
        Ok(EntryValue::Raw(RawValue::from_string(json.into())?))
    }

    pub fn url_encoded(s: impl Into<String>) -> Self {
        EntryValue::UrlEncoded(s.into())
    }

    /// The text of string-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntryValue::Str(s) | EntryValue::UrlEncoded(s) => Some(s),
            _ => None,
        }
    }

    /// Append the JSON form of this value to `out`.
    pub fn write_json(&self, out: &mut Vec<u8>) -> Result<(), QuillError> {
        match self {
            EntryValue::Str(s) | EntryValue::UrlEncoded(s) => serde_json::to_writer(out, s)?,
            EntryValue::Int(n) => {
                let mut buf = itoa::Buffer::new();
                out.extend_from_slice(buf.format(*n).as_bytes());
            }
            EntryValue::Float(f) => serde_json::to_writer(out, f)?,
            EntryValue::Bool(true) => out.extend_from_slice(b"true"),
            EntryValue::Bool(false) => out.extend_from_slice(b"false"),
            EntryValue::Object(v) => serde_json::to_writer(out, v)?,
            EntryValue::Raw(raw) => out.extend_from_slice(raw.get().as_bytes()),
        }
        Ok(())
    }
}

impl PartialEq for EntryValue {
    fn eq(&self, other: &Self) -> bool {
        use EntryValue::*;
        match (self, other) {
            (Str(a), Str(b)) | (UrlEncoded(a), UrlEncoded(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Raw(a), Raw(b)) => a.get() == b.get(),
            _ => false,
        }
    }
}

impl From<&str> for EntryValue {
    fn from(s: &str) -> Self {
        EntryValue::Str(s.to_string())
    }
}

impl From<String> for EntryValue {
    fn from(s: String) -> Self {
        EntryValue::Str(s)
    }
}

impl From<i64> for EntryValue {
    fn from(n: i64) -> Self {
        EntryValue::Int(n)
    }
}

impl From<f64> for EntryValue {
    fn from(f: f64) -> Self {
        EntryValue::Float(f)
    }
}

impl From<bool> for EntryValue {
    fn from(b: bool) -> Self {
        EntryValue::Bool(b)
    }
}

impl From<serde_json::Value> for EntryValue {
    fn from(v: serde_json::Value) -> Self {
        EntryValue::Object(v)
    }
}

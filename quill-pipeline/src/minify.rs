//! Body minification for captured payloads.

use serde_json::value::RawValue;

/// Render a captured body as a single-line string.
///
/// A body that parses as JSON is re-emitted in compact form with member order
/// preserved. Anything else is trimmed and has its line breaks removed.
/// Bytes that are not UTF-8 are replaced lossily.
pub fn minify(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if let Some(compact) = compact_json(&text) {
        return compact;
    }
    strip_line_breaks(text.trim())
}

/// Render a captured body without minifying it.
pub fn verbatim(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

fn compact_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    // Validate only; RawValue borrows the input untouched.
    let raw: &RawValue = serde_json::from_str(trimmed).ok()?;
    if !raw.get().bytes().any(|b| b.is_ascii_whitespace()) {
        return Some(raw.get().to_string());
    }
    let mut out = Vec::with_capacity(trimmed.len());
    compact_into(raw.get(), &mut out);
    String::from_utf8(out).ok()
}

/// Copy `json` (known valid) to `out`, dropping whitespace outside strings.
fn compact_into(json: &str, out: &mut Vec<u8>) {
    let mut in_string = false;
    let mut escaped = false;
    for &b in json.as_bytes() {
        if in_string {
            out.push(b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => {
                in_string = true;
                out.push(b);
            }
            b' ' | b'\t' | b'\n' | b'\r' => {}
            _ => out.push(b),
        }
    }
}

fn strip_line_breaks(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

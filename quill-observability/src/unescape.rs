//! Strict query-string unescaping.
//!
//! `+` becomes a space and `%XX` becomes the byte `0xXX`. A `%` that is not
//! followed by two hex digits, or a decoded byte sequence that is not UTF-8,
//! is an error rather than being passed through.

use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UnescapeError {
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),

    #[error("decoded value is not valid UTF-8")]
    InvalidUtf8,
}

pub fn query_unescape(s: &str) -> Result<Cow<'_, str>, UnescapeError> {
    if !s.bytes().any(|b| b == b'%' || b == b'+') {
        return Ok(Cow::Borrowed(s));
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(hex_val);
                let lo = bytes.get(i + 2).copied().and_then(hex_val);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        let end = (i + 3).min(bytes.len());
                        return Err(UnescapeError::InvalidEscape(
                            String::from_utf8_lossy(&bytes[i..end]).into_owned(),
                        ));
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out)
        .map(Cow::Owned)
        .map_err(|_| UnescapeError::InvalidUtf8)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_borrowed() {
        let out = query_unescape("abc").unwrap();
        assert!(matches!(out, Cow::Borrowed("abc")));
    }

    #[test]
    fn percent_and_plus_are_decoded() {
        assert_eq!(query_unescape("a%20b").unwrap(), "a b");
        assert_eq!(query_unescape("a+b").unwrap(), "a b");
        assert_eq!(query_unescape("x=1%26y%3D2").unwrap(), "x=1&y=2");
    }

    #[test]
    fn multibyte_sequences_are_decoded() {
        assert_eq!(query_unescape("%E4%BD%A0%E5%A5%BD").unwrap(), "你好");
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert_eq!(
            query_unescape("%zz"),
            Err(UnescapeError::InvalidEscape("%zz".into()))
        );
        assert_eq!(
            query_unescape("abc%2"),
            Err(UnescapeError::InvalidEscape("%2".into()))
        );
        assert!(query_unescape("%").is_err());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert_eq!(query_unescape("%FF%FE"), Err(UnescapeError::InvalidUtf8));
    }
}

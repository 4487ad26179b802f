use quill_core::exchange::Exchange;
use quill_core::record::Fields;
use quill_observability::logger::UNKNOWN_CALLER;

use super::USER_KEY;
use crate::extractor::FieldExtractor;

/// Records the acting user from a request header, `"-"` when absent or empty.
pub struct CallerIdentity {
    header: String,
}

impl CallerIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::new("X-User-Name")
    }
}

impl FieldExtractor for CallerIdentity {
    fn name(&self) -> &str {
        USER_KEY
    }

    fn extract(&self, exchange: &Exchange, fields: &mut Fields) {
        match exchange.header(&self.header) {
            Some(user) if !user.is_empty() => fields.set(USER_KEY, user.into_owned()),
            _ => fields.set(USER_KEY, UNKNOWN_CALLER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn user_of(exchange: &Exchange) -> String {
        let mut fields = Fields::new();
        CallerIdentity::default().extract(exchange, &mut fields);
        fields.get("user").and_then(|v| v.as_str()).unwrap().to_string()
    }

    #[test]
    fn header_value_is_recorded() {
        let mut ex = Exchange::new("id", "GET", "/");
        ex.headers.insert("x-user-name", HeaderValue::from_static("alice"));
        assert_eq!(user_of(&ex), "alice");
    }

    #[test]
    fn absent_header_yields_sentinel() {
        assert_eq!(user_of(&Exchange::new("id", "GET", "/")), "-");
    }

    #[test]
    fn empty_header_yields_sentinel() {
        let mut ex = Exchange::new("id", "GET", "/");
        ex.headers.insert("x-user-name", HeaderValue::from_static(""));
        assert_eq!(user_of(&ex), "-");
    }

    #[test]
    fn utf8_header_value_is_recorded() {
        let mut ex = Exchange::new("id", "GET", "/");
        ex.headers
            .insert("x-user-name", HeaderValue::from_bytes("张三".as_bytes()).unwrap());
        assert_eq!(user_of(&ex), "张三");
    }

    #[test]
    fn custom_header_is_honoured() {
        let mut ex = Exchange::new("id", "GET", "/");
        ex.headers.insert("x-caller", HeaderValue::from_static("svc-a"));
        let mut fields = Fields::new();
        CallerIdentity::new("X-Caller").extract(&ex, &mut fields);
        assert_eq!(fields.get("user").and_then(|v| v.as_str()), Some("svc-a"));
    }
}

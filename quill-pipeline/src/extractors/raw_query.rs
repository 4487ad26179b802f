use quill_core::exchange::Exchange;
use quill_core::record::Fields;
use quill_core::value::EntryValue;

use super::URL_PARAMS_KEY;
use crate::extractor::FieldExtractor;

/// Records the raw query string, still URL-encoded. The encoder decodes it.
pub struct RawQuery;

impl FieldExtractor for RawQuery {
    fn name(&self) -> &str {
        URL_PARAMS_KEY
    }

    fn extract(&self, exchange: &Exchange, fields: &mut Fields) {
        fields.set(URL_PARAMS_KEY, EntryValue::url_encoded(exchange.raw_query.as_str()));
    }
}

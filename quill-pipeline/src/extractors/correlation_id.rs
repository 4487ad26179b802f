use quill_core::exchange::Exchange;
use quill_core::record::Fields;

use super::REQ_ID_KEY;
use crate::extractor::FieldExtractor;

/// Records the per-request correlation id.
///
/// Always sets an entry; an exchange that arrives without an id gets a fresh
/// UUID so records can still be joined with the application log.
pub struct CorrelationId;

impl FieldExtractor for CorrelationId {
    fn name(&self) -> &str {
        REQ_ID_KEY
    }

    fn extract(&self, exchange: &Exchange, fields: &mut Fields) {
        if exchange.id.is_empty() {
            fields.set(REQ_ID_KEY, uuid::Uuid::new_v4().to_string());
        } else {
            fields.set(REQ_ID_KEY, exchange.id.as_str());
        }
    }
}

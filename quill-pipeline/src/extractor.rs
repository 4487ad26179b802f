use quill_core::exchange::Exchange;
use quill_core::record::Fields;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

/// Adds metadata to a record before it is encoded.
///
/// An extractor appends zero or one entry and never removes or overwrites
/// entries added by earlier extractors. It must not block and must not fail:
/// when it cannot determine a value it records a default instead.
pub trait FieldExtractor: Send + Sync {
    /// Registry name, also used as the metadata key by the built-ins.
    fn name(&self) -> &str;

    fn extract(&self, exchange: &Exchange, fields: &mut Fields);
}

/// Extractors to run for every record, in configured order.
#[derive(Clone, Default)]
pub struct ExtractorChain {
    extractors: Vec<Arc<dyn FieldExtractor>>,
}

impl ExtractorChain {
    pub fn new(extractors: Vec<Arc<dyn FieldExtractor>>) -> Self {
        Self { extractors }
    }

    /// Run every extractor. A panicking extractor is skipped and logged; the
    /// remaining extractors still run.
    pub fn run(&self, exchange: &Exchange) -> Fields {
        let mut fields = Fields::new();
        for extractor in &self.extractors {
            let result = catch_unwind(AssertUnwindSafe(|| extractor.extract(exchange, &mut fields)));
            if result.is_err() {
                warn!(extractor = extractor.name(), req_id = %exchange.id, "Field extractor panicked, skipping");
            }
        }
        fields
    }

    pub fn names(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

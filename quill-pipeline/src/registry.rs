use quill_core::config::AccessLogConfig;
use quill_core::error::QuillError;
use std::collections::HashMap;
use std::sync::Arc;

use crate::extractor::{ExtractorChain, FieldExtractor};
use crate::extractors::{CallerIdentity, CorrelationId, RawQuery};

/// Named field extractors. Built once at startup, immutable thereafter.
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn FieldExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry holding the built-in extractors, configured from `config`.
    pub fn with_builtins(config: &AccessLogConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CorrelationId));
        registry.register(Arc::new(CallerIdentity::new(config.caller_header.clone())));
        registry.register(Arc::new(RawQuery));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn FieldExtractor>) {
        let name = extractor.name().to_string();
        tracing::debug!(extractor = %name, "Registered field extractor");
        self.extractors.insert(name, extractor);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FieldExtractor>> {
        self.extractors.get(name)
    }

    /// Chain of the named extractors, in the given order.
    pub fn build_chain<S: AsRef<str>>(&self, names: &[S]) -> Result<ExtractorChain, QuillError> {
        let mut chain = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let extractor = self
                .get(name)
                .ok_or_else(|| QuillError::Config(format!("unknown field extractor {name:?}")))?;
            chain.push(Arc::clone(extractor));
        }
        Ok(ExtractorChain::new(chain))
    }

    pub fn list(&self) -> Vec<&str> {
        self.extractors.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

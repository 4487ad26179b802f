pub mod assemble;
pub mod coordinator;
pub mod dispatch;
pub mod extractor;
pub mod extractors;
pub mod minify;
pub mod registry;

pub use coordinator::AccessLog;
pub use extractor::{ExtractorChain, FieldExtractor};
pub use registry::ExtractorRegistry;

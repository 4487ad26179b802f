pub mod encoder;
pub mod logger;
pub mod metrics;
pub mod retention;
pub mod rotating_writer;
pub mod unescape;

pub use encoder::UniformJson;
pub use logger::RequestLogContext;
pub use metrics::PipelineMetrics;
pub use rotating_writer::{LogSink, RotatingFileWriter};

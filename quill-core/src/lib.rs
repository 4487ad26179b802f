pub mod config;
pub mod error;
pub mod exchange;
pub mod record;
pub mod value;

pub use config::{QuillConfig, ServiceIdentity};
pub use error::QuillError;
pub use exchange::Exchange;
pub use record::{Entry, Fields, LogRecord, QueryEntry};
pub use value::EntryValue;

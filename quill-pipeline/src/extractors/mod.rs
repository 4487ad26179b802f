//! Built-in field extractors.

pub mod caller_identity;
pub mod correlation_id;
pub mod raw_query;

pub use caller_identity::CallerIdentity;
pub use correlation_id::CorrelationId;
pub use raw_query::RawQuery;

/// Metadata key of the correlation id (promoted to a top-level key).
pub const REQ_ID_KEY: &str = "req_id";
/// Metadata key of the caller identity (promoted to a top-level key).
pub const USER_KEY: &str = "user";
/// Metadata key of the raw, URL-encoded query string.
pub const URL_PARAMS_KEY: &str = "url_params";

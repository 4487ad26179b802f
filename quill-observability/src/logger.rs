//! Per-request application logging context.
//!
//! Application code logs through `tracing`; this module supplies the common
//! fields (service identity, caller, correlation id) as a span built from an
//! immutable per-request value instead of a shared, mutable logger handle.

use quill_core::config::ServiceIdentity;
use quill_core::exchange::Exchange;
use tracing::Span;

/// Caller identity used when the request carries none.
pub const UNKNOWN_CALLER: &str = "-";

#[derive(Debug, Clone)]
pub struct RequestLogContext<'a> {
    identity: &'a ServiceIdentity,
    req_id: String,
    user: String,
}

impl<'a> RequestLogContext<'a> {
    pub fn new(identity: &'a ServiceIdentity, req_id: impl Into<String>, user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            identity,
            req_id: req_id.into(),
            user: if user.is_empty() { UNKNOWN_CALLER.to_string() } else { user },
        }
    }

    /// Context for `exchange`, reading the caller from `caller_header`.
    pub fn from_exchange(identity: &'a ServiceIdentity, exchange: &Exchange, caller_header: &str) -> Self {
        Self::new(
            identity,
            exchange.id.clone(),
            exchange.header(caller_header).unwrap_or_default(),
        )
    }

    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Span carrying the request and service fields.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            logic_type = %"logic",
            user = %self.user,
            req_id = %self.req_id,
            server_name = %self.identity.server_name,
            environment = %self.identity.environment,
            instance_key = %self.identity.instance_key,
        )
    }
}

/// Span carrying only the service fields, for work outside a request.
pub fn service_span(identity: &ServiceIdentity) -> Span {
    tracing::info_span!(
        "service",
        logic_type = %"logic",
        server_name = %identity.server_name,
        environment = %identity.environment,
        instance_key = %identity.instance_key,
    )
}

//! Access-log middleware.
//!
//! Times the inner handler and hands the completed [`Exchange`] to the
//! pipeline. Bodies with a known length of at most [`MAX_BODY_BYTES`] are
//! buffered and captured; anything larger or of unknown length passes through
//! untouched and is logged without its body. The middleware never changes a
//! response.
//!
//! A record is written on every exit: normal completion, a panicking handler
//! (status 500, then the panic continues), and a request future dropped
//! before completion (status 499).

use axum::body::{Body, HttpBody, to_bytes};
use axum::extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use http::request::Parts;
use quill_core::exchange::Exchange;
use quill_core::record::Entry;
use quill_pipeline::AccessLog;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::AppState;

/// Header carrying the correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest request or response body captured for logging.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Status recorded for a request whose future was dropped before completion.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

pub async fn access_log(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let (mut parts, body) = req.into_parts();
    let exchange = exchange_from_parts(&mut parts, &state).await;
    let mut pending = PendingRecord::new(Arc::clone(&state.access_log), exchange, start);

    let body = match capturable_len(&body) {
        Some(_) => match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => {
                let exchange = &mut pending.exchange;
                exchange.bytes_received = bytes.len() as u64;
                exchange.request_body = bytes.clone();
                Body::from(bytes)
            }
            Err(e) => {
                warn!(error = %e, req_id = %pending.exchange.id, "Failed to read request body");
                pending.exchange.status = StatusCode::BAD_REQUEST.as_u16();
                pending.finish();
                return StatusCode::BAD_REQUEST.into_response();
            }
        },
        None => {
            pending.exchange.bytes_received = body.size_hint().exact().unwrap_or_default();
            body
        }
    };

    let req = Request::from_parts(parts, body);
    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            state.access_log.log_panic(pending.disarm(), &*panic);
            std::panic::resume_unwind(panic);
        }
    };

    let (mut parts, body) = response.into_parts();
    let body = match capturable_len(&body) {
        Some(len) => match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => {
                let exchange = &mut pending.exchange;
                exchange.bytes_sent = len;
                exchange.response_body = bytes.clone();
                Body::from(bytes)
            }
            Err(e) => {
                warn!(error = %e, req_id = %pending.exchange.id, "Response body failed while buffering");
                Body::empty()
            }
        },
        None => {
            pending.exchange.bytes_sent = body.size_hint().exact().unwrap_or_default();
            body
        }
    };

    let exchange = &mut pending.exchange;
    exchange.status = parts.status.as_u16();
    if let Ok(id) = HeaderValue::from_str(&exchange.id) {
        parts.headers.insert(REQUEST_ID_HEADER, id);
    }
    pending.finish();

    Response::from_parts(parts, body)
}

/// Exact body length when it is small enough to capture.
fn capturable_len(body: &Body) -> Option<u64> {
    body.size_hint()
        .exact()
        .filter(|len| *len <= MAX_BODY_BYTES as u64)
}

/// An exchange that is logged when dropped, unless disarmed.
///
/// Dropping it without [`PendingRecord::finish`] means the request future was
/// cancelled; the record then carries [`CLIENT_CLOSED_REQUEST`].
struct PendingRecord {
    access_log: Arc<AccessLog>,
    exchange: Exchange,
    start: Instant,
    completed: bool,
    armed: bool,
}

impl PendingRecord {
    fn new(access_log: Arc<AccessLog>, exchange: Exchange, start: Instant) -> Self {
        Self {
            access_log,
            exchange,
            start,
            completed: false,
            armed: true,
        }
    }

    /// Log the exchange as completed.
    fn finish(mut self) {
        self.completed = true;
    }

    /// Take the exchange without logging it.
    fn disarm(mut self) -> Exchange {
        self.armed = false;
        let mut exchange = std::mem::replace(&mut self.exchange, Exchange::new("", "", ""));
        exchange.latency = self.start.elapsed();
        exchange
    }
}

impl Drop for PendingRecord {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut exchange = std::mem::replace(&mut self.exchange, Exchange::new("", "", ""));
        exchange.latency = self.start.elapsed();
        if !self.completed {
            exchange.status = CLIENT_CLOSED_REQUEST;
            debug!(req_id = %exchange.id, path = %exchange.path, "Request dropped before completion");
        }
        let _ = self.access_log.log(exchange);
    }
}

async fn exchange_from_parts(parts: &mut Parts, state: &AppState) -> Exchange {
    let id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut exchange = Exchange::new(id, parts.method.as_str(), parts.uri.path());
    exchange.raw_query = parts.uri.query().unwrap_or_default().to_string();
    exchange.headers = parts.headers.clone();
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        exchange.client_ip = addr.ip().to_string();
    }

    if let Ok(params) = RawPathParams::from_request_parts(parts, state).await {
        exchange.path_params = params.iter().map(|(k, v)| Entry::new(k, v)).collect();
    }
    exchange
}

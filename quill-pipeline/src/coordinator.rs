//! Per-request pipeline: extract metadata, assemble the record, dispatch it.

use quill_core::config::{QuillConfig, ServiceIdentity};
use quill_core::error::QuillError;
use quill_core::exchange::Exchange;
use quill_observability::encoder::UniformJson;
use quill_observability::logger::RequestLogContext;
use quill_observability::metrics::PipelineMetrics;
use quill_observability::rotating_writer::LogSink;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::assemble::RecordAssembler;
use crate::dispatch::{Dispatcher, RecordWriter};
use crate::extractor::ExtractorChain;
use crate::registry::ExtractorRegistry;

/// Access-log pipeline shared by every request handler.
///
/// Logging is best-effort: [`AccessLog::log`] reports failures through
/// `tracing` and metrics before returning them, and callers on the request
/// path are expected to ignore the result.
pub struct AccessLog {
    identity: ServiceIdentity,
    caller_header: String,
    chain: ExtractorChain,
    assembler: RecordAssembler,
    dispatcher: Dispatcher,
}

impl AccessLog {
    /// Pipeline using the built-in extractors.
    pub fn new(
        config: &QuillConfig,
        sink: Arc<dyn LogSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, QuillError> {
        let registry = ExtractorRegistry::with_builtins(&config.access_log);
        Self::with_registry(config, &registry, sink, metrics)
    }

    /// Pipeline drawing the configured extractors from `registry`.
    pub fn with_registry(
        config: &QuillConfig,
        registry: &ExtractorRegistry,
        sink: Arc<dyn LogSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, QuillError> {
        config.validate()?;
        let chain = registry.build_chain(&config.access_log.extractors)?;
        let encoder = UniformJson::new(&config.identity, &config.access_log)?;
        let writer = RecordWriter::new(config.identity.clone(), encoder, sink, metrics);
        let dispatcher = Dispatcher::new(&config.dispatch, writer)?;

        info!(
            extractors = ?chain.names(),
            mode = ?config.dispatch.mode,
            "Access log pipeline ready"
        );
        Ok(Self {
            identity: config.identity.clone(),
            caller_header: config.access_log.caller_header.clone(),
            chain,
            assembler: RecordAssembler::new(&config.access_log),
            dispatcher,
        })
    }

    /// Log one completed exchange.
    pub fn log(&self, exchange: Exchange) -> Result<(), QuillError> {
        let fields = self.chain.run(&exchange);
        let record = self.assembler.assemble(&exchange, fields);
        self.dispatcher.submit(record)
    }

    /// Log a best-effort record for an exchange whose handler panicked.
    /// The record carries status 500 regardless of what was set before.
    pub fn log_panic(&self, mut exchange: Exchange, panic: &(dyn Any + Send)) {
        exchange.status = 500;
        {
            let ctx = RequestLogContext::from_exchange(&self.identity, &exchange, &self.caller_header);
            let _guard = ctx.span().entered();
            error!(
                method = %exchange.method,
                path = %exchange.path,
                panic = panic_message(panic),
                "Request handler panicked"
            );
        }
        let _ = self.log(exchange);
    }

    /// Run `handler` for `exchange` and log the result.
    ///
    /// Latency is measured around the handler. If the handler panics a
    /// record with status 500 is logged first and the panic then continues
    /// to unwind.
    pub fn observe<F, R>(&self, mut exchange: Exchange, handler: F) -> R
    where
        F: FnOnce(&mut Exchange) -> R,
    {
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&mut exchange)));
        exchange.latency = start.elapsed();
        match outcome {
            Ok(out) => {
                let _ = self.log(exchange);
                out
            }
            Err(panic) => {
                self.log_panic(exchange, &*panic);
                resume_unwind(panic)
            }
        }
    }

    /// Stop accepting records, drain queued ones, and flush the sink.
    pub fn close(&self) -> Result<(), QuillError> {
        self.dispatcher.close()
    }

    /// Records dropped because the async queue was full.
    pub fn dropped(&self) -> u64 {
        self.dispatcher.dropped()
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }
}

impl Drop for AccessLog {
    fn drop(&mut self) {
        if let Err(e) = self.dispatcher.close() {
            warn!(error = %e, "Access log close failed");
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

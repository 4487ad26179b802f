//! Record dispatch: encode and write on the caller, or hand off to a single
//! background writer through a bounded queue.
//!
//! The async queue drops the newest record when full. The submitting caller
//! never blocks; the drop is counted (`queue_full`) and logged.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use quill_core::config::{DispatchConfig, DispatchMode, ServiceIdentity};
use quill_core::error::QuillError;
use quill_core::record::LogRecord;
use quill_observability::encoder::UniformJson;
use quill_observability::logger::RequestLogContext;
use quill_observability::metrics::PipelineMetrics;
use quill_observability::rotating_writer::LogSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::extractors::{REQ_ID_KEY, USER_KEY};

/// Name of the background writer thread.
pub const WRITER_THREAD_NAME: &str = "quill-access-log";

/// Encodes records and writes them to the sink, reporting failures.
pub struct RecordWriter {
    identity: ServiceIdentity,
    encoder: UniformJson,
    sink: Arc<dyn LogSink>,
    metrics: Arc<PipelineMetrics>,
}

impl RecordWriter {
    pub fn new(
        identity: ServiceIdentity,
        encoder: UniformJson,
        sink: Arc<dyn LogSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            identity,
            encoder,
            sink,
            metrics,
        }
    }

    /// Encode and write one record. A failure drops the record; it is logged
    /// in the record's request context and counted before being returned.
    pub fn write(&self, record: &LogRecord) -> Result<(), QuillError> {
        let buf = match self.encoder.encode(record) {
            Ok(buf) => buf,
            Err(e) => {
                self.report(record, &e, "encode", "Dropping access record: encode failed");
                return Err(e);
            }
        };
        if let Err(e) = self.sink.write_record(&buf) {
            self.report(record, &e, "sink", "Dropping access record: sink write failed");
            return Err(e);
        }
        self.metrics.record_written();
        Ok(())
    }

    pub fn flush(&self) -> Result<(), QuillError> {
        self.sink.flush()
    }

    fn report(&self, record: &LogRecord, err: &QuillError, reason: &str, msg: &str) {
        self.metrics.record_dropped(reason);
        let field = |key: &str| {
            record
                .fields
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let ctx = RequestLogContext::new(&self.identity, field(REQ_ID_KEY), field(USER_KEY));
        let _guard = ctx.span().entered();
        error!(error = %err, kind = err.kind(), path = %record.path, code = record.code, "{msg}");
    }
}

/// Sync or async hand-off of assembled records.
pub enum Dispatcher {
    Sync(Arc<RecordWriter>),
    Async(AsyncDispatcher),
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig, writer: RecordWriter) -> Result<Self, QuillError> {
        let writer = Arc::new(writer);
        match config.mode {
            DispatchMode::Sync => Ok(Self::Sync(writer)),
            DispatchMode::Async => Ok(Self::Async(AsyncDispatcher::spawn(writer, config.buffer_size)?)),
        }
    }

    pub fn submit(&self, record: LogRecord) -> Result<(), QuillError> {
        match self {
            Self::Sync(writer) => writer.write(&record),
            Self::Async(dispatcher) => dispatcher.submit(record),
        }
    }

    /// Stop accepting records, drain anything queued, and flush the sink.
    /// Safe to call more than once.
    pub fn close(&self) -> Result<(), QuillError> {
        match self {
            Self::Sync(writer) => writer.flush(),
            Self::Async(dispatcher) => dispatcher.close(),
        }
    }

    /// Records dropped because the async queue was full.
    pub fn dropped(&self) -> u64 {
        match self {
            Self::Sync(_) => 0,
            Self::Async(dispatcher) => dispatcher.dropped(),
        }
    }
}

/// One background writer fed by a bounded queue, so records are written in
/// arrival order.
pub struct AsyncDispatcher {
    tx: RwLock<Option<Sender<LogRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    writer: Arc<RecordWriter>,
    dropped: AtomicU64,
}

impl AsyncDispatcher {
    pub fn spawn(writer: Arc<RecordWriter>, buffer_size: usize) -> Result<Self, QuillError> {
        if buffer_size == 0 {
            return Err(QuillError::Config("dispatch.buffer_size must be > 0".into()));
        }
        let (tx, rx) = bounded(buffer_size);
        let worker_writer = Arc::clone(&writer);
        let handle = std::thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || writer_loop(rx, worker_writer))?;

        info!(buffer_size, "Async access log writer started");
        Ok(Self {
            tx: RwLock::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            writer,
            dropped: AtomicU64::new(0),
        })
    }

    /// Queue `record` for the writer. When the queue is full the record is
    /// dropped and `Ok` is still returned.
    pub fn submit(&self, record: LogRecord) -> Result<(), QuillError> {
        let tx = self
            .tx
            .read()
            .map_err(|_| QuillError::Internal("dispatch lock poisoned".into()))?;
        let Some(tx) = tx.as_ref() else {
            return Err(QuillError::SinkClosed);
        };
        match tx.try_send(record) {
            Ok(()) => {
                self.writer.metrics.set_queue_depth(tx.len());
                Ok(())
            }
            Err(TrySendError::Full(record)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.writer.metrics.record_dropped("queue_full");
                warn!(
                    path = %record.path,
                    capacity = tx.capacity().unwrap_or_default(),
                    dropped_total = total,
                    "Access log queue full, dropping record"
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(QuillError::SinkClosed),
        }
    }

    pub fn close(&self) -> Result<(), QuillError> {
        // Dropping the only sender lets the writer drain and exit.
        let sender = self
            .tx
            .write()
            .map_err(|_| QuillError::Internal("dispatch lock poisoned".into()))?
            .take();
        drop(sender);

        let handle = self
            .worker
            .lock()
            .map_err(|_| QuillError::Internal("dispatch lock poisoned".into()))?
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Access log writer thread panicked");
            }
            debug!("Async access log writer stopped");
        }
        self.writer.flush()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn writer_loop(rx: Receiver<LogRecord>, writer: Arc<RecordWriter>) {
    for record in rx.iter() {
        writer.metrics.set_queue_depth(rx.len());
        // Failures are reported by the writer; the record is dropped.
        let _ = writer.write(&record);
    }
    if let Err(e) = writer.flush() {
        warn!(error = %e, "Final access log flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use quill_core::config::AccessLogConfig;
    use std::sync::Condvar;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<Vec<u8>>>,
    }

    impl LogSink for MemorySink {
        fn write_record(&self, buf: &[u8]) -> Result<(), QuillError> {
            self.lines.lock().unwrap().push(buf.to_vec());
            Ok(())
        }
    }

    /// Blocks every write until released.
    #[derive(Default)]
    struct GatedSink {
        open: Mutex<bool>,
        cv: Condvar,
        inner: MemorySink,
    }

    impl GatedSink {
        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.cv.notify_all();
        }
    }

    impl LogSink for GatedSink {
        fn write_record(&self, buf: &[u8]) -> Result<(), QuillError> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cv.wait(open).unwrap();
            }
            drop(open);
            self.inner.write_record(buf)
        }
    }

    fn writer(sink: Arc<dyn LogSink>) -> RecordWriter {
        let identity = ServiceIdentity::default();
        let encoder = UniformJson::new(&identity, &AccessLogConfig::default()).unwrap();
        RecordWriter::new(identity, encoder, sink, Arc::new(PipelineMetrics::disabled()))
    }

    fn record(path: &str) -> LogRecord {
        LogRecord::new(Local::now(), "GET", path, 200)
    }

    fn paths(sink: &MemorySink) -> Vec<String> {
        sink.lines
            .lock()
            .unwrap()
            .iter()
            .map(|line| {
                let v: serde_json::Value = serde_json::from_slice(line).unwrap();
                v["path"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn sync_writes_before_returning() {
        let sink = Arc::new(MemorySink::default());
        let config = DispatchConfig {
            mode: DispatchMode::Sync,
            buffer_size: 1,
        };
        let dispatcher = Dispatcher::new(&config, writer(sink.clone())).unwrap();
        dispatcher.submit(record("/a")).unwrap();
        assert_eq!(paths(&sink), vec!["/a"]);
    }

    #[test]
    fn async_preserves_arrival_order() {
        let sink = Arc::new(MemorySink::default());
        let config = DispatchConfig {
            mode: DispatchMode::Async,
            buffer_size: 64,
        };
        let dispatcher = Dispatcher::new(&config, writer(sink.clone())).unwrap();
        for i in 0..50 {
            dispatcher.submit(record(&format!("/{i}"))).unwrap();
        }
        dispatcher.close().unwrap();
        let expected: Vec<String> = (0..50).map(|i| format!("/{i}")).collect();
        assert_eq!(paths(&sink), expected);
        assert_eq!(dispatcher.dropped(), 0);
    }

    #[test]
    fn full_queue_drops_newest() {
        let sink = Arc::new(GatedSink::default());
        let dispatcher = AsyncDispatcher::spawn(Arc::new(writer(sink.clone())), 2).unwrap();

        // The first record is taken by the writer, which then blocks in the
        // sink; wait until it has left the queue.
        dispatcher.submit(record("/0")).unwrap();
        while dispatcher.tx.read().unwrap().as_ref().unwrap().len() > 0 {
            std::thread::yield_now();
        }
        dispatcher.submit(record("/1")).unwrap();
        dispatcher.submit(record("/2")).unwrap();
        dispatcher.submit(record("/3")).unwrap();
        dispatcher.submit(record("/4")).unwrap();
        assert_eq!(dispatcher.dropped(), 2);

        sink.release();
        dispatcher.close().unwrap();
        assert_eq!(paths(&sink.inner), vec!["/0", "/1", "/2"]);
    }

    #[test]
    fn submit_after_close_is_rejected() {
        let sink = Arc::new(MemorySink::default());
        let dispatcher = AsyncDispatcher::spawn(Arc::new(writer(sink)), 4).unwrap();
        dispatcher.close().unwrap();
        dispatcher.close().unwrap();
        assert!(matches!(dispatcher.submit(record("/late")), Err(QuillError::SinkClosed)));
    }

    #[test]
    fn zero_buffer_is_a_config_error() {
        let sink = Arc::new(MemorySink::default());
        assert!(matches!(
            AsyncDispatcher::spawn(Arc::new(writer(sink)), 0),
            Err(QuillError::Config(_))
        ));
    }

    /// Fails every write the way a sink with a poisoned lock does.
    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn write_record(&self, _buf: &[u8]) -> Result<(), QuillError> {
            Err(QuillError::Internal("sink lock poisoned".into()))
        }
    }

    #[test]
    fn sink_failures_are_counted_as_sink_drops() {
        let identity = ServiceIdentity::default();
        let encoder = UniformJson::new(&identity, &AccessLogConfig::default()).unwrap();
        let metrics = Arc::new(PipelineMetrics::new(true).unwrap());
        let w = RecordWriter::new(identity, encoder, Arc::new(BrokenSink), metrics.clone());

        assert!(w.write(&record("/lost")).is_err());
        let rendered = metrics.render();
        assert!(
            rendered.contains(r#"quill_records_dropped_total{reason="sink"} 1"#),
            "{rendered}"
        );
        assert!(!rendered.contains(r#"reason="internal""#));
    }

    #[test]
    fn encode_failure_drops_only_that_record() {
        let sink = Arc::new(MemorySink::default());
        let w = writer(sink.clone());
        let mut bad = record("/bad");
        bad.query.push(quill_core::record::QueryEntry::new("q", "%zz"));
        assert!(w.write(&bad).is_err());
        w.write(&record("/good")).unwrap();
        assert_eq!(paths(&sink), vec!["/good"]);
    }
}

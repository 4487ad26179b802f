use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Pipeline counters, gated behind `enabled`.
///
/// When disabled no registry is created and every `record_*` call returns
/// immediately.
pub struct PipelineMetrics {
    enabled: bool,
    registry: Option<Registry>,
    pub records_written: Option<IntCounter>,
    pub records_dropped: Option<IntCounterVec>,
    pub queue_depth: Option<IntGauge>,
}

impl PipelineMetrics {
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new();

        let records_written = IntCounter::with_opts(
            Opts::new("records_written_total", "Access records written to the sink").namespace("quill"),
        )?;
        let records_dropped = IntCounterVec::new(
            Opts::new("records_dropped_total", "Access records dropped before reaching the sink")
                .namespace("quill"),
            &["reason"],
        )?;
        let queue_depth = IntGauge::with_opts(
            Opts::new("queue_depth", "Records waiting for the async writer").namespace("quill"),
        )?;

        registry.register(Box::new(records_written.clone()))?;
        registry.register(Box::new(records_dropped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            enabled: true,
            registry: Some(registry),
            records_written: Some(records_written),
            records_dropped: Some(records_dropped),
            queue_depth: Some(queue_depth),
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            registry: None,
            records_written: None,
            records_dropped: None,
            queue_depth: None,
        }
    }

    #[inline]
    pub fn record_written(&self) {
        if let Some(ref c) = self.records_written {
            c.inc();
        }
    }

    /// `reason` is `queue_full`, `encode`, or `sink`.
    #[inline]
    pub fn record_dropped(&self, reason: &str) {
        if let Some(ref c) = self.records_dropped {
            c.with_label_values(&[reason]).inc();
        }
    }

    #[inline]
    pub fn set_queue_depth(&self, depth: usize) {
        if let Some(ref g) = self.queue_depth {
            g.set(depth as i64);
        }
    }

    /// Render prometheus text exposition format.
    pub fn render(&self) -> String {
        if let Some(ref registry) = self.registry {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();
            encoder.encode(&metric_families, &mut buffer).unwrap_or(());
            String::from_utf8(buffer).unwrap_or_default()
        } else {
            String::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_are_no_ops() {
        let m = PipelineMetrics::new(false).unwrap();
        assert!(!m.is_enabled());
        m.record_written();
        m.record_dropped("queue_full");
        m.set_queue_depth(3);
        assert_eq!(m.render(), "");
    }

    #[test]
    fn enabled_metrics_count_writes_and_drops() {
        let m = PipelineMetrics::new(true).unwrap();
        m.record_written();
        m.record_written();
        m.record_dropped("encode");
        m.record_dropped("queue_full");
        m.record_dropped("queue_full");

        assert_eq!(m.records_written.as_ref().unwrap().get(), 2);
        let dropped = m.records_dropped.as_ref().unwrap();
        assert_eq!(dropped.with_label_values(&["queue_full"]).get(), 2);
        assert_eq!(dropped.with_label_values(&["encode"]).get(), 1);
    }

    #[test]
    fn render_contains_namespaced_names() {
        let m = PipelineMetrics::new(true).unwrap();
        m.record_written();
        m.set_queue_depth(5);
        let out = m.render();
        assert!(out.contains("quill_records_written_total"));
        assert!(out.contains("quill_queue_depth 5"));
    }
}

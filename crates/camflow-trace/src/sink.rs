//! Span sinks
//!
//! The tracer hands every closed span to a sink. Sinks are shared by all
//! tracers of a pipeline and must tolerate concurrent `record` calls.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::SpanRecord;

/// Receiver of closed spans
pub trait SpanSink: Send + Sync {
    fn record(&self, span: &SpanRecord);
}

/// Keeps every span in memory, in close order
#[derive(Debug, Default)]
pub struct MemorySink {
    spans: Mutex<Vec<SpanRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> Vec<SpanRecord> {
        self.spans.lock().clone()
    }

    /// Spans with the given name, in close order
    pub fn named(&self, name: &str) -> Vec<SpanRecord> {
        self.filter(|s| s.name == name)
    }

    /// Spans recorded by the given tracer, in close order
    pub fn by_tracer(&self, tracer: &str) -> Vec<SpanRecord> {
        self.filter(|s| &*s.tracer == tracer)
    }

    pub fn filter<F>(&self, mut f: F) -> Vec<SpanRecord>
    where
        F: FnMut(&SpanRecord) -> bool,
    {
        self.spans.lock().iter().filter(|s| f(s)).cloned().collect()
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<SpanRecord> {
        std::mem::take(&mut *self.spans.lock())
    }
}

impl SpanSink for MemorySink {
    fn record(&self, span: &SpanRecord) {
        self.spans.lock().push(span.clone());
    }
}

/// Forwards spans as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SpanSink for LogSink {
    fn record(&self, span: &SpanRecord) {
        tracing::debug!(
            target: "camflow::span",
            tracer = %span.tracer,
            name = %span.name,
            id = %span.id,
            start_ns = span.start_ns,
            end_ns = span.end_ns,
            duration_us = span.duration().as_micros() as u64,
            "span closed"
        );
    }
}

/// Sends every span to several sinks
#[derive(Default, Clone)]
pub struct TeeSink {
    sinks: Vec<Arc<dyn SpanSink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn SpanSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl SpanSink for TeeSink {
    fn record(&self, span: &SpanRecord) {
        for sink in &self.sinks {
            sink.record(span);
        }
    }
}

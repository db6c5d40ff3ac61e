//! Per-worker span tracer
//!
//! A `Tracer` is owned by exactly one logical worker. All methods take
//! `&mut self`, so two invocations can never interleave open spans on the
//! same tracer; share it behind a mutex held for the whole invocation.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use camflow_core::SpanId;
use camflow_time::Clock;

use crate::{SpanKind, SpanRecord, SpanSink, TraceError, TraceResult};

#[derive(Clone, Debug)]
struct OpenSpan {
    id: SpanId,
    parent: Option<SpanId>,
    name: Cow<'static, str>,
    start_ns: i64,
    kind: SpanKind,
}

/// Span recorder bound to one logical worker
pub struct Tracer {
    /// Worker identity stamped on every record
    name: Arc<str>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn SpanSink>,
    /// Open spans, innermost last
    open: Vec<OpenSpan>,
    /// Next id to hand out; ids below this were issued
    next_id: SpanId,
    closed: u64,
}

impl Tracer {
    pub fn new(name: &str, clock: Arc<dyn Clock>, sink: Arc<dyn SpanSink>) -> Self {
        Tracer {
            name: Arc::from(name),
            clock,
            sink,
            open: Vec::new(),
            next_id: SpanId(1),
            closed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of spans currently open
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    /// Innermost open span
    pub fn current(&self) -> Option<SpanId> {
        self.open.last().map(|s| s.id)
    }

    /// Spans closed so far
    pub fn closed_count(&self) -> u64 {
        self.closed
    }

    pub fn now_nanos(&self) -> i64 {
        self.clock.now_nanos()
    }

    /// Open a span starting at `start_ns`, which may lie in the past
    pub fn start_span(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        parent: Option<SpanId>,
        start_ns: i64,
    ) -> TraceResult<SpanId> {
        self.open_span(name.into(), parent, start_ns, SpanKind::Explicit)
    }

    /// Close the innermost open span at `end_ns`
    pub fn end_span(&mut self, end_ns: i64) -> TraceResult<SpanRecord> {
        let innermost = self
            .open
            .last()
            .ok_or_else(|| TraceError::NothingOpen(self.name.to_string()))?;
        check_order(&innermost.name, innermost.start_ns, end_ns)?;

        let span = self.open.pop().ok_or_else(|| TraceError::NothingOpen(self.name.to_string()))?;
        Ok(self.close(span, end_ns))
    }

    /// Close a specific span. It must be the innermost open one.
    pub fn end_span_by_id(&mut self, id: SpanId, end_ns: i64) -> TraceResult<SpanRecord> {
        match self.current() {
            Some(innermost) if innermost == id => self.end_span(end_ns),
            Some(innermost) if self.open.iter().any(|s| s.id == id) => {
                Err(TraceError::OutOfOrder { id, innermost })
            }
            _ if id.0 >= 1 && id < self.next_id => Err(TraceError::AlreadyClosed(id)),
            _ => Err(TraceError::NeverOpened(id)),
        }
    }

    /// Open a span at now that closes when the guard drops.
    /// Its parent is the innermost open span, if any.
    pub fn with_span(&mut self, name: impl Into<Cow<'static, str>>) -> TraceResult<SpanGuard<'_>> {
        let parent = self.current();
        let start_ns = self.clock.now_nanos();
        let id = self.open_span(name.into(), parent, start_ns, SpanKind::Scoped)?;
        Ok(SpanGuard {
            tracer: self,
            id,
            finished: false,
        })
    }

    /// Record the delay from `since_ns` until now as a closed span.
    /// Does not touch the open-span stack.
    pub fn record_delay(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        since_ns: i64,
    ) -> TraceResult<SpanRecord> {
        let now = self.clock.now_nanos();
        self.record_delay_until(name, since_ns, now)
    }

    /// Same as `record_delay` with an explicit end
    pub fn record_delay_until(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        since_ns: i64,
        until_ns: i64,
    ) -> TraceResult<SpanRecord> {
        let name = name.into();
        check_order(&name, since_ns, until_ns)?;
        let id = self.issue_id();
        let span = OpenSpan {
            id,
            parent: None,
            name,
            start_ns: since_ns,
            kind: SpanKind::Delay,
        };
        Ok(self.close(span, until_ns))
    }

    fn open_span(
        &mut self,
        name: Cow<'static, str>,
        parent: Option<SpanId>,
        start_ns: i64,
        kind: SpanKind,
    ) -> TraceResult<SpanId> {
        if let Some(parent) = parent {
            if !self.open.iter().any(|s| s.id == parent) {
                return Err(TraceError::UnknownParent(parent));
            }
        }
        let id = self.issue_id();
        self.open.push(OpenSpan {
            id,
            parent,
            name,
            start_ns,
            kind,
        });
        Ok(id)
    }

    fn issue_id(&mut self) -> SpanId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn close(&mut self, span: OpenSpan, end_ns: i64) -> SpanRecord {
        let record = SpanRecord {
            tracer: self.name.clone(),
            id: span.id,
            parent: span.parent,
            name: span.name,
            start_ns: span.start_ns,
            end_ns,
            kind: span.kind,
        };
        self.closed += 1;
        self.sink.record(&record);
        record
    }
}

fn check_order(name: &str, start_ns: i64, end_ns: i64) -> TraceResult<()> {
    if end_ns < start_ns {
        return Err(TraceError::EndBeforeStart {
            name: name.to_string(),
            start_ns,
            end_ns,
        });
    }
    Ok(())
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("name", &self.name)
            .field("open", &self.open.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Scoped span. Closes at the clock's now when dropped or finished.
#[must_use = "a span guard closes its span as soon as it is dropped"]
pub struct SpanGuard<'a> {
    tracer: &'a mut Tracer,
    id: SpanId,
    finished: bool,
}

impl<'a> SpanGuard<'a> {
    pub fn id(&self) -> SpanId {
        self.id
    }

    /// The owning tracer, for nested spans
    pub fn tracer(&mut self) -> &mut Tracer {
        self.tracer
    }

    /// Close now and get the record
    pub fn finish(mut self) -> TraceResult<SpanRecord> {
        self.finished = true;
        let end_ns = self.tracer.now_nanos();
        self.tracer.end_span_by_id(self.id, end_ns)
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let end_ns = self.tracer.now_nanos();
        if let Err(e) = self.tracer.end_span_by_id(self.id, end_ns) {
            tracing::error!(tracer = %self.tracer.name(), span = %self.id, "failed to close scoped span: {}", e);
        }
    }
}

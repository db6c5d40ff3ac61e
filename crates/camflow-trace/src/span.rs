//! Span records and well-known span names

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use camflow_core::{elapsed_between, SpanId};

/// Names consumed by downstream trace tooling. Must not change.
pub mod names {
    pub const MESSAGE_DELAY: &str = "MessageDelay";
    pub const OBJECT_DETECT: &str = "ObjectDetect";
    pub const DATA_LOGGER: &str = "DataLogger";
    pub const END_TO_END_DELAY: &str = "EndToEndDelay";
    pub const ACTUATION: &str = "Actuation";
}

/// How a span came to be
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Opened and closed through `start_span` / `end_span`
    Explicit,
    /// Timed by a `SpanGuard`
    Scoped,
    /// Point measurement from a past timestamp to now
    Delay,
}

/// A closed span. INVARIANT: `end_ns >= start_ns`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanRecord {
    pub tracer: Arc<str>,
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub name: Cow<'static, str>,
    pub start_ns: i64,
    pub end_ns: i64,
    pub kind: SpanKind,
}

impl SpanRecord {
    #[inline]
    pub fn duration(&self) -> Duration {
        elapsed_between(self.start_ns, self.end_ns)
    }

    /// Signed duration, negative only for a record that ends before it starts
    #[inline]
    pub fn duration_nanos(&self) -> i64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    /// Does this span's interval contain `other`'s?
    pub fn contains(&self, other: &SpanRecord) -> bool {
        self.start_ns <= other.start_ns && other.end_ns <= self.end_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start_ns: i64, end_ns: i64) -> SpanRecord {
        SpanRecord {
            tracer: Arc::from("worker"),
            id: SpanId(1),
            parent: None,
            name: Cow::Borrowed(names::ACTUATION),
            start_ns,
            end_ns,
            kind: SpanKind::Explicit,
        }
    }

    #[test]
    fn test_duration() {
        let span = record(1_000, 151_000);
        assert_eq!(span.duration(), Duration::from_micros(150));
        assert_eq!(span.duration_nanos(), 150_000);
    }

    #[test]
    fn test_contains() {
        let outer = record(0, 100);
        let inner = record(10, 90);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }
}

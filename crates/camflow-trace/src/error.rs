//! Span protocol errors

use camflow_core::SpanId;
use thiserror::Error;

/// Misuse of the span open/close protocol.
/// Fatal to the invoking callback, never to other tracers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("No open span to close on tracer {0}")]
    NothingOpen(String),

    #[error("Span {0} was never opened")]
    NeverOpened(SpanId),

    #[error("Span {0} is already closed")]
    AlreadyClosed(SpanId),

    #[error("Span {id} closed before its child {innermost}")]
    OutOfOrder { id: SpanId, innermost: SpanId },

    #[error("Parent span {0} is not open")]
    UnknownParent(SpanId),

    #[error("Span {name} ends at {end_ns}ns before it starts at {start_ns}ns")]
    EndBeforeStart {
        name: String,
        start_ns: i64,
        end_ns: i64,
    },
}

/// Result type for tracer operations
pub type TraceResult<T> = Result<T, TraceError>;

//! camflow Trace - Latency instrumentation
//!
//! One `Tracer` per logical worker. Closed spans go to an injected
//! `SpanSink`; storage and export are the sink's business.
//!
//! - Explicit spans: `start_span` / `end_span`, start may lie in the past
//! - Scoped spans: `with_span` guard, closed on drop
//! - Delay records: `record_delay`, a point measurement from a past timestamp

pub mod error;
pub mod span;
pub mod tracer;
pub mod sink;
pub mod summary;

pub use error::*;
pub use span::*;
pub use tracer::*;
pub use sink::*;
pub use summary::*;

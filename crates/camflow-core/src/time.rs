//! Time primitives for camflow
//!
//! All timestamps are raw monotonic nanoseconds (`i64`) as produced by an
//! injected clock. These helpers convert between that representation and
//! `Duration` without panicking on overflow or negative spans.

use std::time::Duration;

/// Convert a duration to nanoseconds, saturating at `i64::MAX`
#[inline]
pub fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Convert a nanosecond count to a duration; negative counts become zero
#[inline]
pub fn nanos_to_duration(nanos: i64) -> Duration {
    if nanos > 0 {
        Duration::from_nanos(nanos as u64)
    } else {
        Duration::ZERO
    }
}

/// Elapsed duration between two timestamps, zero if `end` precedes `start`
#[inline]
pub fn elapsed_between(start_ns: i64, end_ns: i64) -> Duration {
    nanos_to_duration(end_ns.saturating_sub(start_ns))
}

//! Clock implementations for camflow

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use camflow_core::duration_to_nanos;

/// Monotonic nanosecond time source
///
/// INVARIANT: successive `now_nanos()` calls never decrease
pub trait Clock: Send + Sync {
    /// Current monotonic time in nanoseconds
    fn now_nanos(&self) -> i64;

    /// Block the calling thread for `d`, yielding the CPU
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Process-wide monotonic clock.
/// All instances share one epoch, so timestamps from different instances
/// are comparable.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            epoch: process_epoch(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> i64 {
        duration_to_nanos(self.epoch.elapsed())
    }
}

/// Deterministic clock for tests
///
/// Time only moves when told to: explicitly via `advance`/`set`, by a fixed
/// step on every read, and by the full duration on `sleep`.
#[derive(Debug, Default)]
pub struct ManualClock {
    value: AtomicI64,
    step_per_read: AtomicI64,
}

impl ManualClock {
    /// Clock frozen at `start_ns`
    pub fn new(start_ns: i64) -> Self {
        ManualClock {
            value: AtomicI64::new(start_ns),
            step_per_read: AtomicI64::new(0),
        }
    }

    /// Clock that advances by `step` on every read.
    /// Needed for anything that spins on the clock, like `Workload::busy_wait`.
    pub fn auto_advancing(start_ns: i64, step: Duration) -> Self {
        ManualClock {
            value: AtomicI64::new(start_ns),
            step_per_read: AtomicI64::new(duration_to_nanos(step)),
        }
    }

    /// Move time forward
    pub fn advance(&self, d: Duration) -> i64 {
        let delta = duration_to_nanos(d);
        self.value.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Jump to `ns`. Only moves forward.
    pub fn set(&self, ns: i64) {
        self.value.fetch_max(ns, Ordering::SeqCst);
    }

    /// Current value without advancing
    pub fn peek(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        let step = self.step_per_read.load(Ordering::Relaxed);
        self.value.fetch_add(step, Ordering::SeqCst) + step
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

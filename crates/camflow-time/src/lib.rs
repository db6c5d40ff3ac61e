//! camflow Time - Clocks and simulated processing cost
//!
//! This crate implements:
//! - `Clock`: the injected monotonic nanosecond time source
//! - `MonotonicClock`: process-wide clock backed by `Instant`
//! - `ManualClock`: deterministic clock for tests
//! - `Workload`: CPU-bound busy-wait and blocking yield
//! - `CostModel`: seeded random cost accumulation

pub mod clock;
pub mod workload;

pub use clock::*;
pub use workload::*;

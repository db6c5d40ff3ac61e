//! camflow Test Harness - Pipeline scenarios and invariant checks
//!
//! This crate provides:
//! - Scenario runs over a full pipeline with a manual or monotonic clock
//! - Per-frame span checks (delay records, nesting, non-overlap)
//! - Priority vs FIFO comparison runs
//! - Seeded cost sweeps

pub mod scenario;
pub mod sweep;

pub use scenario::*;
pub use sweep::*;

//! Workload simulator
//!
//! Stands in for real processing cost:
//! - busy_wait: CPU-bound, never yields
//! - blocking_yield: I/O-like wait, releases the thread
//! - CostModel: random cost as a sum of uniform draws

use std::sync::Arc;
use std::time::Duration;

use camflow_core::elapsed_between;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Clock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("Cost model needs at least one draw")]
    NoDraws,

    #[error("Empty draw range: [{min_us}, {max_us})")]
    EmptyRange { min_us: u64, max_us: u64 },
}

/// Spends simulated processing time against an injected clock
#[derive(Clone)]
pub struct Workload {
    clock: Arc<dyn Clock>,
}

impl Workload {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Workload { clock }
    }

    /// Occupy the executing thread for `d` of clock time.
    /// Returns the time actually spent, which is never less than `d`.
    pub fn busy_wait(&self, d: Duration) -> Duration {
        let start = self.clock.now_nanos();
        loop {
            let elapsed = elapsed_between(start, self.clock.now_nanos());
            if elapsed >= d {
                return elapsed;
            }
            std::hint::spin_loop();
        }
    }

    /// Block for `d` while letting other ready work use the CPU
    pub fn blocking_yield(&self, d: Duration) {
        self.clock.sleep(d);
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload").finish_non_exhaustive()
    }
}

/// Random cost: sum of `draws` values, each uniform in `[min_us, max_us)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostModel {
    pub draws: u32,
    pub min_us: u64,
    pub max_us: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        // 10 draws in [100, 1000) µs => [1000, 10000) µs total
        CostModel {
            draws: 10,
            min_us: 100,
            max_us: 1000,
        }
    }
}

impl CostModel {
    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.draws == 0 {
            return Err(WorkloadError::NoDraws);
        }
        if self.min_us >= self.max_us {
            return Err(WorkloadError::EmptyRange {
                min_us: self.min_us,
                max_us: self.max_us,
            });
        }
        Ok(())
    }

    /// Inclusive lower and exclusive upper bound of `sample`
    pub fn bounds(&self) -> (Duration, Duration) {
        let draws = u64::from(self.draws);
        (
            Duration::from_micros(self.min_us * draws),
            Duration::from_micros((self.max_us - 1) * draws + 1),
        )
    }

    /// Draw a cost. Assumes `validate` passed.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let dist = Uniform::new(self.min_us, self.max_us);
        let total: u64 = (0..self.draws).map(|_| dist.sample(rng)).sum();
        Duration::from_micros(total)
    }
}

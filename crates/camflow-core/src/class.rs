//! Priority class definitions
//!
//! Every subscription carries a priority class fixed at registration:
//! - High: latency-critical path (object detection, actuation)
//! - Default: best-effort path (data logging)
//!
//! The dispatcher only relies on `rank()`; how a class maps onto OS
//! scheduling is left to the substrate.

use serde::{Deserialize, Serialize};

/// Priority class for callback dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PriorityClass {
    /// Latency-critical callbacks
    /// Drained first, may use reserved workers
    High = 0x00,

    /// Everything else
    #[default]
    Default = 0x01,
}

impl PriorityClass {
    /// Number of distinct classes
    pub const COUNT: usize = 2;

    /// Queue rank (lower = dispatched earlier)
    #[inline]
    pub fn rank(self) -> usize {
        self as usize
    }

    /// Is `self` strictly more favorable than `other`?
    #[inline]
    pub fn outranks(self, other: PriorityClass) -> bool {
        self.rank() < other.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::High => "high",
            PriorityClass::Default => "default",
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

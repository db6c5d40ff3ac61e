//! camflow Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every camflow crate:
//! - Identifiers (SpanId, SubscriptionId)
//! - Priority classes for callback dispatch
//! - Messages (Image, ActuationTrigger) and typed topics
//! - Monotonic nanosecond time helpers

pub mod id;
pub mod time;
pub mod class;
pub mod message;
pub mod error;

pub use id::*;
pub use time::*;
pub use class::*;
pub use message::*;
pub use error::*;

//! Error types for the camflow runtime

use camflow_core::MessageError;
use camflow_time::WorkloadError;
use camflow_trace::TraceError;
use thiserror::Error;

/// Dispatcher errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Dispatcher is shut down")]
    ShutDown,

    #[error("Ready queue full (capacity {capacity}): dropped {dropped} job(s)")]
    QueueFull { dropped: usize, capacity: usize },

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Bus errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Topic {topic} carries {existing}, not {requested}")]
    TypeMismatch {
        topic: &'static str,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Dispatch failed: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Errors raised inside a node callback.
/// Local to that invocation; never redelivered.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] MessageError),

    #[error("Span protocol error: {0}")]
    Trace(#[from] TraceError),

    #[error("Publish failed: {0}")]
    Publish(#[from] BusError),
}

/// Pipeline construction and configuration errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid workload: {0}")]
    Workload(#[from] WorkloadError),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Boxed error returned by bus callbacks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type ScheduleResult<T> = Result<T, ScheduleError>;
pub type BusResult<T> = Result<T, BusError>;
pub type NodeResult<T> = Result<T, NodeError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;

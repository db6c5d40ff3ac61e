//! Runtime configuration
//!
//! Defaults reproduce the reference workload: 3ms detection, 1-10ms
//! logging plus 1ms write, 150us actuation, HIGH for the critical path.
//! Durations are (de)serialized as humantime strings ("3ms", "150us").

use std::time::Duration;

use camflow_core::PriorityClass;
use camflow_time::CostModel;
use serde::{Deserialize, Serialize};

use crate::{RuntimeError, RuntimeResult};

pub(crate) mod humantime_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(de::Error::custom)
    }
}

/// How the worker pool orders ready jobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// One queue per priority class, higher classes drained first
    #[default]
    Priority,
    /// Single queue in submission order. Cannot honor priority.
    Fifo,
}

/// Worker pool configuration
///
/// The default pool keeps one of its three workers for HIGH jobs, so a HIGH
/// job finds a worker even while DEFAULT work occupies the general ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads in total
    pub workers: usize,
    /// Workers that only ever run HIGH jobs
    pub reserved_high_workers: usize,
    /// Maximum queued (not yet running) jobs
    pub queue_capacity: usize,
    pub policy: QueuePolicy,
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: 3,
            reserved_high_workers: 1,
            queue_capacity: 1024,
            policy: QueuePolicy::Priority,
            thread_name: "camflow-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// One worker: every dispatch decision is a strict priority choice,
    /// but a HIGH job that becomes ready while a DEFAULT job runs has to
    /// wait for it. Best effort; each such wait counts as a degradation.
    pub fn single_worker() -> Self {
        PoolConfig {
            workers: 1,
            reserved_high_workers: 0,
            ..Self::default()
        }
    }

    /// Priority-blind pool, for comparison runs
    pub fn fifo(workers: usize) -> Self {
        PoolConfig {
            workers,
            reserved_high_workers: 0,
            policy: QueuePolicy::Fifo,
            ..Self::default()
        }
    }

    /// One general worker plus one worker reserved for HIGH jobs
    pub fn with_reserved_high() -> Self {
        PoolConfig {
            workers: 2,
            reserved_high_workers: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("pool needs at least one worker".to_string());
        }
        if self.reserved_high_workers >= self.workers {
            return Err(format!(
                "{} reserved HIGH workers leave no worker for DEFAULT jobs (total {})",
                self.reserved_high_workers, self.workers
            ));
        }
        if self.queue_capacity == 0 {
            return Err("queue capacity must be positive".to_string());
        }
        Ok(())
    }
}

/// Camera processing node configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    #[serde(with = "humantime_duration")]
    pub object_detect_cost: Duration,
    pub logger_cost: CostModel,
    /// Blocking write after the logger's CPU work
    #[serde(with = "humantime_duration")]
    pub logger_write: Duration,
    pub object_detector_priority: PriorityClass,
    pub data_logger_priority: PriorityClass,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            object_detect_cost: Duration::from_micros(3000),
            logger_cost: CostModel::default(),
            logger_write: Duration::from_micros(1000),
            object_detector_priority: PriorityClass::High,
            data_logger_priority: PriorityClass::Default,
        }
    }
}

/// Actuation node configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    #[serde(with = "humantime_duration")]
    pub actuation_cost: Duration,
    pub priority: PriorityClass,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        ActuationConfig {
            actuation_cost: Duration::from_micros(150),
            priority: PriorityClass::High,
        }
    }
}

/// Whole pipeline configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pool: PoolConfig,
    pub processing: ProcessingConfig,
    pub actuation: ActuationConfig,
    /// Seed for the data logger's cost draws
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            pool: PoolConfig::default(),
            processing: ProcessingConfig::default(),
            actuation: ActuationConfig::default(),
            seed: 0x5eed,
        }
    }
}

impl PipelineConfig {
    pub fn single_worker() -> Self {
        PipelineConfig {
            pool: PoolConfig::single_worker(),
            ..Self::default()
        }
    }

    pub fn fifo(workers: usize) -> Self {
        PipelineConfig {
            pool: PoolConfig::fifo(workers),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RuntimeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        self.pool.validate().map_err(RuntimeError::Config)?;
        self.processing.logger_cost.validate()?;
        Ok(())
    }
}

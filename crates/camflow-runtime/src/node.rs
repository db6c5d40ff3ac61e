//! Camera processing and actuation nodes
//!
//! Each callback owns one tracer behind a mutex that is held for the whole
//! invocation, so spans of two invocations never interleave on a tracer.
//! Nodes own their subscriptions; dropping a node unsubscribes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use camflow_core::{ActuationTrigger, Image, Message, PriorityClass, ACTUATION_TOPIC, IMAGE_TOPIC};
use camflow_time::Workload;
use camflow_trace::{names, Tracer};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{
    ActuationConfig, Bus, CallbackError, NodeResult, ProcessingConfig, Publisher, RuntimeResult,
    Subscription,
};

/// Tracer identities, one per logical worker
pub mod tracers {
    pub const OBJECT_DETECTOR: &str = "object_detector";
    pub const DATA_LOGGER: &str = "data_logger";
    pub const ACTUATION: &str = "actuation";
}

#[derive(Debug, Default)]
struct PathCounters {
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl PathCounters {
    /// Count one invocation and convert its error for the bus
    fn track(&self, result: NodeResult<()>) -> Result<(), CallbackError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        result.map_err(|e| {
            self.failures.fetch_add(1, Ordering::Relaxed);
            CallbackError::from(e)
        })
    }

    fn snapshot(&self) -> PathStats {
        PathStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Per-callback counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathStats {
    pub invocations: u64,
    pub failures: u64,
}

struct ProcessingInner {
    config: ProcessingConfig,
    workload: Workload,
    object_detector: Mutex<Tracer>,
    data_logger: Mutex<Tracer>,
    /// Only locked for the cost draw
    rng: Mutex<StdRng>,
    trigger: Publisher<ActuationTrigger>,
    detector_counters: PathCounters,
    logger_counters: PathCounters,
}

impl ProcessingInner {
    fn detect_objects(&self, image: &Image) -> NodeResult<()> {
        let mut tracer = self.object_detector.lock();
        let now = tracer.now_nanos();
        image.validate(now)?;
        tracer.record_delay_until(names::MESSAGE_DELAY, image.published_at_monotonic_nanos, now)?;

        let span = tracer.with_span(names::OBJECT_DETECT)?;
        self.workload.busy_wait(self.config.object_detect_cost);
        self.trigger.publish(ActuationTrigger::from(image))?;
        span.finish()?;
        Ok(())
    }

    fn log_data(&self, image: &Image) -> NodeResult<()> {
        let mut tracer = self.data_logger.lock();
        let now = tracer.now_nanos();
        image.validate(now)?;
        tracer.record_delay_until(names::MESSAGE_DELAY, image.published_at_monotonic_nanos, now)?;

        let span = tracer.with_span(names::DATA_LOGGER)?;
        let cost = self.config.logger_cost.sample(&mut *self.rng.lock());
        tracing::trace!(cost_us = cost.as_micros() as u64, "serializing frame");
        self.workload.busy_wait(cost);
        self.workload.blocking_yield(self.config.logger_write);
        span.finish()?;
        Ok(())
    }
}

/// Camera processing node: object detector (critical) and data logger
/// (best effort) on the same image topic
pub struct ProcessingNode {
    inner: Arc<ProcessingInner>,
    subscriptions: Vec<Subscription>,
}

impl ProcessingNode {
    pub fn new(
        bus: &Bus,
        config: ProcessingConfig,
        workload: Workload,
        object_detector: Tracer,
        data_logger: Tracer,
        seed: u64,
    ) -> RuntimeResult<Self> {
        config.logger_cost.validate()?;

        let inner = Arc::new(ProcessingInner {
            workload,
            object_detector: Mutex::new(object_detector),
            data_logger: Mutex::new(data_logger),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            trigger: bus.publisher(ACTUATION_TOPIC),
            detector_counters: PathCounters::default(),
            logger_counters: PathCounters::default(),
            config,
        });

        // Logger registers first: fan-out must not follow registration order
        let logger = {
            let inner = inner.clone();
            bus.subscribe(
                IMAGE_TOPIC,
                inner.config.data_logger_priority,
                tracers::DATA_LOGGER,
                move |image: &Image| inner.logger_counters.track(inner.log_data(image)),
            )?
        };
        let detector = {
            let inner = inner.clone();
            bus.subscribe(
                IMAGE_TOPIC,
                inner.config.object_detector_priority,
                tracers::OBJECT_DETECTOR,
                move |image: &Image| inner.detector_counters.track(inner.detect_objects(image)),
            )?
        };

        tracing::info!(
            detector = %detector.priority(),
            logger = %logger.priority(),
            "processing node up"
        );
        Ok(ProcessingNode {
            inner,
            subscriptions: vec![logger, detector],
        })
    }

    pub fn detector_stats(&self) -> PathStats {
        self.inner.detector_counters.snapshot()
    }

    pub fn logger_stats(&self) -> PathStats {
        self.inner.logger_counters.snapshot()
    }

    /// Priority of each subscription, in registration order
    pub fn priorities(&self) -> Vec<PriorityClass> {
        self.subscriptions.iter().map(Subscription::priority).collect()
    }
}

impl std::fmt::Debug for ProcessingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingNode")
            .field("subscriptions", &self.subscriptions)
            .field("detector", &self.detector_stats())
            .field("logger", &self.logger_stats())
            .finish()
    }
}

struct ActuationInner {
    config: ActuationConfig,
    workload: Workload,
    tracer: Mutex<Tracer>,
    counters: PathCounters,
}

impl ActuationInner {
    fn actuate(&self, trigger: &ActuationTrigger) -> NodeResult<()> {
        let mut tracer = self.tracer.lock();
        let now = tracer.now_nanos();
        trigger.validate(now)?;
        tracer.record_delay_until(names::END_TO_END_DELAY, trigger.timestamp_nanos, now)?;

        let span = tracer.with_span(names::ACTUATION)?;
        self.workload.busy_wait(self.config.actuation_cost);
        span.finish()?;
        Ok(())
    }
}

/// Terminal node: consumes actuation triggers
pub struct ActuationNode {
    inner: Arc<ActuationInner>,
    subscription: Subscription,
}

impl ActuationNode {
    pub fn new(
        bus: &Bus,
        config: ActuationConfig,
        workload: Workload,
        tracer: Tracer,
    ) -> RuntimeResult<Self> {
        let inner = Arc::new(ActuationInner {
            workload,
            tracer: Mutex::new(tracer),
            counters: PathCounters::default(),
            config,
        });

        let subscription = {
            let inner = inner.clone();
            bus.subscribe(
                ACTUATION_TOPIC,
                inner.config.priority,
                tracers::ACTUATION,
                move |trigger: &ActuationTrigger| inner.counters.track(inner.actuate(trigger)),
            )?
        };

        tracing::info!(priority = %subscription.priority(), "actuation node up");
        Ok(ActuationNode {
            inner,
            subscription,
        })
    }

    pub fn stats(&self) -> PathStats {
        self.inner.counters.snapshot()
    }

    pub fn priority(&self) -> PriorityClass {
        self.subscription.priority()
    }
}

impl std::fmt::Debug for ActuationNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuationNode")
            .field("subscription", &self.subscription)
            .field("stats", &self.stats())
            .finish()
    }
}

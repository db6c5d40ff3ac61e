//! Perception pipeline assembly
//!
//! Wires the worker pool, the bus and both nodes from one
//! `PipelineConfig`, an injected clock and an injected span sink.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camflow_core::{Image, IMAGE_TOPIC};
use camflow_time::{Clock, Workload};
use camflow_trace::{SpanSink, Tracer};

use crate::{
    tracers, ActuationNode, Bus, BusStats, Dispatcher, PathStats, PipelineConfig, PoolStats,
    ProcessingNode, PublishReceipt, Publisher, RuntimeResult, WorkerPool,
};

/// Camera processing + actuation on a shared worker pool
pub struct Pipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    pool: Arc<WorkerPool>,
    bus: Bus,
    camera: Publisher<Image>,
    processing: ProcessingNode,
    actuation: ActuationNode,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn SpanSink>,
    ) -> RuntimeResult<Self> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::new(config.pool.clone())?);
        let bus = Bus::new(pool.clone());
        let workload = Workload::new(clock.clone());
        let tracer = |name: &str| Tracer::new(name, clock.clone(), sink.clone());

        let processing = ProcessingNode::new(
            &bus,
            config.processing.clone(),
            workload.clone(),
            tracer(tracers::OBJECT_DETECTOR),
            tracer(tracers::DATA_LOGGER),
            config.seed,
        )?;
        let actuation = ActuationNode::new(
            &bus,
            config.actuation.clone(),
            workload,
            tracer(tracers::ACTUATION),
        )?;

        tracing::info!(seed = config.seed, workers = config.pool.workers, "pipeline ready");
        Ok(Pipeline {
            camera: bus.publisher(IMAGE_TOPIC),
            config,
            clock,
            pool,
            bus,
            processing,
            actuation,
        })
    }

    /// Stamp `payload` with the clock's now and publish it.
    /// Returns the publish timestamp.
    pub fn publish_frame(&self, payload: Bytes) -> RuntimeResult<i64> {
        let published_at = self.clock.now_nanos();
        self.publish(Image::new(published_at, payload))?;
        Ok(published_at)
    }

    /// Publish a pre-stamped image
    pub fn publish(&self, image: Image) -> RuntimeResult<PublishReceipt> {
        Ok(self.camera.publish(image)?)
    }

    /// Block until every queued and running callback finished
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pool.wait_idle(timeout)
    }

    /// Finish queued work and stop the workers
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn honors_priority(&self) -> bool {
        self.pool.honors_priority()
    }

    pub fn degradation_count(&self) -> u64 {
        self.pool.degradation_count()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            object_detector: self.processing.detector_stats(),
            data_logger: self.processing.logger_stats(),
            actuation: self.actuation.stats(),
            bus: self.bus.stats(),
            pool: self.pool.stats(),
            degradations: self.pool.degradation_count(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Counters across the whole pipeline
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub object_detector: PathStats,
    pub data_logger: PathStats,
    pub actuation: PathStats,
    pub bus: BusStats,
    pub pool: PoolStats,
    pub degradations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camflow_core::elapsed_between;
    use camflow_time::{ManualClock, MonotonicClock};
    use camflow_trace::{names, MemorySink, SpanKind};

    const WAIT: Duration = Duration::from_secs(10);

    fn pipeline(config: PipelineConfig, clock: Arc<dyn Clock>) -> (Pipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(config, clock, sink.clone()).unwrap();
        (pipeline, sink)
    }

    #[test]
    fn test_each_frame_reaches_both_paths_once() {
        let (pipeline, sink) = pipeline(PipelineConfig::default(), Arc::new(MonotonicClock::new()));

        for _ in 0..4 {
            pipeline.publish_frame(Bytes::from_static(b"frame")).unwrap();
        }
        assert!(pipeline.wait_idle(WAIT));

        let stats = pipeline.stats();
        assert_eq!(stats.object_detector.invocations, 4);
        assert_eq!(stats.data_logger.invocations, 4);
        assert_eq!(stats.actuation.invocations, 4);
        assert_eq!(stats.bus.failed, 0);
        assert_eq!(sink.named(names::MESSAGE_DELAY).len(), 8);
        assert_eq!(sink.named(names::END_TO_END_DELAY).len(), 4);
    }

    #[test]
    fn test_scenario_end_to_end_span() {
        let clock = Arc::new(ManualClock::auto_advancing(5_000_000, Duration::from_micros(1)));
        let (pipeline, sink) = pipeline(PipelineConfig::single_worker(), clock.clone());

        let t = clock.now_nanos();
        pipeline.publish(Image::stamped(t)).unwrap();
        assert!(pipeline.wait_idle(WAIT));

        let e2e = sink.named(names::END_TO_END_DELAY);
        assert_eq!(e2e.len(), 1);
        assert_eq!(e2e[0].start_ns, t);
        assert_eq!(e2e[0].kind, SpanKind::Delay);
        assert!(e2e[0].duration() >= Duration::from_micros(3000));

        let detect = &sink.named(names::OBJECT_DETECT)[0];
        assert!(e2e[0].duration() >= detect.duration());
        assert!(e2e[0].end_ns >= detect.end_ns);
    }

    #[test]
    fn test_negative_epoch_clock_reaches_actuation() {
        let clock = Arc::new(ManualClock::auto_advancing(-50_000_000, Duration::from_micros(1)));
        let (pipeline, sink) = pipeline(PipelineConfig::single_worker(), clock);

        pipeline.publish_frame(Bytes::from_static(b"frame")).unwrap();
        assert!(pipeline.wait_idle(WAIT));

        let stats = pipeline.stats();
        assert_eq!(stats.object_detector.failures, 0);
        assert_eq!(stats.data_logger.failures, 0);
        assert_eq!(stats.actuation.invocations, 1);

        let e2e = sink.named(names::END_TO_END_DELAY);
        assert_eq!(e2e.len(), 1);
        assert!(e2e[0].start_ns < 0);
        assert!(e2e[0].duration() >= Duration::from_micros(3000));
    }

    #[test]
    fn test_default_pool_keeps_priority_when_settled() {
        let clock = Arc::new(ManualClock::auto_advancing(0, Duration::from_micros(1)));
        let (pipeline, _sink) = pipeline(PipelineConfig::default(), clock);

        for _ in 0..3 {
            pipeline.publish_frame(Bytes::new()).unwrap();
            assert!(pipeline.wait_idle(WAIT));
        }
        assert_eq!(pipeline.degradation_count(), 0);
        assert!(pipeline.honors_priority());
    }

    #[test]
    fn test_high_path_starts_first_single_worker() {
        let clock = Arc::new(ManualClock::auto_advancing(0, Duration::from_micros(1)));
        let (pipeline, sink) = pipeline(PipelineConfig::single_worker(), clock.clone());

        pipeline.publish(Image::stamped(clock.now_nanos())).unwrap();
        assert!(pipeline.wait_idle(WAIT));

        let detector_start = sink.by_tracer(tracers::OBJECT_DETECTOR)[0].end_ns;
        let logger_start = sink.by_tracer(tracers::DATA_LOGGER)[0].end_ns;
        assert!(detector_start <= logger_start);
        assert_eq!(pipeline.degradation_count(), 0);

        // The trigger is published while the logger job is already queued;
        // actuation still runs before the logger
        let actuation_start = sink.named(names::END_TO_END_DELAY)[0].end_ns;
        assert!(actuation_start <= logger_start);
    }

    #[test]
    fn test_fifo_pool_inverts_and_reports() {
        let clock = Arc::new(ManualClock::auto_advancing(0, Duration::from_micros(1)));
        let (pipeline, sink) = pipeline(PipelineConfig::fifo(1), clock.clone());

        pipeline.publish(Image::stamped(clock.now_nanos())).unwrap();
        assert!(pipeline.wait_idle(WAIT));

        let detector_start = sink.by_tracer(tracers::OBJECT_DETECTOR)[0].end_ns;
        let logger_start = sink.by_tracer(tracers::DATA_LOGGER)[0].end_ns;
        assert!(logger_start < detector_start);
        assert!(!pipeline.honors_priority());
        assert!(pipeline.degradation_count() >= 1);
    }

    #[test]
    fn test_logger_span_covers_cost_and_write() {
        let clock = Arc::new(ManualClock::auto_advancing(0, Duration::from_micros(1)));
        let (pipeline, sink) = pipeline(PipelineConfig::single_worker().with_seed(99), clock.clone());

        pipeline.publish(Image::stamped(clock.now_nanos())).unwrap();
        assert!(pipeline.wait_idle(WAIT));

        let logger = &sink.named(names::DATA_LOGGER)[0];
        // [1000, 10000) us of CPU work plus the 1000 us write
        assert!(logger.duration() >= Duration::from_micros(2000));
        assert!(logger.duration() < Duration::from_micros(11_100));
    }

    #[test]
    fn test_two_publishes_stay_independent() {
        let clock = Arc::new(ManualClock::auto_advancing(0, Duration::from_micros(1)));
        let (pipeline, sink) = pipeline(PipelineConfig::single_worker(), clock.clone());

        let t1 = clock.advance(Duration::from_millis(1));
        pipeline.publish(Image::stamped(t1)).unwrap();
        assert!(pipeline.wait_idle(WAIT));
        let t2 = clock.advance(Duration::from_millis(1));
        pipeline.publish(Image::stamped(t2)).unwrap();
        assert!(pipeline.wait_idle(WAIT));

        let e2e = sink.named(names::END_TO_END_DELAY);
        assert_eq!(e2e.len(), 2);
        assert_eq!(e2e[0].start_ns, t1);
        assert_eq!(e2e[1].start_ns, t2);

        let delays = sink.named(names::MESSAGE_DELAY);
        assert_eq!(delays.iter().filter(|s| s.start_ns == t1).count(), 2);
        assert_eq!(delays.iter().filter(|s| s.start_ns == t2).count(), 2);
    }

    #[test]
    fn test_spans_well_formed() {
        let (pipeline, sink) = pipeline(PipelineConfig::default(), Arc::new(MonotonicClock::new()));

        for _ in 0..3 {
            pipeline.publish_frame(Bytes::new()).unwrap();
        }
        assert!(pipeline.wait_idle(WAIT));

        let spans = sink.snapshot();
        assert_eq!(spans.len(), 3 * 6);
        for span in &spans {
            assert!(span.end_ns >= span.start_ns, "{:?}", span);
        }
        let e2e_total: Duration = sink
            .named(names::END_TO_END_DELAY)
            .iter()
            .map(|s| elapsed_between(s.start_ns, s.end_ns))
            .sum();
        assert!(e2e_total >= Duration::from_micros(3 * 3000));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.pool.workers = 0;
        let sink = Arc::new(MemorySink::new());
        assert!(Pipeline::new(config, Arc::new(MonotonicClock::new()), sink).is_err());
    }
}

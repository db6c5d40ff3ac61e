//! Pipeline scenarios
//!
//! Runs frames through a full pipeline, then checks the recorded spans:
//! - every frame has two message delays and one end-to-end delay
//! - every span ends at or after its start
//! - end-to-end delay covers the object detection cost
//! - spans of one tracer never overlap
//! - no callback failed
//! - under contention, the object detector starts promptly unless the pool
//!   reported a degradation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use camflow_core::Image;
use camflow_runtime::{
    run_camera, tracers, CameraConfig, Pipeline, PipelineConfig, PipelineStats, RuntimeError,
};
use camflow_time::{Clock, ManualClock, MonotonicClock};
use camflow_trace::{names, LatencySummary, MemorySink, SpanKind, SpanRecord};
use thiserror::Error;

/// Harness failures (not invariant violations)
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("pipeline still busy after {0:?}")]
    Timeout(Duration),
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Wake-up and bookkeeping allowance for a HIGH job that found a free worker
pub const PROMPT_START_SLACK: Duration = Duration::from_millis(2);

const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Time source for a scenario
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockMode {
    /// `ManualClock` advancing by `step` per read
    Manual { step: Duration },
    /// Real monotonic time
    Monotonic,
}

/// Scenario configuration
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub pipeline: PipelineConfig,
    pub frames: usize,
    pub clock: ClockMode,
    /// Wait for the pool to go idle after every frame
    pub settle_between_frames: bool,
    /// Publish each frame while the previous frame's data logger runs.
    /// Only meaningful on a monotonic clock.
    pub contend_with_logger: bool,
    pub payload_len: usize,
    pub idle_timeout: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            pipeline: PipelineConfig::default(),
            frames: 10,
            clock: ClockMode::Manual {
                step: Duration::from_micros(1),
            },
            settle_between_frames: true,
            contend_with_logger: false,
            payload_len: 64,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ScenarioConfig {
    /// A couple of frames on one worker
    pub fn minimal() -> Self {
        ScenarioConfig {
            pipeline: PipelineConfig::single_worker(),
            frames: 2,
            ..Self::default()
        }
    }

    pub fn standard() -> Self {
        Self::default()
    }

    /// Frames published back to back on real time, four workers
    pub fn burst(frames: usize) -> Self {
        let mut pipeline = PipelineConfig::default();
        pipeline.pool.workers = 4;
        ScenarioConfig {
            pipeline,
            frames,
            clock: ClockMode::Monotonic,
            settle_between_frames: false,
            ..Self::default()
        }
    }

    /// Frames published on real time, each one while the previous frame's
    /// data logger holds a worker
    pub fn contended(frames: usize) -> Self {
        ScenarioConfig {
            frames,
            clock: ClockMode::Monotonic,
            settle_between_frames: false,
            contend_with_logger: true,
            ..Self::default()
        }
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.pipeline.seed = seed;
        self
    }

    fn strict_dispatch(&self) -> bool {
        self.settle_between_frames && self.pipeline.pool.workers == 1
    }

    /// Longest detector wait still counted as a prompt start
    fn prompt_start_bound(&self) -> Option<Duration> {
        if !self.contend_with_logger || self.clock != ClockMode::Monotonic {
            return None;
        }
        // Only HIGH work of the previous frame may still be ahead
        let high_work =
            self.pipeline.processing.object_detect_cost + self.pipeline.actuation.actuation_cost;
        Some(high_work + PROMPT_START_SLACK)
    }
}

/// Spans of one frame, keyed by its publish timestamp
#[derive(Clone, Debug, Default)]
pub struct FrameTrace {
    pub published_at: i64,
    pub message_delays: Vec<SpanRecord>,
    pub end_to_end: Vec<SpanRecord>,
}

impl FrameTrace {
    /// When the object detector callback started
    pub fn detector_start(&self) -> Option<i64> {
        self.delay_end(tracers::OBJECT_DETECTOR)
    }

    /// When the data logger callback started
    pub fn logger_start(&self) -> Option<i64> {
        self.delay_end(tracers::DATA_LOGGER)
    }

    /// How long the object detector callback waited after the publish
    pub fn detector_delay(&self) -> Option<Duration> {
        self.delay(tracers::OBJECT_DETECTOR).map(SpanRecord::duration)
    }

    fn delay(&self, tracer: &str) -> Option<&SpanRecord> {
        self.message_delays.iter().find(|s| &*s.tracer == tracer)
    }

    fn delay_end(&self, tracer: &str) -> Option<i64> {
        self.delay(tracer).map(|s| s.end_ns)
    }

    /// Logger got the CPU before the detector
    pub fn inverted(&self) -> bool {
        matches!(
            (self.detector_start(), self.logger_start()),
            (Some(detector), Some(logger)) if logger < detector
        )
    }
}

/// Result of a scenario run
#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub frames: Vec<FrameTrace>,
    pub spans: Vec<SpanRecord>,
    pub summary: LatencySummary,
    pub stats: PipelineStats,
    pub honors_priority: bool,
    /// Frames where the logger started before the detector
    pub inversions: usize,
    pub invariant_violations: Vec<String>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn end_to_end(&self) -> Vec<Duration> {
        self.spans
            .iter()
            .filter(|s| s.name == names::END_TO_END_DELAY)
            .map(SpanRecord::duration)
            .collect()
    }

    pub fn worst_end_to_end(&self) -> Duration {
        self.end_to_end().into_iter().max().unwrap_or_default()
    }
}

/// Scenario harness: one pipeline, one sink, one clock
pub struct ScenarioHarness {
    config: ScenarioConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<MemorySink>,
    pipeline: Pipeline,
    published: Vec<i64>,
}

impl ScenarioHarness {
    pub fn new(config: ScenarioConfig) -> HarnessResult<Self> {
        let clock: Arc<dyn Clock> = match config.clock {
            ClockMode::Manual { step } => {
                Arc::new(ManualClock::auto_advancing(0, step.max(Duration::from_nanos(1))))
            }
            ClockMode::Monotonic => Arc::new(MonotonicClock::new()),
        };
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(config.pipeline.clone(), clock.clone(), sink.clone())?;

        Ok(ScenarioHarness {
            config,
            clock,
            sink,
            pipeline,
            published: Vec::new(),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Publish every frame synchronously, then check the spans
    pub fn run(&mut self) -> HarnessResult<ScenarioResult> {
        let payload = Bytes::from(vec![0u8; self.config.payload_len]);
        for _ in 0..self.config.frames {
            let published_at = self.next_timestamp();
            self.pipeline.publish(Image::new(published_at, payload.clone()))?;
            self.published.push(published_at);
            if self.config.settle_between_frames {
                self.wait_idle()?;
            } else if self.config.contend_with_logger {
                self.wait_logger_started(published_at)?;
            }
        }
        self.wait_idle()?;
        Ok(self.collect())
    }

    /// Publish frames from the periodic camera source, then check the spans
    pub async fn run_with_camera(&mut self, period: Duration) -> HarnessResult<ScenarioResult> {
        let camera = CameraConfig {
            period,
            frames: self.config.frames as u64,
            payload_len: self.config.payload_len,
        };
        let report = run_camera(&self.pipeline, &camera).await?;
        self.published.extend(report.timestamps);
        self.wait_idle()?;
        Ok(self.collect())
    }

    /// Strictly after the previous frame, so frames never share a key
    fn next_timestamp(&self) -> i64 {
        let last = self.published.last().copied().unwrap_or(i64::MIN);
        let mut now = self.clock.now_nanos();
        while now <= last {
            std::hint::spin_loop();
            now = self.clock.now_nanos();
        }
        now
    }

    /// Block until the data logger callback for `published_at` has started
    fn wait_logger_started(&self, published_at: i64) -> HarnessResult<()> {
        let deadline = Instant::now() + self.config.idle_timeout;
        loop {
            let started = !self
                .sink
                .filter(|s| {
                    s.name == names::MESSAGE_DELAY
                        && &*s.tracer == tracers::DATA_LOGGER
                        && s.start_ns == published_at
                })
                .is_empty();
            if started {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::Timeout(self.config.idle_timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_idle(&self) -> HarnessResult<()> {
        if self.pipeline.wait_idle(self.config.idle_timeout) {
            Ok(())
        } else {
            Err(HarnessError::Timeout(self.config.idle_timeout))
        }
    }

    fn collect(&self) -> ScenarioResult {
        let spans = self.sink.snapshot();
        let frames = group_frames(&self.published, &spans);
        let stats = self.pipeline.stats();
        let inversions = frames.iter().filter(|f| f.inverted()).count();

        let mut result = ScenarioResult {
            summary: LatencySummary::from_spans(&spans),
            honors_priority: self.pipeline.honors_priority(),
            invariant_violations: Vec::new(),
            frames,
            spans,
            stats,
            inversions,
        };
        result.invariant_violations = self.check_invariants(&result);
        result
    }

    fn check_invariants(&self, result: &ScenarioResult) -> Vec<String> {
        let mut violations = Vec::new();
        let frame_count = self.published.len();

        for frame in &result.frames {
            if frame.message_delays.len() != 2 {
                violations.push(format!(
                    "frame {} has {} message delays",
                    frame.published_at,
                    frame.message_delays.len()
                ));
            }
            if frame.end_to_end.len() != 1 {
                violations.push(format!(
                    "frame {} has {} end-to-end delays",
                    frame.published_at,
                    frame.end_to_end.len()
                ));
            }
            if self.config.strict_dispatch() && result.honors_priority && frame.inverted() {
                violations.push(format!(
                    "frame {}: data logger ran before object detector",
                    frame.published_at
                ));
            }
            if let (true, Some(bound), Some(waited)) = (
                result.honors_priority,
                self.config.prompt_start_bound(),
                frame.detector_delay(),
            ) {
                if waited > bound {
                    violations.push(format!(
                        "frame {}: object detector waited {:?} (bound {:?}) with no degradation reported",
                        frame.published_at, waited, bound
                    ));
                }
            }
        }

        for name in [names::OBJECT_DETECT, names::DATA_LOGGER, names::ACTUATION] {
            let count = result.spans.iter().filter(|s| s.name == name).count();
            if count != frame_count {
                violations.push(format!("{} spans: {}, frames: {}", name, count, frame_count));
            }
        }

        for span in &result.spans {
            if span.duration_nanos() < 0 {
                violations.push(format!("{} ends before it starts", span.name));
            }
        }

        let detect_cost = self.config.pipeline.processing.object_detect_cost;
        for e2e in result.spans.iter().filter(|s| s.name == names::END_TO_END_DELAY) {
            if e2e.duration() < detect_cost {
                violations.push(format!(
                    "end-to-end delay {:?} shorter than detection cost {:?}",
                    e2e.duration(),
                    detect_cost
                ));
            }
        }

        violations.extend(overlapping_spans(&result.spans));

        let stats = &result.stats;
        let failures =
            stats.object_detector.failures + stats.data_logger.failures + stats.actuation.failures;
        if failures > 0 || stats.bus.failed > 0 {
            violations.push(format!("{} callbacks failed", failures.max(stats.bus.failed)));
        }

        violations
    }
}

fn group_frames(published: &[i64], spans: &[SpanRecord]) -> Vec<FrameTrace> {
    let mut frames: BTreeMap<i64, FrameTrace> = published
        .iter()
        .map(|&t| {
            (
                t,
                FrameTrace {
                    published_at: t,
                    ..FrameTrace::default()
                },
            )
        })
        .collect();

    for span in spans.iter().filter(|s| s.kind == SpanKind::Delay) {
        let Some(frame) = frames.get_mut(&span.start_ns) else {
            continue;
        };
        if span.name == names::MESSAGE_DELAY {
            frame.message_delays.push(span.clone());
        } else if span.name == names::END_TO_END_DELAY {
            frame.end_to_end.push(span.clone());
        }
    }

    frames.into_values().collect()
}

/// Work spans of one tracer must be strictly sequential
fn overlapping_spans(spans: &[SpanRecord]) -> Vec<String> {
    let mut by_tracer: BTreeMap<&str, Vec<&SpanRecord>> = BTreeMap::new();
    for span in spans.iter().filter(|s| s.kind != SpanKind::Delay) {
        by_tracer.entry(&*span.tracer).or_default().push(span);
    }

    let mut violations = Vec::new();
    for (tracer, mut spans) in by_tracer {
        spans.sort_by_key(|s| s.start_ns);
        for pair in spans.windows(2) {
            if pair[0].end_ns > pair[1].start_ns {
                violations.push(format!(
                    "{}: {} overlaps {}",
                    tracer, pair[0].name, pair[1].name
                ));
            }
        }
    }
    violations
}

/// Same frames, same seed, priority pool vs FIFO pool
#[derive(Clone, Debug)]
pub struct PolicyComparison {
    pub priority: ScenarioResult,
    pub fifo: ScenarioResult,
}

pub fn compare_policies(frames: usize, seed: u64) -> HarnessResult<PolicyComparison> {
    let base = ScenarioConfig {
        frames,
        ..ScenarioConfig::default()
    };

    let priority = ScenarioHarness::new(
        base.clone()
            .with_pipeline(PipelineConfig::single_worker())
            .with_seed(seed),
    )?
    .run()?;
    let fifo = ScenarioHarness::new(
        base.with_pipeline(PipelineConfig::fifo(1)).with_seed(seed),
    )?
    .run()?;

    Ok(PolicyComparison { priority, fifo })
}

//! camflow pipeline demo
//!
//! Publishes camera frames through the pipeline on real time, then prints
//! the latency summary and the pipeline counters.
//!
//! Usage:
//!   pipeline-demo [--frames N] [--period 33ms] [--workers N] [--fifo]
//!                 [--config pipeline.json] [--json-logs] [--json-report]
//!
//! Log level comes from `RUST_LOG` (default `camflow=info`). Span records are
//! logged at debug under the `camflow::span` target.

use std::sync::Arc;
use std::time::Duration;

use camflow_runtime::{run_camera, CameraConfig, Pipeline, PipelineConfig, QueuePolicy, RuntimeError};
use camflow_time::MonotonicClock;
use camflow_trace::{names, LatencySummary, LogSink, MemorySink, TeeSink};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum DemoError {
    #[error("{0}")]
    Usage(String),

    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, PartialEq)]
struct Options {
    frames: u64,
    period: Duration,
    workers: Option<usize>,
    fifo: bool,
    config_path: Option<String>,
    json_logs: bool,
    json_report: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            frames: 30,
            period: Duration::from_millis(33),
            workers: None,
            fifo: false,
            config_path: None,
            json_logs: false,
            json_report: false,
        }
    }
}

impl Options {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, DemoError> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| DemoError::Usage(format!("{} needs a value", flag)))
            };
            match arg.as_str() {
                "--frames" => {
                    options.frames = value("--frames")?
                        .parse()
                        .map_err(|e| DemoError::Usage(format!("--frames: {}", e)))?;
                }
                "--period" => {
                    options.period = humantime::parse_duration(&value("--period")?)
                        .map_err(|e| DemoError::Usage(format!("--period: {}", e)))?;
                }
                "--workers" => {
                    let workers = value("--workers")?
                        .parse()
                        .map_err(|e| DemoError::Usage(format!("--workers: {}", e)))?;
                    options.workers = Some(workers);
                }
                "--config" => options.config_path = Some(value("--config")?),
                "--fifo" => options.fifo = true,
                "--json-logs" => options.json_logs = true,
                "--json-report" => options.json_report = true,
                other => return Err(DemoError::Usage(format!("unknown argument {}", other))),
            }
        }
        Ok(options)
    }

    fn pipeline_config(&self) -> Result<PipelineConfig, DemoError> {
        let mut config = match &self.config_path {
            Some(path) => PipelineConfig::from_json(&std::fs::read_to_string(path)?)?,
            None => PipelineConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
            config.pool.reserved_high_workers =
                config.pool.reserved_high_workers.min(workers.saturating_sub(1));
        }
        if self.fifo {
            config.pool.policy = QueuePolicy::Fifo;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camflow=info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    let options = Options::parse(std::env::args().skip(1))?;
    init_logging(options.json_logs);

    let config = options.pipeline_config()?;
    tracing::info!(config = %serde_json::to_string(&config)?, "starting pipeline");

    let memory = Arc::new(MemorySink::new());
    let sink = TeeSink::new().with(memory.clone()).with(Arc::new(LogSink));
    let pipeline = Pipeline::new(config, Arc::new(MonotonicClock::new()), Arc::new(sink))?;

    let camera = CameraConfig {
        period: options.period,
        frames: options.frames,
        ..CameraConfig::default()
    };
    let report = run_camera(&pipeline, &camera).await?;
    if !pipeline.wait_idle(Duration::from_secs(30)) {
        tracing::warn!("pipeline still busy after 30s, reporting partial results");
    }
    pipeline.shutdown();

    let spans = memory.snapshot();
    let summary = LatencySummary::from_spans(&spans);
    let stats = pipeline.stats();

    if options.json_report {
        let latency: serde_json::Map<String, serde_json::Value> = summary
            .iter()
            .map(|(name, s)| {
                let value = serde_json::json!({
                    "count": s.count,
                    "min_us": s.min.as_micros() as u64,
                    "mean_us": s.mean().as_micros() as u64,
                    "max_us": s.max.as_micros() as u64,
                });
                (name.to_string(), value)
            })
            .collect();
        let out = serde_json::json!({
            "frames": report.published,
            "dropped_jobs": report.dropped,
            "honors_priority": pipeline.honors_priority(),
            "degradations": stats.degradations,
            "callback_failures": stats.bus.failed,
            "latency": latency,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("frames published: {} (dropped jobs: {})", report.published, report.dropped);
    let policy = match pipeline.config().pool.policy {
        QueuePolicy::Priority => "priority",
        QueuePolicy::Fifo => "fifo",
    };
    println!(
        "dispatch: {} ({} degradations, priority {})",
        policy,
        stats.degradations,
        if pipeline.honors_priority() { "honored" } else { "degraded" }
    );
    println!();
    println!("{}", summary);
    if let Some(e2e) = summary.get(names::END_TO_END_DELAY) {
        println!("worst end-to-end: {:?}", e2e.max);
    }
    println!(
        "callbacks: detector {}/{} logger {}/{} actuation {}/{} (invocations/failures)",
        stats.object_detector.invocations,
        stats.object_detector.failures,
        stats.data_logger.invocations,
        stats.data_logger.failures,
        stats.actuation.invocations,
        stats.actuation.failures,
    );
    Ok(())
}

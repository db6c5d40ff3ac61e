//! Periodic camera source
//!
//! Publishes stamped frames on a tokio interval. Publishing only enqueues
//! jobs on the worker pool, so the async task never blocks on node work.

use std::time::Duration;

use bytes::Bytes;
use camflow_core::Image;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::humantime_duration;
use crate::{Pipeline, RuntimeResult};

/// Camera source configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Time between two frames
    #[serde(with = "humantime_duration")]
    pub period: Duration,
    /// Frames to publish before stopping
    pub frames: u64,
    /// Payload bytes per frame
    pub payload_len: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            period: Duration::from_millis(33),
            frames: 30,
            payload_len: 640 * 480,
        }
    }
}

impl CameraConfig {
    /// Back-to-back frames, for saturating the pool
    pub fn burst(frames: u64) -> Self {
        CameraConfig {
            period: Duration::from_micros(1),
            frames,
            ..Self::default()
        }
    }
}

/// Outcome of a camera run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CameraReport {
    pub published: u64,
    /// Subscriber jobs the pool refused
    pub dropped: usize,
    /// Publish timestamp of every frame, in order
    pub timestamps: Vec<i64>,
}

/// Publish `config.frames` frames, one per `config.period`.
///
/// Every frame shares one payload buffer; only the timestamp differs.
pub async fn run_camera(pipeline: &Pipeline, config: &CameraConfig) -> RuntimeResult<CameraReport> {
    let payload = Bytes::from(vec![0u8; config.payload_len]);
    let mut ticker = interval(config.period.max(Duration::from_micros(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut report = CameraReport::default();
    for frame in 0..config.frames {
        ticker.tick().await;
        let published_at = pipeline.clock().now_nanos();
        let receipt = pipeline.publish(Image::new(published_at, payload.clone()))?;
        if receipt.dropped > 0 {
            tracing::warn!(frame, dropped = receipt.dropped, "pool rejected frame jobs");
        }
        report.published += 1;
        report.dropped += receipt.dropped;
        report.timestamps.push(published_at);
    }

    tracing::debug!(frames = report.published, dropped = report.dropped, "camera done");
    Ok(report)
}

//! Latency summary over recorded spans

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::SpanRecord;

/// Aggregate durations for one span name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
}

impl LatencyStats {
    fn observe(&mut self, d: Duration) {
        if self.count == 0 || d < self.min {
            self.min = d;
        }
        if d > self.max {
            self.max = d;
        }
        self.total += d;
        self.count += 1;
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Per-name latency statistics, ordered by name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LatencySummary {
    stats: BTreeMap<String, LatencyStats>,
}

impl LatencySummary {
    pub fn from_spans<'a, I>(spans: I) -> Self
    where
        I: IntoIterator<Item = &'a SpanRecord>,
    {
        let mut summary = LatencySummary::default();
        for span in spans {
            summary
                .stats
                .entry(span.name.to_string())
                .or_default()
                .observe(span.duration());
        }
        summary
    }

    pub fn get(&self, name: &str) -> Option<&LatencyStats> {
        self.stats.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LatencyStats)> {
        self.stats.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>6} {:>12} {:>12} {:>12}",
            "span", "count", "min(us)", "mean(us)", "max(us)"
        )?;
        for (name, stats) in self.iter() {
            writeln!(
                f,
                "{:<16} {:>6} {:>12} {:>12} {:>12}",
                name,
                stats.count,
                stats.min.as_micros(),
                stats.mean().as_micros(),
                stats.max.as_micros()
            )?;
        }
        Ok(())
    }
}

//! Time-bucketed aggregation windows
//!
//! A sample with timestamp `ts` belongs to the window starting at
//! `floor(ts / width) * width`. Assignment depends only on the sample's own
//! timestamp, never on arrival order, so reordering introduced by concurrent
//! workers does not change the result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MetricSample, Tags};

/// Identity of one window: metric name, tag set and window start
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub metric: String,
    pub tags: Tags,
    /// Window start in unix milliseconds
    pub start_ms: i64,
}

/// Summary statistics of all samples that fell into one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationWindow {
    pub metric: String,
    pub tags: Tags,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,

    /// Flushed before its grace period elapsed (shutdown)
    #[serde(default)]
    pub partial: bool,
}

/// Start of the window containing `timestamp`, in unix milliseconds
pub fn window_start_ms(timestamp: DateTime<Utc>, width: Duration) -> i64 {
    let width_ms = width.as_millis().max(1) as i64;
    timestamp.timestamp_millis().div_euclid(width_ms) * width_ms
}

impl WindowKey {
    pub fn for_sample(sample: &MetricSample, width: Duration) -> Self {
        Self {
            metric: sample.metric.clone(),
            tags: sample.tags.clone(),
            start_ms: window_start_ms(sample.timestamp, width),
        }
    }
}

impl AggregationWindow {
    /// Open a new window for `key` seeded with its first value
    pub fn open(key: &WindowKey, width: Duration, value: f64) -> Self {
        let start = DateTime::<Utc>::from_timestamp_millis(key.start_ms).unwrap_or_default();
        let end = start + chrono::Duration::milliseconds(width.as_millis() as i64);

        Self {
            metric: key.metric.clone(),
            tags: key.tags.clone(),
            start,
            end,
            count: 1,
            sum: value,
            min: value,
            max: value,
            partial: false,
        }
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn key(&self) -> WindowKey {
        WindowKey {
            metric: self.metric.clone(),
            tags: self.tags.clone(),
            start_ms: self.start.timestamp_millis(),
        }
    }

    /// Whether `now` is past `end + grace`, i.e. the window may be flushed
    pub fn is_closed(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now > self.end + chrono::Duration::milliseconds(grace.as_millis() as i64)
    }
}

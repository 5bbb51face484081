//! Database rows for aggregation windows and pass-through samples
//!
//! ## Layout
//!
//! Statistics are stored as typed columns so range queries and dashboards can
//! read them directly. The tag set is stored as a canonical JSON string: tags
//! are kept in a `BTreeMap`, so the same tag set always serializes to the same
//! text and can take part in the `(metric, tags, window_start)` primary key.

use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use crate::window::AggregationWindow;
use crate::{MetricSample, Tags};

/// One row of the `aggregation_windows` table
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRow {
    pub metric: String,
    /// Canonical JSON encoding of the tag set
    pub tags: String,
    /// Window start (unix milliseconds)
    pub window_start: i64,
    /// Window end (unix milliseconds)
    pub window_end: i64,
    pub count: i64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub partial: bool,
}

/// One row of the `raw_samples` table
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub source: String,
    pub metric: String,
    pub value: f64,
    /// Sample timestamp (unix milliseconds)
    pub timestamp: i64,
    pub tags: String,
}

pub fn encode_tags(tags: &Tags) -> StorageResult<String> {
    serde_json::to_string(tags)
        .map_err(|e| StorageError::InvalidTags(format!("failed to serialize tags: {e}")))
}

pub fn decode_tags(raw: &str) -> StorageResult<Tags> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::InvalidTags(format!("failed to deserialize tags: {e}")))
}

fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl WindowRow {
    pub fn from_window(window: &AggregationWindow) -> StorageResult<Self> {
        Ok(Self {
            metric: window.metric.clone(),
            tags: encode_tags(&window.tags)?,
            window_start: window.start.timestamp_millis(),
            window_end: window.end.timestamp_millis(),
            count: window.count as i64,
            sum: window.sum,
            min: window.min,
            max: window.max,
            partial: window.partial,
        })
    }

    pub fn into_window(self) -> StorageResult<AggregationWindow> {
        Ok(AggregationWindow {
            tags: decode_tags(&self.tags)?,
            metric: self.metric,
            start: millis_to_timestamp(self.window_start),
            end: millis_to_timestamp(self.window_end),
            count: self.count.max(0) as u64,
            sum: self.sum,
            min: self.min,
            max: self.max,
            partial: self.partial,
        })
    }
}

impl SampleRow {
    pub fn from_sample(sample: &MetricSample) -> StorageResult<Self> {
        Ok(Self {
            source: sample.source.clone(),
            metric: sample.metric.clone(),
            value: sample.value,
            timestamp: sample.timestamp.timestamp_millis(),
            tags: encode_tags(&sample.tags)?,
        })
    }
}

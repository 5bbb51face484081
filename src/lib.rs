pub mod actors;
pub mod api;
pub mod codec;
pub mod config;
pub mod manager;
pub mod notify;
pub mod storage;
pub mod supervisor;
pub mod util;
pub mod window;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag set attached to a sample
///
/// A `BTreeMap` keeps the tags ordered, so two samples carrying the same tags
/// always hash and compare equal regardless of the order they arrived in.
pub type Tags = BTreeMap<String, String>;

/// A single timestamped observation reported by a remote agent
///
/// Samples are created by the ingress decoder and moved by value through the
/// pipeline, so nothing can mutate them once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Identifier of the reporting agent (used as the routing key)
    pub source: String,

    /// Metric name, e.g. `cpu.load`
    pub metric: String,

    /// Observed value
    pub value: f64,

    /// When the observation was taken (agent clock)
    pub timestamp: DateTime<Utc>,

    /// Optional dimensions
    #[serde(default)]
    pub tags: Tags,
}

impl MetricSample {
    pub fn new(
        source: impl ToString,
        metric: impl ToString,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.to_string(),
            metric: metric.to_string(),
            value,
            timestamp,
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

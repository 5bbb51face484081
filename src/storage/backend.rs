//! Monitoring store trait definition
//!
//! The store is the external time-series sink of the collector. The
//! aggregation scheduler writes closed windows, workers write pass-through
//! samples, and `FlushMonitoringData` resets it on startup.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::MetricSample;
use crate::window::AggregationWindow;

/// Query parameters for fetching flushed windows
#[derive(Debug, Clone)]
pub struct WindowQuery {
    /// Metric to query
    pub metric: String,

    /// Earliest window start (inclusive)
    pub start: DateTime<Utc>,

    /// Latest window start (inclusive)
    pub end: DateTime<Utc>,
}

/// Health status of the store
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for monitoring data stores
///
/// ## Idempotency
///
/// `write_window` is an upsert keyed by `(metric, tags, start)`, so the
/// aggregation scheduler may retry a failed write without creating duplicates.
/// `reset` must succeed on an empty store.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: workers and the aggregation
/// scheduler share one store across tasks.
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    /// Persist one closed aggregation window
    async fn write_window(&self, window: &AggregationWindow) -> StorageResult<()>;

    /// Persist raw samples of pass-through metrics
    async fn write_samples(&self, samples: &[MetricSample]) -> StorageResult<()>;

    /// Drop all monitoring data left over from a previous run
    async fn reset(&self) -> StorageResult<()>;

    /// Windows of one metric whose start lies within the query range, oldest first
    async fn query_windows(&self, query: WindowQuery) -> StorageResult<Vec<AggregationWindow>>;

    /// Lightweight check that the backend is reachable
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

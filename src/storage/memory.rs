//! In-memory monitoring store (no persistence)
//!
//! Useful for tests and for deployments that only forward aggregates through
//! the management API. All data is lost on restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, MonitoringStore, WindowQuery};
use super::error::StorageResult;
use crate::MetricSample;
use crate::window::{AggregationWindow, WindowKey};

/// Maximum raw samples retained for pass-through metrics
const MAX_RAW_SAMPLES: usize = 10_000;

#[derive(Default)]
struct MemoryState {
    windows: BTreeMap<WindowKey, AggregationWindow>,
    samples: Vec<MetricSample>,
    window_writes: u64,
}

/// In-memory store with interior mutability
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored window, ordered by key
    pub fn windows(&self) -> Vec<AggregationWindow> {
        self.state.read().windows.values().cloned().collect()
    }

    /// Raw pass-through samples, in arrival order
    pub fn samples(&self) -> Vec<MetricSample> {
        self.state.read().samples.clone()
    }

    /// Number of `write_window` calls, including overwrites
    pub fn window_writes(&self) -> u64 {
        self.state.read().window_writes
    }
}

#[async_trait]
impl MonitoringStore for MemoryStore {
    async fn write_window(&self, window: &AggregationWindow) -> StorageResult<()> {
        let mut state = self.state.write();
        state.window_writes += 1;
        state.windows.insert(window.key(), window.clone());
        Ok(())
    }

    async fn write_samples(&self, samples: &[MetricSample]) -> StorageResult<()> {
        let mut state = self.state.write();
        state.samples.extend_from_slice(samples);
        let len = state.samples.len();
        if len > MAX_RAW_SAMPLES {
            state.samples.drain(..len - MAX_RAW_SAMPLES);
        }
        Ok(())
    }

    async fn reset(&self) -> StorageResult<()> {
        debug!("resetting in-memory store");
        let mut state = self.state.write();
        state.windows.clear();
        state.samples.clear();
        Ok(())
    }

    async fn query_windows(&self, query: WindowQuery) -> StorageResult<Vec<AggregationWindow>> {
        let state = self.state.read();
        Ok(state
            .windows
            .values()
            .filter(|w| w.metric == query.metric && w.start >= query.start && w.start <= query.end)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("windows".to_string(), state.windows.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}

//! Test helpers shared by the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardia_collector::{
    MetricSample,
    actors::counters::PipelineSnapshot,
    codec,
    config::{Config, IngressConfig, WireFormat},
    manager::CollectorManager,
    storage::{
        HealthStatus, MemoryStore, MonitoringStore, StorageError, StorageResult, WindowQuery,
    },
    window::AggregationWindow,
};
use tokio::net::UdpSocket;

/// Config bound to an ephemeral port with a fast aggregation tick
pub fn create_test_config() -> Config {
    let mut config = Config {
        ingress: IngressConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    config.aggregation.tick_interval_ms = 50;
    config.aggregation.flush_retry_backoff_ms = 10;
    config
}

pub fn create_sample(source: &str, metric: &str, value: f64) -> MetricSample {
    MetricSample::new(source, metric, value, Utc::now())
}

/// Timestamp far enough from the end of its window that the window stays
/// open for the rest of the test step
pub async fn fresh_window_timestamp(window: Duration, margin: Duration) -> DateTime<Utc> {
    let width = window.as_millis() as i64;
    let now = Utc::now().timestamp_millis();
    let remaining = width - now.rem_euclid(width);

    if remaining < margin.as_millis() as i64 {
        tokio::time::sleep(Duration::from_millis(remaining as u64 + 10)).await;
    }
    Utc::now()
}

pub async fn send_samples(addr: SocketAddr, samples: &[MetricSample]) {
    send_raw(addr, &codec::encode(WireFormat::Json, samples)).await;
}

pub async fn send_raw(addr: SocketAddr, payload: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(payload, addr).await.unwrap();
}

/// Poll the pipeline counters until `done` holds or five seconds passed
pub async fn wait_for_counters(
    manager: &CollectorManager,
    done: impl Fn(&PipelineSnapshot) -> bool,
) -> PipelineSnapshot {
    for _ in 0..500 {
        let snapshot = manager.counters();
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("counters never reached the expected state: {:?}", manager.counters());
}

/// Store whose window writes fail a fixed number of times before
/// delegating to an in-memory store
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }

    /// A store that never accepts a window
    pub fn failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn windows(&self) -> Vec<AggregationWindow> {
        self.inner.windows()
    }
}

#[async_trait]
impl MonitoringStore for FlakyStore {
    async fn write_window(&self, window: &AggregationWindow) -> StorageResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::BackendError("store offline".to_string()));
        }
        self.inner.write_window(window).await
    }

    async fn write_samples(&self, samples: &[MetricSample]) -> StorageResult<()> {
        self.inner.write_samples(samples).await
    }

    async fn reset(&self) -> StorageResult<()> {
        self.inner.reset().await
    }

    async fn query_windows(&self, query: WindowQuery) -> StorageResult<Vec<AggregationWindow>> {
        self.inner.query_windows(query).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

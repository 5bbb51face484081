//! Failure tests for the collector
//!
//! These tests verify that the collector degrades instead of crashing:
//! - Store writes that fail for a while are retried
//! - Store writes that keep failing discard the window and raise an alert
//! - A taken ingress port leaves nothing running

use std::sync::Arc;
use std::time::Duration;

use guardia_collector::{
    MetricSample,
    config::HandlerConfig,
    manager::{CollectorManager, ManagerState},
    notify::{HandlerKind, HandlerRequest},
    storage::MemoryStore,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_flaky_store_is_retried_on_shutdown_flush() {
    let store = Arc::new(FlakyStore::new(2));
    let mut manager = CollectorManager::initialize(create_test_config(), store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let ts = fresh_window_timestamp(Duration::from_secs(10), Duration::from_secs(3)).await;
    let samples: Vec<MetricSample> = (0..4)
        .map(|i| MetricSample::new("agent-1", "disk.io", i as f64, ts))
        .collect();
    send_samples(addr, &samples).await;
    wait_for_counters(&manager, |c| c.aggregated == 4).await;

    manager.shutdown().await.unwrap();

    let windows = store.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].count, 4);
}

#[tokio::test]
async fn test_failing_store_discards_window_and_alerts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({
            "alert": { "type": "window_discarded", "metric": "disk.io", "count": 3 }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.aggregation.window_secs = 1;
    config.aggregation.grace_period_secs = 0;
    config.aggregation.flush_retry_attempts = 1;
    config.notifications = vec![HandlerConfig {
        kind: HandlerKind::Webhook,
        request: HandlerRequest {
            name: "ops".to_string(),
            url: server.uri(),
            user_id: None,
            smtp: None,
        },
    }];

    let store = Arc::new(FlakyStore::failing());
    let mut manager = CollectorManager::initialize(config, store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let ts = fresh_window_timestamp(Duration::from_secs(1), Duration::from_millis(500)).await;
    let samples: Vec<MetricSample> = (0..3)
        .map(|i| MetricSample::new("agent-1", "disk.io", i as f64, ts))
        .collect();
    send_samples(addr, &samples).await;

    let mut discarded = 0;
    for _ in 0..100 {
        let status = manager.status().await.unwrap();
        discarded = status.aggregator.map(|a| a.windows_discarded).unwrap_or(0);
        if discarded == 1 && !server.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(discarded, 1);

    manager.shutdown().await.unwrap();
    assert!(store.windows().is_empty());
}

#[tokio::test]
async fn test_taken_port_leaves_nothing_running() {
    let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = create_test_config();
    config.ingress.bind = taken.local_addr().unwrap().to_string();

    let mut manager =
        CollectorManager::initialize(config, Arc::new(MemoryStore::new())).unwrap();
    let err = manager.start().await.unwrap_err();

    assert!(format!("{err:#}").contains("failed to bind"));
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert_eq!(manager.pool_size(), 0);
    assert!(manager.local_addr().is_none());
}

//! End-to-end tests for the ingestion pipeline
//!
//! Samples go over real UDP into a running manager and are checked in the
//! store after shutdown has flushed every open window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use guardia_collector::{
    MetricSample, codec,
    config::WireFormat,
    manager::CollectorManager,
    storage::MemoryStore,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_samples_are_aggregated_into_one_window() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(create_test_config(), store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let ts = fresh_window_timestamp(Duration::from_secs(10), Duration::from_secs(3)).await;
    let samples: Vec<MetricSample> = (0..20)
        .map(|i| MetricSample::new(format!("agent-{}", i % 4), "cpu.load", i as f64, ts))
        .collect();
    send_samples(addr, &samples).await;

    wait_for_counters(&manager, |c| c.aggregated == 20).await;
    manager.shutdown().await.unwrap();

    let windows = store.windows();
    assert_eq!(windows.len(), 1);
    let window = &windows[0];
    assert_eq!(window.metric, "cpu.load");
    assert_eq!(window.count, 20);
    assert_eq!(window.sum, 190.0);
    assert_eq!(window.min, 0.0);
    assert_eq!(window.max, 19.0);
    // shutdown flushes before the grace period is over
    assert!(window.partial);
}

#[tokio::test]
async fn test_every_sample_is_accounted_for_under_pressure() {
    let mut config = create_test_config();
    config.collector.initial_workers = 2;
    config.collector.queue_capacity = 100;

    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(config, store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let ts = fresh_window_timestamp(Duration::from_secs(10), Duration::from_secs(3)).await;
    let samples: Vec<MetricSample> = (0..150)
        .map(|i| MetricSample::new(format!("agent-{}", i % 7), "cpu.load", 1.0, ts))
        .collect();
    for chunk in samples.chunks(50) {
        send_samples(addr, chunk).await;
    }

    wait_for_counters(&manager, |c| c.decoded == 150).await;
    manager.shutdown().await.unwrap();

    let counters = manager.counters();
    let aggregated: u64 = store.windows().iter().map(|w| w.count).sum();
    assert_eq!(aggregated, counters.aggregated);
    assert_eq!(aggregated + counters.dropped(), 150);
}

#[tokio::test]
async fn test_malformed_and_invalid_samples_are_counted() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(create_test_config(), store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let now_ms = Utc::now().timestamp_millis();
    send_raw(addr, b"definitely not json").await;
    let payload = serde_json::json!([
        { "source": "a1", "metric": "cpu.load", "value": 0.5, "timestamp": now_ms },
        { "source": "a1" },
        { "source": "a1", "metric": "9bad", "value": 0.5, "timestamp": now_ms },
        { "source": "a1", "metric": "cpu.load", "value": 0.5, "timestamp": now_ms - 7_200_000 },
    ]);
    send_raw(addr, payload.to_string().as_bytes()).await;

    let counters =
        wait_for_counters(&manager, |c| c.malformed == 2 && c.aggregated + c.invalid == 3).await;
    assert_eq!(counters.datagrams, 2);
    assert_eq!(counters.decoded, 3);
    assert_eq!(counters.invalid, 2);
    assert_eq!(counters.aggregated, 1);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_passthrough_metrics_skip_aggregation() {
    let mut config = create_test_config();
    config.collector.passthrough_metrics = vec!["heartbeat".to_string()];

    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(config, store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let mut samples: Vec<MetricSample> = (0..5)
        .map(|i| create_sample(&format!("agent-{i}"), "heartbeat", 1.0))
        .collect();
    samples.push(create_sample("agent-0", "cpu.load", 0.3));
    send_samples(addr, &samples).await;

    wait_for_counters(&manager, |c| c.passthrough == 5 && c.aggregated == 1).await;
    manager.shutdown().await.unwrap();

    assert_eq!(store.samples().len(), 5);
    assert!(store.samples().iter().all(|s| s.metric == "heartbeat"));
    let windows = store.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].metric, "cpu.load");
}

#[tokio::test]
async fn test_line_format_keeps_tag_sets_apart() {
    let mut config = create_test_config();
    config.ingress.format = WireFormat::Line;

    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(config, store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let ts = fresh_window_timestamp(Duration::from_secs(10), Duration::from_secs(3)).await;
    let samples = vec![
        MetricSample::new("a1", "mem.used", 10.0, ts),
        MetricSample::new("a2", "mem.used", 20.0, ts).with_tag("dc", "eu"),
        MetricSample::new("a3", "mem.used", 30.0, ts).with_tag("dc", "eu"),
    ];
    send_raw(addr, &codec::encode(WireFormat::Line, &samples)).await;

    wait_for_counters(&manager, |c| c.aggregated == 3).await;
    manager.shutdown().await.unwrap();

    let windows = store.windows();
    assert_eq!(windows.len(), 2);
    let tagged = windows.iter().find(|w| !w.tags.is_empty()).unwrap();
    assert_eq!(tagged.count, 2);
    assert_eq!(tagged.mean(), 25.0);
}

#[tokio::test]
async fn test_samples_for_closed_windows_are_late() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(create_test_config(), store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let past = Utc::now() - chrono::Duration::seconds(60);
    let samples: Vec<MetricSample> = (0..3)
        .map(|i| MetricSample::new("a1", "cpu.load", i as f64, past))
        .collect();
    send_samples(addr, &samples).await;

    wait_for_counters(&manager, |c| c.late == 3).await;
    manager.shutdown().await.unwrap();

    assert!(store.windows().is_empty());
}

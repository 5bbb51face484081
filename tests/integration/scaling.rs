//! Tests for the scale scheduler acting on a live worker pool

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use guardia_collector::{
    MetricSample,
    actors::{
        alert::AlertHandle,
        counters::PipelineCounters,
        pool::WorkerPool,
        queue::sample_queue,
        router::SampleRouter,
        scaler::{ScaleDecision, ScalerHandle},
        worker::WorkerContext,
    },
    config::{CollectorConfig, ScalePolicy},
    manager::CollectorManager,
    notify::{HandlerKind, HandlerRequest, NotificationRegistry},
    storage::MemoryStore,
};
use tokio::sync::broadcast;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_idle_pool_shrinks_to_minimum() {
    let mut config = create_test_config();
    config.collector.initial_workers = 3;
    config.scale.min_workers = 1;
    config.scale.max_workers = 4;
    config.scale.tick_interval_ms = 100;
    config.scale.cooldown_secs = 1;

    let mut manager =
        CollectorManager::initialize(config, Arc::new(MemoryStore::new())).unwrap();
    manager.start().await.unwrap();
    assert_eq!(manager.pool_size(), 3);

    for _ in 0..50 {
        if manager.pool_size() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(manager.pool_size(), 1);

    let status = manager.status().await.unwrap();
    let scaler = status.scaler.unwrap();
    assert_eq!(scaler.scale_downs, 2);
    assert_eq!(scaler.scale_ups, 0);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_scale_is_clamped_to_policy() {
    let mut config = create_test_config();
    config.scale.min_workers = 1;
    config.scale.max_workers = 4;

    let mut manager =
        CollectorManager::initialize(config, Arc::new(MemoryStore::new())).unwrap();
    manager.start().await.unwrap();
    let control = manager.control();

    assert_eq!(control.scale_by(100).await.unwrap(), 4);
    assert_eq!(manager.pool_size(), 4);
    assert_eq!(control.scale_by(-100).await.unwrap(), 1);
    assert_eq!(manager.pool_size(), 1);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_samples_lost_across_resize() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = CollectorManager::initialize(create_test_config(), store.clone()).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();
    let control = manager.control();

    let ts = fresh_window_timestamp(Duration::from_secs(10), Duration::from_secs(3)).await;
    let batch = |round: usize| -> Vec<MetricSample> {
        (0..40)
            .map(|i| MetricSample::new(format!("agent-{round}-{i}"), "net.rx", 1.0, ts))
            .collect()
    };

    send_samples(addr, &batch(0)).await;
    control.scale_by(2).await.unwrap();
    send_samples(addr, &batch(1)).await;
    control.scale_by(-3).await.unwrap();
    send_samples(addr, &batch(2)).await;

    wait_for_counters(&manager, |c| c.decoded == 120).await;
    manager.shutdown().await.unwrap();

    let counters = manager.counters();
    assert_eq!(counters.dropped(), 0);
    assert_eq!(counters.aggregated, 120);
    assert_eq!(store.windows().iter().map(|w| w.count).sum::<u64>(), 120);
}

#[tokio::test]
async fn test_saturation_and_recovery_reach_notification_handler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let registry = Arc::new(NotificationRegistry::new());
    registry
        .create(
            HandlerKind::Webhook,
            HandlerRequest {
                name: "ops".to_string(),
                url: server.uri(),
                user_id: None,
                smtp: None,
            },
        )
        .await
        .unwrap();

    let (alert_tx, alert_rx) = broadcast::channel(16);
    let (alerts, alerts_task) = AlertHandle::spawn(registry, alert_rx);

    let (queue, mut consumer) = sample_queue(4, Duration::from_millis(10));
    for i in 0..4 {
        queue
            .push(create_sample(&format!("agent-{i}"), "cpu.load", 1.0))
            .await
            .unwrap();
    }

    let context = WorkerContext::new(
        &CollectorConfig::default(),
        queue.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(PipelineCounters::default()),
    );
    let pool = Arc::new(WorkerPool::new(SampleRouter::new(), context, 16));
    pool.start_collector(1).await.unwrap();

    let policy = ScalePolicy {
        tick_interval_ms: 600_000,
        min_workers: 1,
        max_workers: 1,
        saturation_grace: 0,
        ..Default::default()
    };
    // the scaler is not the only publisher; the alert actor outlives it
    let (scaler, scaler_task) = ScalerHandle::spawn(policy, pool.clone(), queue, alert_tx.clone());

    let evaluation = scaler.evaluate_now().await.unwrap();
    assert_eq!(evaluation.decision, ScaleDecision::Hold);
    assert!(scaler.stats().await.unwrap().saturated);

    consumer.drain();
    let evaluation = scaler.evaluate_now().await.unwrap();
    assert_matches!(evaluation.decision, ScaleDecision::Hold);
    assert!(!scaler.stats().await.unwrap().saturated);

    for _ in 0..100 {
        if server.received_requests().await.unwrap_or_default().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let requests = server.received_requests().await.unwrap();
    let kinds: Vec<String> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["alert"]["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds, vec!["pool_saturated", "pool_recovered"]);

    scaler.shutdown().await.unwrap();
    scaler_task.await.unwrap();
    alerts.shutdown().await.unwrap();
    alerts_task.await.unwrap();
    drop(alert_tx);
    pool.shutdown().await;
}

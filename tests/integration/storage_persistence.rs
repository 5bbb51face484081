//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Flushed windows survive a restart of the store
//! - Pass-through samples are written as raw rows
//! - Starting the collector clears data left by a previous run

use std::time::Duration;

use chrono::Utc;
use guardia_collector::{
    MetricSample,
    config::StorageConfig,
    manager::CollectorManager,
    storage::{MonitoringStore, WindowQuery, open_store, sqlite::SqliteStore},
    window::{AggregationWindow, WindowKey},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

fn query(metric: &str) -> WindowQuery {
    WindowQuery {
        metric: metric.to_string(),
        start: Utc::now() - chrono::Duration::hours(1),
        end: Utc::now() + chrono::Duration::hours(1),
    }
}

#[tokio::test]
async fn test_windows_survive_store_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("collector.db");

    let mut config = create_test_config();
    config.storage = StorageConfig::Sqlite {
        path: db_path.clone(),
    };
    config.collector.passthrough_metrics = vec!["heartbeat".to_string()];

    let store = open_store(&config.storage).await.unwrap();
    let mut manager = CollectorManager::initialize(config, store).unwrap();
    manager.start().await.unwrap();
    let addr = manager.local_addr().unwrap();

    let ts = fresh_window_timestamp(Duration::from_secs(10), Duration::from_secs(3)).await;
    let samples = vec![
        MetricSample::new("a1", "cpu.load", 0.25, ts),
        MetricSample::new("a2", "cpu.load", 0.75, ts),
        MetricSample::new("a1", "heartbeat", 1.0, ts),
    ];
    send_samples(addr, &samples).await;
    wait_for_counters(&manager, |c| c.aggregated == 2 && c.passthrough == 1).await;
    manager.shutdown().await.unwrap();

    let reopened = SqliteStore::new(&db_path).await.unwrap();
    let windows = reopened.query_windows(query("cpu.load")).await.unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].count, 2);
    assert_eq!(windows[0].mean(), 0.5);
    assert!(windows[0].partial);

    let health = reopened.health_check().await.unwrap();
    assert!(health.healthy);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_start_flushes_previous_run() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("collector.db");

    let seeded = SqliteStore::new(&db_path).await.unwrap();
    let ts = Utc::now();
    let width = Duration::from_secs(10);
    let key = WindowKey::for_sample(&MetricSample::new("a1", "cpu.load", 1.0, ts), width);
    let mut window = AggregationWindow::open(&key, width, 1.0);
    window.record(3.0);
    seeded.write_window(&window).await.unwrap();
    assert_eq!(seeded.query_windows(query("cpu.load")).await.unwrap().len(), 1);
    seeded.close().await.unwrap();

    let mut config = create_test_config();
    config.storage = StorageConfig::Sqlite {
        path: db_path.clone(),
    };
    let store = open_store(&config.storage).await.unwrap();
    let mut manager = CollectorManager::initialize(config, store).unwrap();
    manager.start().await.unwrap();
    manager.shutdown().await.unwrap();

    let reopened = SqliteStore::new(&db_path).await.unwrap();
    assert!(reopened.query_windows(query("cpu.load")).await.unwrap().is_empty());
    reopened.close().await.unwrap();
}

//! Tests for the management API served over a real TCP socket

use std::sync::Arc;

use guardia_collector::{
    api::{ApiState, spawn_api_server},
    config::ApiSettings,
    manager::CollectorManager,
    storage::MemoryStore,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::helpers::*;

#[tokio::test]
async fn test_api_server_controls_running_collector() {
    let mut manager =
        CollectorManager::initialize(create_test_config(), Arc::new(MemoryStore::new())).unwrap();
    manager.start().await.unwrap();

    let settings = ApiSettings {
        bind: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some("test-secret".to_string()),
        enable_cors: false,
    };
    let (addr, server) = spawn_api_server(&settings, ApiState::new(manager.control()))
        .await
        .unwrap();
    let base = format!("http://{addr}/api/v1");
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/status")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let status: Value = client
        .get(format!("{base}/status"))
        .header("X-COLLECTOR-SECRET", "test-secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["pool_size"], 2);
    assert_eq!(status["ingress_addr"], manager.local_addr().unwrap().to_string());

    let scaled: Value = client
        .post(format!("{base}/scale"))
        .header("X-COLLECTOR-SECRET", "test-secret")
        .json(&json!({ "delta": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scaled["pool_size"], 3);
    assert_eq!(manager.pool_size(), 3);

    server.abort();
    manager.shutdown().await.unwrap();
}

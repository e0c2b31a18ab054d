//! Admin HTTP API: masters, status, liveness and metrics endpoints

mod common;

use common::{fast_config, strings, wait_until, FakeConsensus, FakeStore};
use redis_failover::coordinator::{App, MastersState};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

async fn started_app(leader: bool) -> (App, Arc<FakeConsensus>, String) {
    let store = FakeStore::new();
    store.add_group("127.0.0.1:6379", &[]);
    let state = Arc::new(MastersState::new());
    let consensus = FakeConsensus::new(state.clone(), leader);
    let app = App::with_parts(fast_config(&[]), store, state, consensus.clone());
    app.start().await.unwrap();
    let base = format!("http://{}", app.http_addr().unwrap());
    (app, consensus, base)
}

async fn send_json(client: &Client, method: reqwest::Method, url: &str, body: &str) -> (u16, Value) {
    let resp = client
        .request(method, url)
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap();
    (status, serde_json::from_str(&text).unwrap())
}

#[tokio::test]
async fn test_masters_roundtrip() {
    let (app, _consensus, base) = started_app(true).await;
    let client = Client::new();
    let url = format!("{}/masters", base);

    let (status, json) = send_json(
        &client,
        reqwest::Method::POST,
        &url,
        r#"{"masters": ["127.0.0.1:6379", "127.0.0.1:6389"]}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["masters"].as_array().unwrap().len(), 2);

    let text = client.get(&url).send().await.unwrap().text().await.unwrap();
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["masters"][0], "127.0.0.1:6379");

    let (status, json) = send_json(
        &client,
        reqwest::Method::DELETE,
        &url,
        r#"{"masters": ["127.0.0.1:6389"]}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["masters"], serde_json::json!(["127.0.0.1:6379"]));
    assert_eq!(app.get_masters(), strings(&["127.0.0.1:6379"]));

    app.close().await;
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    let (app, _consensus, base) = started_app(true).await;
    let client = Client::new();

    let (status, json) = send_json(
        &client,
        reqwest::Method::POST,
        &format!("{}/masters", base),
        r#"{"masters": ["no-port"]}"#,
    )
    .await;
    assert_eq!(status, 400);
    assert!(json["error"].as_str().unwrap().contains("no-port"));
    assert!(app.get_masters().is_empty());

    app.close().await;
}

#[tokio::test]
async fn test_follower_rejects_mutation() {
    let (app, _consensus, base) = started_app(false).await;
    let client = Client::new();

    let (status, json) = send_json(
        &client,
        reqwest::Method::POST,
        &format!("{}/masters", base),
        r#"{"masters": ["127.0.0.1:6379"]}"#,
    )
    .await;
    assert_eq!(status, 503);
    assert!(json["error"].as_str().unwrap().starts_with("Not leader"));

    app.close().await;
}

#[tokio::test]
async fn test_status_and_metrics() {
    let (app, _consensus, base) = started_app(true).await;
    let client = Client::new();
    app.add_masters(&strings(&["127.0.0.1:6379"])).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || !app.master_health().is_empty()).await);

    let text = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["is_leader"], true);
    assert_eq!(json["monitoring"], true);
    assert_eq!(json["check_interval_ms"], 50);
    assert_eq!(json["health"]["127.0.0.1:6379"]["state"], "healthy");

    let resp = client.get(format!("{}/health/live", base)).send().await.unwrap();
    assert!(resp.status().is_success());

    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("failover_checks_total"));
    assert!(metrics.contains("failover_is_leader"));

    app.close().await;
}

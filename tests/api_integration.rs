//! API Integration Tests for pingmon
//!
//! Drives every HTTP endpoint over a real listener.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pingmon::broadcast::{LiveBroadcaster, ShutdownBroadcaster};
use pingmon::monitor::Peer;
use pingmon::series::TimeSeriesService;
use pingmon::server::{AppState, create_router, serve};
use pingmon::storage::{Sample, SampleStore, StorageBuilder, StorageHandles};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

// =============================================================================
// Test Helpers
// =============================================================================

const PEER_ID: i64 = 65_112_180;

fn test_peers() -> Vec<Peer> {
    vec![
        Peer::new(
            PEER_ID,
            "8.8.8.8".parse().unwrap(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ),
        Peer::new(
            2,
            "2001:db8::2".parse().unwrap(),
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .with_name("v6-peer"),
    ]
}

/// Create test app state with a seeded in-memory database.
async fn create_test_state() -> (AppState, StorageHandles, Arc<ShutdownBroadcaster>) {
    let handles = StorageBuilder::new("sqlite::memory:")
        .build()
        .await
        .expect("Failed to build storage");

    // 10 one-second samples, a 5 second hole, then 5 more with one loss
    for i in 0..10 {
        handles
            .samples
            .insert(&Sample::new(PEER_ID, 100_000 + i * 1_000, 20 + i))
            .await
            .unwrap();
    }
    for i in 0..5 {
        let ts = 115_000 + i * 1_000;
        let sample = if i == 2 {
            Sample::loss(PEER_ID, ts)
        } else {
            Sample::new(PEER_ID, ts, 40)
        };
        handles.samples.insert(&sample).await.unwrap();
    }

    let peers = test_peers();
    let shutdown = Arc::new(ShutdownBroadcaster::new());
    let state = AppState {
        series: Arc::new(TimeSeriesService::new(
            handles.samples.clone(),
            &peers,
            Duration::from_secs(1),
        )),
        store: handles.samples.clone(),
        peers: Arc::new(peers),
        live: LiveBroadcaster::default(),
        shutdown: shutdown.clone(),
        static_dir: None,
    };

    (state, handles, shutdown)
}

/// Start test server and return base URL.
async fn start_test_server() -> (String, StorageHandles, Arc<ShutdownBroadcaster>) {
    let (state, handles, shutdown) = create_test_state().await;
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let token = shutdown.subscribe().unwrap();
    tokio::spawn(async move {
        serve(listener, router, token).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{}", addr), handles, shutdown)
}

async fn get_json(client: &reqwest::Client, url: String) -> (reqwest::StatusCode, Value) {
    let resp = client.get(url).send().await.expect("request failed");
    let status = resp.status();
    let body = resp.json().await.unwrap_or(Value::Null);
    (status, body)
}

// =============================================================================
// Health Probe Tests
// =============================================================================

#[tokio::test]
async fn test_health_probes() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, format!("{}/healthz", base_url)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(&client, format!("{}/readyz", base_url)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "ready");
}

// =============================================================================
// Series Tests
// =============================================================================

#[tokio::test]
async fn test_data_api_fills_gap() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        format!("{}/data?peer={}&start=100000&stop=119000", base_url, PEER_ID),
    )
    .await;
    assert_eq!(status, 200);

    let series = body.as_array().expect("series should be an array");
    // 15 recorded samples plus one placeholder in the hole
    assert_eq!(series.len(), 16);
    assert_eq!(series[10], json!({"ResponseTime": 0, "Time": 110_000}));
    assert_eq!(series[13], json!({"ResponseTime": -1, "Time": 117_000}));

    // Without a range the stored samples come back untouched
    let (_, body) = get_json(&client, format!("{}/data?peer={}", base_url, PEER_ID)).await;
    assert_eq!(body.as_array().unwrap().len(), 15);
}

#[tokio::test]
async fn test_data_api_range_and_max() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        format!("{}/data?peer={}&start=109000&stop=100000&max=5", base_url, PEER_ID),
    )
    .await;
    assert_eq!(status, 200);

    let times: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["Time"].as_i64().unwrap())
        .collect();
    assert_eq!(times, vec![100_000, 102_000, 104_000, 106_000, 108_000]);
}

#[tokio::test]
async fn test_data_api_empty_peer_with_max() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        format!("{}/data?peer=2&start=0&stop=100000&max=3", base_url),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!([
            {"ResponseTime": 0, "Time": 0},
            {"ResponseTime": 0, "Time": 10_000},
            {"ResponseTime": 0, "Time": 20_000},
        ])
    );

    let (_, body) = get_json(&client, format!("{}/data?peer=2", base_url)).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_data_api_bad_request() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    for query in [
        "",
        "?peer=x",
        "?peer=1&start=abc&stop=1",
        "?peer=1&max=1.5",
        "?peer=1&start=0&stop=1&max=1000000000000",
    ] {
        let resp = client
            .get(format!("{}/data{}", base_url, query))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "query {query:?}");
    }
}

// =============================================================================
// Stats and Peers Tests
// =============================================================================

#[tokio::test]
async fn test_stats_api() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        format!("{}/stats?peer={}&start=100000&stop=104000", base_url, PEER_ID),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"AverageResponseTime": 22.0, "Uptime": 100.0}));

    let (status, body) = get_json(&client, format!("{}/stats?peer={}", base_url, PEER_ID)).await;
    assert_eq!(status, 200);
    assert!((body["Uptime"].as_f64().unwrap() - 14.0 * 100.0 / 15.0).abs() < 1e-9);

    let (_, body) = get_json(&client, format!("{}/stats?peer=999", base_url)).await;
    assert_eq!(body, json!({"AverageResponseTime": 0.0, "Uptime": 0.0}));
}

#[tokio::test]
async fn test_peers_api() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, format!("{}/peers", base_url)).await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!([
            {"ID": PEER_ID, "Name": "8.8.8.8", "Address": "8.8.8.8", "Interval": 1000, "Timeout": 1000},
            {"ID": 2, "Name": "v6-peer", "Address": "2001:db8::2", "Interval": 10000, "Timeout": 2000},
        ])
    );
}

// =============================================================================
// Live Data and Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_livedata_requires_websocket_upgrade() {
    let (base_url, _handles, _shutdown) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/livedata", base_url))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn test_router_serves_without_listener() {
    let (state, _handles, _shutdown) = create_test_state().await;
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/data?peer={}&start=118000&stop=119000", PEER_ID))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        body,
        json!([
            {"ResponseTime": 40, "Time": 118_000},
            {"ResponseTime": 40, "Time": 119_000},
        ])
    );
}

#[tokio::test]
async fn test_server_acknowledges_shutdown() {
    let (base_url, handles, shutdown) = start_test_server().await;
    let client = reqwest::Client::new();
    assert_eq!(
        client
            .get(format!("{}/healthz", base_url))
            .send()
            .await
            .unwrap()
            .status(),
        200
    );

    assert_eq!(shutdown.signal(), 1);
    tokio::time::timeout(Duration::from_secs(5), shutdown.wait_for_acknowledgement())
        .await
        .expect("server should acknowledge shutdown");

    let fresh = reqwest::Client::new();
    assert!(fresh.get(format!("{}/healthz", base_url)).send().await.is_err());

    // Store is still usable until the storage layer is shut down.
    assert_eq!(handles.samples.query(PEER_ID, None).await.unwrap().len(), 15);
    handles.shutdown().await.unwrap();
}

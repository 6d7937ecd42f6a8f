//! End-to-end HTTP behavior of the intercepting proxy: passthrough,
//! notifications, batches, malformed entries, and the liveness probe.
//!
//! The upstream is a wiremock JSON-RPC stub. Scanning paths that would fan
//! out to live providers are exercised at the unit level instead; here the
//! interception boundary itself is under test.

use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use assay::policy::RiskPolicy;
use assay::providers::AnalyzeMode;
use assay::proxy::{ProxyOptions, ProxyState, router};
use assay::scan::AssayCore;
use assay::util::SigDown;

async fn spawn_proxy(upstream: Url, record_dir: Option<std::path::PathBuf>) -> SocketAddr {
    let config: assay::config::AssayConfig = serde_json::from_str("{}").unwrap();
    let core = Arc::new(AssayCore::new(config, false));
    let options = ProxyOptions {
        upstream,
        record_dir,
        once: false,
        quiet: true,
        interactive: false,
        policy: RiskPolicy::default(),
        mode: AnalyzeMode::Default,
    };
    let state = Arc::new(ProxyState::new(core, options, Arc::new(SigDown::disarmed())).unwrap());
    let app = router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn upstream_returning(result: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn passthrough_methods_forward_upstream() {
    let upstream = upstream_returning(json!("0x10")).await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;

    let client = reqwest::Client::new();
    let response: Value = client
        .post(format!("http://{addr}/"))
        .json(&json!({ "jsonrpc": "2.0", "id": 7, "method": "eth_blockNumber", "params": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["result"], "0x10");

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn notifications_get_no_content() {
    let upstream = upstream_returning(json!(null)).await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/"))
        .json(&json!({ "jsonrpc": "2.0", "method": "eth_blockNumber", "params": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);
}

#[tokio::test]
async fn parse_error_is_http_400() {
    let upstream = upstream_returning(json!(null)).await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn invalid_entries_are_rejected() {
    let upstream = upstream_returning(json!(null)).await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;
    let client = reqwest::Client::new();

    // Missing jsonrpc tag.
    let body: Value = client
        .post(format!("http://{addr}/"))
        .json(&json!({ "id": 1, "method": "eth_blockNumber" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32600);

    // Malformed send-transaction params never reach the upstream.
    let body: Value = client
        .post(format!("http://{addr}/"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "eth_sendTransaction",
            "params": [{}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32602);

    let body: Value = client
        .post(format!("http://{addr}/"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "eth_sendRawTransaction",
            "params": ["0xzz"]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32602);

    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn batches_preserve_entry_order() {
    let upstream = upstream_returning(json!("0xaa")).await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/"))
        .json(&json!([
            { "jsonrpc": "2.0", "id": 1, "method": "eth_blockNumber", "params": [] },
            { "id": 2, "method": "bad" },
            { "jsonrpc": "2.0", "method": "eth_blockNumber", "params": [] }
        ]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let entries = body.as_array().unwrap();
    // The notification contributes no response entry.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["result"], "0xaa");
    assert_eq!(entries[1]["error"]["code"], -32600);
}

#[tokio::test]
async fn liveness_probe_reports_service() {
    let upstream = upstream_returning(json!(null)).await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["service"], "assay");
    assert!(body["chains"].as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn upstream_invalid_json_maps_to_32000() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&upstream)
        .await;
    let addr = spawn_proxy(Url::parse(&upstream.uri()).unwrap(), None).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/"))
        .json(&json!({ "jsonrpc": "2.0", "id": 9, "method": "eth_blockNumber", "params": [] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32000);
}

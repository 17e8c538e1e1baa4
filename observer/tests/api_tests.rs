//! Unit tests for the observer status API
//!
//! These tests verify the observer's HTTP endpoints through warp's test
//! harness.

use std::sync::Arc;

use warp::http::StatusCode;
use warp::test::request;

use observer::api::{ApiContext, ApiResponse, ApiServer, OutboundStatus, StatusReport};
use observer::config::ApiConfig;
use observer::{Metrics, OutTxProcessorManager};

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{btc_chain, tss_pubkey, tss_signer, KeysignMode, MockBridge, MockKeysignServer, OPERATOR};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Create a test API server over a fresh manager and metrics registry
fn create_test_api_server(manager: OutTxProcessorManager, metrics: Arc<Metrics>) -> ApiServer {
    let tss = Arc::new(tss_signer(
        Arc::new(MockKeysignServer::new(KeysignMode::Honest)),
        MockBridge::new(),
        metrics.clone(),
    ));
    ApiServer::new(
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
        },
        ApiContext {
            operator: OPERATOR.to_string(),
            tss,
            metrics,
            manager,
            chains: vec![btc_chain()],
        },
    )
}

fn default_server() -> ApiServer {
    create_test_api_server(OutTxProcessorManager::new(), Arc::new(Metrics::new().unwrap()))
}

// ============================================================================
// HEALTH ENDPOINT TESTS
// ============================================================================

/// What is tested: Basic health check endpoint
/// Why: Ensures service is running and responsive
#[tokio::test]
async fn test_health_endpoint() {
    let routes = default_server().test_routes();

    let response = request().method("GET").path("/health").reply(&routes).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: ApiResponse<String> = serde_json::from_slice(response.body()).unwrap();
    assert!(body.success);
    assert_eq!(body.data.as_deref(), Some("Observer is running"));
}

// ============================================================================
// STATUS ENDPOINT TESTS
// ============================================================================

/// What is tested: The status report lists the current key, held keys, chains and active outbounds
/// Why: Operators check which key a node signs with
#[tokio::test]
async fn test_status_endpoint() {
    let manager = OutTxProcessorManager::new();
    let _guard = manager.start_try_process("18444-1").unwrap();
    let routes = create_test_api_server(manager, Arc::new(Metrics::new().unwrap())).test_routes();

    let response = request().method("GET").path("/status").reply(&routes).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: ApiResponse<StatusReport> = serde_json::from_slice(response.body()).unwrap();
    let report = body.data.unwrap();
    assert_eq!(report.operator, OPERATOR);
    assert_eq!(report.current_pubkey, tss_pubkey());
    assert_eq!(report.current_evm_address, "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
    assert_eq!(report.keys, vec![tss_pubkey()]);
    assert_eq!(report.chains, vec![btc_chain()]);
    assert_eq!(report.active_outbounds, 1);
}

/// What is tested: The outbound endpoint reports whether an attempt is running
/// Why: Stuck outbounds are diagnosed by their elapsed time
#[tokio::test]
async fn test_outbound_endpoint() {
    let manager = OutTxProcessorManager::new();
    let _guard = manager.start_try_process("18444-3").unwrap();
    let routes = create_test_api_server(manager, Arc::new(Metrics::new().unwrap())).test_routes();

    let response = request()
        .method("GET")
        .path("/outbound/18444/3")
        .reply(&routes)
        .await;
    let body: ApiResponse<OutboundStatus> = serde_json::from_slice(response.body()).unwrap();
    let status = body.data.unwrap();
    assert_eq!(status.out_tx_id, "18444-3");
    assert!(status.active);
    assert!(status.elapsed_ms.is_some());

    let response = request()
        .method("GET")
        .path("/outbound/18444/4")
        .reply(&routes)
        .await;
    let body: ApiResponse<OutboundStatus> = serde_json::from_slice(response.body()).unwrap();
    let status = body.data.unwrap();
    assert!(!status.active);
    assert!(status.elapsed_ms.is_none());
}

// ============================================================================
// METRICS ENDPOINT TESTS
// ============================================================================

/// What is tested: Counters are exposed in the Prometheus text format
/// Why: Blame and outcome counters are scraped by monitoring
#[tokio::test]
async fn test_metrics_endpoint() {
    let metrics = Arc::new(Metrics::new().unwrap());
    metrics.inc_outbound("18444", "broadcast");
    metrics.inc_blame("zetapub1node1");
    let routes = create_test_api_server(OutTxProcessorManager::new(), metrics).test_routes();

    let response = request().method("GET").path("/metrics").reply(&routes).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4"
    );
    let text = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(text.contains("outbound_outcomes_total{chain=\"18444\",outcome=\"broadcast\"} 1"));
    assert!(text.contains("tss_node_blame_total{pubkey=\"zetapub1node1\"} 1"));
}

// ============================================================================
// ERROR HANDLING TESTS
// ============================================================================

/// What is tested: Unknown routes return the error envelope with 404
/// Why: Clients parse every response as ApiResponse
#[tokio::test]
async fn test_unknown_route() {
    let routes = default_server().test_routes();

    let response = request().method("GET").path("/nope").reply(&routes).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ApiResponse<()> = serde_json::from_slice(response.body()).unwrap();
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("Endpoint not found"));
}

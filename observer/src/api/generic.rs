//! Shared API structures, handlers and the server
//!
//! This module contains the response envelope, the status handlers, the
//! rejection handler and the warp server of the observer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use warp::{http::{Method, StatusCode}, Filter, Rejection, Reply};

use crosschain::types::Chain;

use crate::config::ApiConfig;
use crate::metrics::Metrics;
use crate::outbound::{out_tx_id, OutTxProcessorManager};
use crate::tss::TssSigner;

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

/// Snapshot of what this observer is doing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub operator: String,
    /// Hex compressed pubkey of the current TSS
    pub current_pubkey: String,
    /// EVM address derived from the current TSS pubkey
    pub current_evm_address: String,
    /// Pubkeys this node holds a share of
    pub keys: Vec<String>,
    /// Chains with a running outbound worker
    pub chains: Vec<Chain>,
    pub active_outbounds: usize,
}

/// State of one outbound in the processor manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundStatus {
    pub out_tx_id: String,
    pub active: bool,
    /// Elapsed time of the running attempt, or duration of the last one
    pub elapsed_ms: Option<u64>,
}

/// Everything the handlers read.
pub struct ApiContext {
    pub operator: String,
    pub tss: Arc<TssSigner>,
    pub metrics: Arc<Metrics>,
    pub manager: OutTxProcessorManager,
    pub chains: Vec<Chain>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Handler for the status endpoint.
pub async fn get_status_handler(ctx: Arc<ApiContext>) -> Result<impl Reply, Rejection> {
    let report = StatusReport {
        operator: ctx.operator.clone(),
        current_pubkey: ctx.tss.current().pubkey.clone(),
        current_evm_address: ctx.tss.current().evm_address.clone(),
        keys: ctx.tss.keys().keys().cloned().collect(),
        chains: ctx.chains.clone(),
        active_outbounds: ctx.manager.num_active(),
    };
    Ok(warp::reply::json(&ApiResponse {
        success: true,
        data: Some(report),
        error: None,
    }))
}

/// Handler for the state of one outbound.
pub async fn get_outbound_handler(chain_id: i64, nonce: u64, ctx: Arc<ApiContext>) -> Result<impl Reply, Rejection> {
    let id = out_tx_id(chain_id, nonce);
    let status = OutboundStatus {
        active: ctx.manager.is_out_tx_active(&id),
        elapsed_ms: ctx.manager.time_in_try_process(&id).map(|d| d.as_millis() as u64),
        out_tx_id: id,
    };
    Ok(warp::reply::json(&ApiResponse {
        success: true,
        data: Some(status),
        error: None,
    }))
}

/// Handler for the Prometheus text exposition.
pub async fn get_metrics_handler(ctx: Arc<ApiContext>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::with_header(
        ctx.metrics.render(),
        "content-type",
        "text/plain; version=0.0.4",
    ))
}

/// Creates a warp filter that provides the handler context.
pub fn with_context(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (Arc<ApiContext>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::OPTIONS];

    if allowed_origins.contains(&"*".to_string()) {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods.clone())
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Converts warp rejections into `ApiResponse` errors.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// Status HTTP surface of the observer.
pub struct ApiServer {
    config: ApiConfig,
    ctx: Arc<ApiContext>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, ctx: ApiContext) -> Self {
        Self {
            config,
            ctx: Arc::new(ctx),
        }
    }

    /// Serves the API until the process stops.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server stopped
    /// * `Err(anyhow::Error)` - Invalid bind address
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server on {}:{}", self.config.host, self.config.port);

        let routes = self.create_routes();
        let addr: std::net::SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;
        Ok(())
    }

    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let ctx = self.ctx.clone();

        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String> {
                success: true,
                data: Some("Observer is running".to_string()),
                error: None,
            })
        });

        let status = warp::path!("status")
            .and(warp::get())
            .and(with_context(ctx.clone()))
            .and_then(get_status_handler);

        let outbound = warp::path!("outbound" / i64 / u64)
            .and(warp::get())
            .and(with_context(ctx.clone()))
            .and_then(get_outbound_handler);

        let metrics = warp::path!("metrics")
            .and(warp::get())
            .and(with_context(ctx))
            .and_then(get_metrics_handler);

        health
            .or(status)
            .or(outbound)
            .or(metrics)
            .with(create_cors_filter(&self.config.cors_origins))
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    pub fn test_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}

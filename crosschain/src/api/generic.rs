//! Generic API structures and handlers
//!
//! Shared response structure, error mapping, CORS and rejection handling,
//! and the API server that wires every route to the block loop handle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warp::hyper::body::Bytes;
use warp::{
    http::{Method, StatusCode},
    Filter, Rejection, Reply,
};

use crate::config::Config;
use crate::error::{CrosschainError, ErrorKind};
use crate::msg::Msg;
use crate::node::NodeHandle;

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

/// HTTP status for a keeper error.
///
/// Not-found records map to 404, permission failures to 403, malformed
/// requests to 400, and every other rejection to 409.
pub fn status_for_error(e: &CrosschainError) -> StatusCode {
    if e.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    match e.kind() {
        ErrorKind::Permission => StatusCode::FORBIDDEN,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Precondition | ErrorKind::Invariant | ErrorKind::ResourceExhausted => {
            StatusCode::CONFLICT
        }
    }
}

/// Turns a keeper result into a JSON reply with the matching status.
pub fn keeper_reply<T: Serialize>(
    result: std::result::Result<T, CrosschainError>,
) -> warp::reply::WithStatus<warp::reply::Json> {
    match result {
        Ok(data) => warp::reply::with_status(
            warp::reply::json(&ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
            StatusCode::OK,
        ),
        Err(e) => warp::reply::with_status(
            warp::reply::json(&ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(e.to_string()),
            }),
            status_for_error(&e),
        ),
    }
}

/// Parses a raw query string into key/value pairs.
pub fn parse_query(query: &str) -> std::result::Result<HashMap<String, String>, Rejection> {
    let parsed = url::Url::parse(&format!("http://dummy?{}", query))
        .map_err(|e| warp::reject::custom(JsonDeserializeError(format!("Invalid query string: {}", e))))?;
    Ok(parsed.query_pairs().into_owned().collect())
}

/// Parses an optional numeric query parameter.
pub fn parse_param<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    name: &str,
) -> std::result::Result<Option<T>, Rejection>
where
    T::Err: std::fmt::Display,
{
    match params.get(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            warp::reject::custom(JsonDeserializeError(format!("Invalid {}: {}", name, e)))
        }),
    }
}

// ============================================================================
// GENERIC API HANDLERS
// ============================================================================

/// Handler for message submission.
///
/// The message is queued for the next block and the handler waits for the
/// keeper's verdict.
///
/// # Arguments
///
/// * `msg` - Decoded message
/// * `node` - Block loop handle
///
/// # Returns
///
/// * `Ok(warp::Reply)` - JSON response with the message response or the rejection reason
/// * `Err(warp::Rejection)` - Never; a stopped node is reported as 503
pub async fn submit_tx_handler(msg: Msg, node: NodeHandle) -> std::result::Result<impl Reply, Rejection> {
    debug!("Submitting message from {}", msg.creator());
    match node.submit(msg).await {
        Ok(result) => Ok(keeper_reply(result)),
        Err(e) => {
            warn!("Submission failed: {:#}", e);
            Ok(warp::reply::with_status(
                warp::reply::json(&ApiResponse::<()> {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    }
}

/// Handler for the last produced block.
pub async fn get_block_handler(node: NodeHandle) -> std::result::Result<impl Reply, Rejection> {
    let block = node.last_block().await;
    Ok(warp::reply::json(&ApiResponse {
        success: true,
        data: Some(block),
        error: None,
    }))
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

/// Creates a warp filter that provides the block loop handle.
pub fn with_node(
    node: NodeHandle,
) -> impl Filter<Extract = (NodeHandle,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || node.clone())
}

/// Raw query string, empty when the request has none.
pub fn optional_raw_query() -> impl Filter<Extract = (String,), Error = std::convert::Infallible> + Clone {
    warp::query::raw()
        .or(warp::any().map(String::new))
        .unify()
}

// ============================================================================
// CUSTOM REJECTION TYPES
// ============================================================================

/// Custom rejection for JSON deserialization errors
#[derive(Debug)]
pub struct JsonDeserializeError(pub String);

impl warp::reject::Reject for JsonDeserializeError {}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

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

/// Global rejection handler for all API routes.
///
/// # Arguments
///
/// * `rej` - The warp rejection to handle
///
/// # Returns
///
/// A warp reply with an error response
pub async fn handle_rejection(rej: Rejection) -> std::result::Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if let Some(err) = rej.find::<JsonDeserializeError>() {
        (StatusCode::BAD_REQUEST, err.0.clone())
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", err))
    } else if rej.is_not_found() {
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

/// REST API server for the crosschain node.
///
/// Queries read the keeper under a shared lock. Messages go through the
/// block loop so they are ordered with everything else in the block.
pub struct ApiServer {
    /// Service configuration
    config: Arc<Config>,
    /// Block loop handle
    node: NodeHandle,
}

impl ApiServer {
    /// Creates a new API server.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration
    /// * `node` - Handle of the running block loop
    pub fn new(config: Config, node: NodeHandle) -> Self {
        Self {
            config: Arc::new(config),
            node,
        }
    }

    /// Starts the API server and begins handling HTTP requests.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server stopped
    /// * `Err(anyhow::Error)` - Failed to parse the bind address
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            self.config.api.host, self.config.api.port
        );

        let routes = self.create_routes();

        let addr: std::net::SocketAddr = format!("{}:{}", self.config.api.host, self.config.api.port)
            .parse()
            .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;

        Ok(())
    }

    /// Creates all API routes for the server.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        use super::query;

        let node = self.node.clone();

        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String> {
                success: true,
                data: Some("Crosschain node is running".to_string()),
                error: None,
            })
        });

        let block = warp::path("block")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(get_block_handler);

        // POST /tx - Submit a message for the next block
        let submit_node = node.clone();
        let submit_tx = warp::path("tx")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::bytes())
            .and_then(move |body: Bytes| {
                let node = submit_node.clone();
                async move {
                    let body_str = String::from_utf8_lossy(&body);
                    debug!("POST /tx - Received body: {}", body_str);

                    match serde_json::from_slice::<Msg>(&body) {
                        Ok(msg) => submit_tx_handler(msg, node).await,
                        Err(e) => {
                            error!("Message deserialization failed: {}. Body: {}", e, body_str);
                            Err(warp::reject::custom(JsonDeserializeError(format!("Invalid JSON: {}", e))))
                        }
                    }
                }
            });

        let cctx_by_nonce = warp::path!("cctx" / "nonce" / i64 / u64)
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_cctx_by_nonce_handler);

        let cctx_by_nonce_range = warp::path!("cctx" / "range" / i64)
            .and(warp::get())
            .and(optional_raw_query())
            .and(with_node(node.clone()))
            .and_then(query::get_cctx_by_nonce_range_handler);

        let cctx = warp::path!("cctx" / String)
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_cctx_handler);

        let cctx_all = warp::path!("cctx")
            .and(warp::get())
            .and(optional_raw_query())
            .and(with_node(node.clone()))
            .and_then(query::list_cctx_handler);

        let pending = warp::path!("pending" / i64)
            .and(warp::get())
            .and(optional_raw_query())
            .and(with_node(node.clone()))
            .and_then(query::list_pending_cctx_handler);

        let trackers = warp::path!("trackers")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::list_trackers_handler);

        let tracker = warp::path!("trackers" / i64 / u64)
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_tracker_handler);

        let tss = warp::path!("tss")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_tss_handler);

        let tss_history = warp::path!("tss" / "history")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_tss_history_handler);

        let keygen = warp::path!("keygen")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_keygen_handler);

        let flags = warp::path!("flags")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_flags_handler);

        let ballot = warp::path!("ballot" / String)
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_ballot_handler);

        let stability_pool = warp::path!("stability_pool" / i64)
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::get_stability_pool_handler);

        let chain_nonces = warp::path!("nonces")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::list_chain_nonces_handler);

        let pending_nonces = warp::path!("pending_nonces")
            .and(warp::get())
            .and(with_node(node.clone()))
            .and_then(query::list_pending_nonces_handler);

        health
            .or(block)
            .or(submit_tx)
            .or(cctx_by_nonce)
            .or(cctx_by_nonce_range)
            .or(cctx)
            .or(cctx_all)
            .or(pending)
            .or(trackers)
            .or(tracker)
            .or(tss)
            .or(tss_history)
            .or(keygen)
            .or(flags)
            .or(ballot)
            .or(stability_pool)
            .or(chain_nonces)
            .or(pending_nonces)
            .with(create_cors_filter(&self.config.api.cors_origins))
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    #[allow(dead_code)]
    pub fn test_routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}

//! Query handlers
//!
//! Read-only views of the keeper. Each handler takes the shared read lock for
//! the duration of one query.

use warp::{Rejection, Reply};

use super::generic::{keeper_reply, parse_param, parse_query};
use crate::error::CrosschainError;
use crate::keeper::query::QueryAllCctxRequest;
use crate::keeper::PageRequest;
use crate::node::NodeHandle;
use crate::types::CctxStatus;

/// Handler for `GET /cctx/:index`.
pub async fn get_cctx_handler(index: String, node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply(keeper.query_cctx(Some(&index))))
}

/// Handler for `GET /cctx`.
///
/// Query parameters:
/// - status: Only CCTXs in this status (snake_case)
/// - chain_id: Only CCTXs whose current outbound targets this chain
/// - key / offset / limit / count_total: Pagination
pub async fn list_cctx_handler(query: String, node: NodeHandle) -> Result<impl Reply, Rejection> {
    let params = parse_query(&query)?;
    let status = match params.get("status") {
        Some(raw) => match raw.parse::<CctxStatus>() {
            Ok(s) => Some(s),
            Err(e) => return Ok(keeper_reply::<()>(Err(e))),
        },
        None => None,
    };
    let request = QueryAllCctxRequest {
        pagination: Some(PageRequest {
            key: params.get("key").cloned(),
            offset: parse_param(&params, "offset")?,
            limit: parse_param(&params, "limit")?,
            count_total: parse_param(&params, "count_total")?.unwrap_or(false),
        }),
        status,
        chain_id: parse_param(&params, "chain_id")?,
    };

    #[derive(serde::Serialize)]
    struct CctxPage {
        cctxs: Vec<crate::types::CrossChainTx>,
        pagination: crate::keeper::PageResponse,
    }

    let keeper = node.keeper();
    let keeper = keeper.read().await;
    let result = keeper
        .query_all_cctx(Some(&request))
        .map(|(cctxs, pagination)| CctxPage { cctxs, pagination });
    Ok(keeper_reply(result))
}

/// Handler for `GET /cctx/nonce/:chain_id/:nonce`.
pub async fn get_cctx_by_nonce_handler(
    chain_id: i64,
    nonce: u64,
    node: NodeHandle,
) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply(keeper.query_cctx_by_nonce(chain_id, nonce)))
}

/// Handler for `GET /cctx/range/:chain_id?low=&high=`.
pub async fn get_cctx_by_nonce_range_handler(
    chain_id: i64,
    query: String,
    node: NodeHandle,
) -> Result<impl Reply, Rejection> {
    let params = parse_query(&query)?;
    let low: Option<u64> = parse_param(&params, "low")?;
    let high: Option<u64> = parse_param(&params, "high")?;
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    let result = match (low, high) {
        (Some(low), Some(high)) => keeper.query_cctx_by_nonce_range(chain_id, low, high),
        _ => Err(CrosschainError::InvalidRequest("low and high are required".to_string())),
    };
    Ok(keeper_reply(result))
}

/// Handler for `GET /pending/:chain_id?limit=`.
pub async fn list_pending_cctx_handler(
    chain_id: i64,
    query: String,
    node: NodeHandle,
) -> Result<impl Reply, Rejection> {
    let params = parse_query(&query)?;
    let limit = parse_param(&params, "limit")?;
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply(keeper.query_pending_cctx(chain_id, limit)))
}

pub async fn list_trackers_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply::<_>(Ok(keeper.store().all_out_tx_trackers())))
}

pub async fn get_tracker_handler(chain_id: i64, nonce: u64, node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply(keeper.query_out_tx_tracker(chain_id, nonce)))
}

/// Handler for `GET /tss`: the current TSS.
pub async fn get_tss_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    let result = keeper
        .store()
        .get_tss()
        .cloned()
        .ok_or(CrosschainError::CannotFindTssKeys);
    Ok(keeper_reply(result))
}

pub async fn get_tss_history_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply::<_>(Ok(keeper.store().all_tss_history())))
}

pub async fn get_keygen_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    let result = keeper
        .store()
        .get_keygen()
        .cloned()
        .ok_or(CrosschainError::KeygenNotFound);
    Ok(keeper_reply(result))
}

pub async fn get_flags_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply::<_>(Ok(keeper.store().flags().clone())))
}

pub async fn get_ballot_handler(identifier: String, node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply(keeper.query_ballot(&identifier)))
}

/// Handler for `GET /stability_pool/:chain_id`. The balance is a decimal string.
pub async fn get_stability_pool_handler(chain_id: i64, node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    let result = match keeper.store().get_chain(chain_id) {
        Some(_) => Ok(keeper.store().gas_stability_pool_balance(chain_id).to_string()),
        None => Err(CrosschainError::UnsupportedChain(chain_id)),
    };
    Ok(keeper_reply(result))
}

pub async fn list_chain_nonces_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply::<_>(Ok(keeper.store().all_chain_nonces())))
}

pub async fn list_pending_nonces_handler(node: NodeHandle) -> Result<impl Reply, Rejection> {
    let keeper = node.keeper();
    let keeper = keeper.read().await;
    Ok(keeper_reply::<_>(Ok(keeper.store().all_pending_nonces())))
}

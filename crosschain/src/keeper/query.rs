//! Query surface
//!
//! Read-only, paginated views over the store. Invalid pagination or a missing
//! request yields `InvalidRequest`; unknown records yield `NotFound`.

use serde::{Deserialize, Serialize};

use super::Keeper;
use crate::error::{CrosschainError, Result};
use crate::types::{Ballot, CctxStatus, CrossChainTx, OutTxTracker, PendingNonces};

pub const DEFAULT_PAGE_LIMIT: u64 = 100;
pub const MAX_PAGE_LIMIT: u64 = 1000;
/// Widest nonce range accepted by `cctx_by_nonce_range`.
pub const MAX_NONCE_RANGE: u64 = 1000;

// ============================================================================
// PAGINATION
// ============================================================================

/// Page selection. `key` is the opaque cursor returned as `next_key`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub count_total: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageResponse {
    /// Cursor for the next page, absent on the last page
    pub next_key: Option<String>,
    /// Total matching items, when `count_total` was requested
    pub total: Option<u64>,
}

/// Slices an ordered sequence of `(key, item)` according to `page`.
///
/// # Returns
///
/// * `Ok((Vec<T>, PageResponse))` - The page and the cursor to the next one
/// * `Err(CrosschainError::InvalidRequest)` - Both key and offset set, bad cursor, or limit too large
pub fn paginate<T>(
    items: impl Iterator<Item = (String, T)>,
    page: &PageRequest,
) -> Result<(Vec<T>, PageResponse)> {
    if page.key.is_some() && page.offset.is_some() {
        return Err(CrosschainError::InvalidRequest(
            "either offset or key is expected, got both".to_string(),
        ));
    }
    let limit = match page.limit {
        None | Some(0) => DEFAULT_PAGE_LIMIT,
        Some(l) if l > MAX_PAGE_LIMIT => {
            return Err(CrosschainError::InvalidRequest(format!(
                "limit {} exceeds maximum {}",
                l, MAX_PAGE_LIMIT
            )))
        }
        Some(l) => l,
    } as usize;
    let start_key = match &page.key {
        Some(k) => {
            let raw = hex::decode(k)
                .map_err(|_| CrosschainError::InvalidRequest("invalid pagination key".to_string()))?;
            Some(
                String::from_utf8(raw)
                    .map_err(|_| CrosschainError::InvalidRequest("invalid pagination key".to_string()))?,
            )
        }
        None => None,
    };
    let offset = page.offset.unwrap_or(0) as usize;

    let mut selected = Vec::new();
    let mut next_key = None;
    let mut total = 0u64;
    let mut skipped = 0usize;
    for (key, item) in items {
        if let Some(ref start) = start_key {
            if key < *start {
                continue;
            }
        }
        total += 1;
        if skipped < offset {
            skipped += 1;
            continue;
        }
        if selected.len() < limit {
            selected.push(item);
        } else if next_key.is_none() {
            next_key = Some(hex::encode(key.as_bytes()));
            if !page.count_total {
                break;
            }
        }
    }
    let total = if page.count_total && start_key.is_none() {
        Some(total)
    } else {
        None
    };
    Ok((selected, PageResponse { next_key, total }))
}

// ============================================================================
// REQUESTS
// ============================================================================

/// Filtered listing of CCTXs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryAllCctxRequest {
    #[serde(default)]
    pub pagination: Option<PageRequest>,
    #[serde(default)]
    pub status: Option<CctxStatus>,
    /// Chain targeted by the current outbound
    #[serde(default)]
    pub chain_id: Option<i64>,
}

/// Pending outbounds of one chain plus the total pending count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCctxList {
    pub cctxs: Vec<CrossChainTx>,
    pub total_pending: u64,
}

impl Keeper {
    /// Looks up one CCTX.
    pub fn query_cctx(&self, index: Option<&str>) -> Result<CrossChainTx> {
        let index = index
            .filter(|i| !i.is_empty())
            .ok_or_else(|| CrosschainError::InvalidRequest("invalid request".to_string()))?;
        self.store()
            .get_cctx(index)
            .cloned()
            .ok_or_else(|| CrosschainError::NotFound(format!("cctx {}", index)))
    }

    /// Lists CCTXs in index order, optionally filtered.
    pub fn query_all_cctx(&self, req: Option<&QueryAllCctxRequest>) -> Result<(Vec<CrossChainTx>, PageResponse)> {
        let req = req.ok_or_else(|| CrosschainError::InvalidRequest("invalid request".to_string()))?;
        let page = req.pagination.clone().unwrap_or_default();
        let items = self
            .store()
            .cctxs()
            .iter()
            .filter(|(_, c)| req.status.map_or(true, |s| c.cctx_status.status == s))
            .filter(|(_, c)| {
                req.chain_id
                    .map_or(true, |id| c.current_outbound().map(|o| o.receiver_chain_id) == Some(id))
            })
            .map(|(k, c)| (k.clone(), c.clone()));
        paginate(items, &page)
    }

    /// CCTX holding `nonce` on `chain_id` under the current TSS.
    pub fn query_cctx_by_nonce(&self, chain_id: i64, nonce: u64) -> Result<CrossChainTx> {
        let tss = self
            .store()
            .get_tss()
            .ok_or(CrosschainError::CannotFindTssKeys)?;
        self.store()
            .get_cctx_by_nonce(&tss.tss_pubkey, chain_id, nonce)
            .cloned()
            .ok_or_else(|| CrosschainError::NotFound(format!("cctx at chain {} nonce {}", chain_id, nonce)))
    }

    /// CCTXs holding nonces in `[low, high)` on `chain_id`.
    pub fn query_cctx_by_nonce_range(&self, chain_id: i64, low: u64, high: u64) -> Result<Vec<CrossChainTx>> {
        if low >= high || high - low > MAX_NONCE_RANGE {
            return Err(CrosschainError::InvalidRequest(format!(
                "invalid nonce range [{}, {})",
                low, high
            )));
        }
        let tss = self
            .store()
            .get_tss()
            .ok_or(CrosschainError::CannotFindTssKeys)?;
        Ok((low..high)
            .filter_map(|n| self.store().get_cctx_by_nonce(&tss.tss_pubkey, chain_id, n).cloned())
            .collect())
    }

    /// Indexes of CCTXs whose in-flight outbound is on `chain_id`, in nonce order.
    pub(crate) fn pending_cctx_indexes(&self, chain_id: i64, limit: usize) -> Vec<String> {
        let Some(tss) = self.store().get_tss() else {
            return Vec::new();
        };
        let Some(pending) = self.store().get_pending_nonces(&tss.tss_pubkey, chain_id) else {
            return Vec::new();
        };
        (pending.nonce_low..pending.nonce_high)
            .filter_map(|n| {
                self.store()
                    .get_cctx_by_nonce(&tss.tss_pubkey, chain_id, n)
                    .filter(|c| c.cctx_status.status.is_pending_outbound())
                    .filter(|c| {
                        c.current_outbound()
                            .map(|o| o.receiver_chain_id == chain_id && o.out_tx_tss_nonce == n)
                            .unwrap_or(false)
                    })
                    .map(|c| c.index.clone())
            })
            .take(limit)
            .collect()
    }

    /// Pending outbounds of `chain_id`, ordered by nonce.
    pub fn query_pending_cctx(&self, chain_id: i64, limit: Option<u64>) -> Result<PendingCctxList> {
        if self.store().get_chain(chain_id).is_none() {
            return Err(CrosschainError::UnsupportedChain(chain_id));
        }
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) if l > MAX_PAGE_LIMIT => {
                return Err(CrosschainError::InvalidRequest(format!(
                    "limit {} exceeds maximum {}",
                    l, MAX_PAGE_LIMIT
                )))
            }
            Some(l) => l,
        };
        let all = self.pending_cctx_indexes(chain_id, usize::MAX);
        let total_pending = all.len() as u64;
        let cctxs = all
            .iter()
            .take(limit as usize)
            .filter_map(|i| self.store().get_cctx(i).cloned())
            .collect();
        Ok(PendingCctxList { cctxs, total_pending })
    }

    pub fn query_out_tx_tracker(&self, chain_id: i64, nonce: u64) -> Result<OutTxTracker> {
        self.store()
            .get_out_tx_tracker(chain_id, nonce)
            .cloned()
            .ok_or_else(|| CrosschainError::NotFound(format!("out tx tracker {}-{}", chain_id, nonce)))
    }

    pub fn query_ballot(&self, identifier: &str) -> Result<Ballot> {
        self.store()
            .get_ballot(identifier)
            .cloned()
            .ok_or_else(|| CrosschainError::BallotNotFound(identifier.to_string()))
    }

    pub fn query_pending_nonces(&self, tss: &str, chain_id: i64) -> Result<PendingNonces> {
        self.store()
            .get_pending_nonces(tss, chain_id)
            .cloned()
            .ok_or_else(|| CrosschainError::PendingRangeNotFound {
                chain_id,
                tss: tss.to_string(),
            })
    }
}

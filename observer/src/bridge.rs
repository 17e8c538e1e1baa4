//! Ledger Bridge Module
//!
//! Client side of the crosschain node's REST API. Workers read pending
//! outbounds, trackers, flags and TSS history through it, and submit tracker
//! reports and blame votes as this node's operator.
//!
//! The bridge is a trait so that signers can be exercised against an
//! in-memory ledger in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crosschain::api::ApiResponse;
use crosschain::keeper::query::PendingCctxList;
use crosschain::msg::{Msg, MsgAddBlameVote, MsgAddToOutTxTracker};
use crosschain::types::{Blame, CrosschainFlags, CrossChainTx, Keygen, OutTxTracker, Tss};
use crosschain::{BlockSummary, MsgResponse};

// ============================================================================
// BRIDGE INTERFACE
// ============================================================================

/// Reads and writes against the replicated ledger.
#[async_trait]
pub trait CoreBridge: Send + Sync {
    /// Operator address messages are submitted as.
    fn operator(&self) -> &str;

    /// Height of the last block produced by the ledger.
    async fn get_block_height(&self) -> Result<u64>;

    /// Pending outbounds of `chain_id`, ordered by nonce.
    async fn get_pending_cctx(&self, chain_id: i64, limit: u64) -> Result<Vec<CrossChainTx>>;

    /// Tracker of (chain, nonce), `None` when no hash was reported yet.
    async fn get_out_tx_tracker(&self, chain_id: i64, nonce: u64) -> Result<Option<OutTxTracker>>;

    async fn get_tss_history(&self) -> Result<Vec<Tss>>;

    async fn get_crosschain_flags(&self) -> Result<CrosschainFlags>;

    /// Current keygen, `None` when no ceremony was ever scheduled.
    async fn get_keygen(&self) -> Result<Option<Keygen>>;

    /// Reports a broadcast hash for the outbound at (chain, nonce).
    async fn add_tx_hash_to_out_tx_tracker(
        &self,
        chain_id: i64,
        nonce: u64,
        tx_hash: &str,
    ) -> Result<MsgResponse>;

    /// Submits a blame vote for a failed signing round.
    async fn post_blame_data(&self, chain_id: i64, blame: Blame) -> Result<MsgResponse>;
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

/// Bridge over the crosschain node's HTTP API.
pub struct HttpCoreBridge {
    client: Client,
    base_url: String,
    operator: String,
}

impl HttpCoreBridge {
    /// Creates a new bridge.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Crosschain node API URL
    /// * `operator` - Operator address used as message creator
    ///
    /// # Returns
    ///
    /// * `Ok(HttpCoreBridge)` - Bridge ready to use
    /// * `Err(anyhow::Error)` - Failed to build the HTTP client
    pub fn new(base_url: &str, operator: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            operator: operator.to_string(),
        })
    }

    /// GETs `path` and unwraps the `ApiResponse` envelope.
    ///
    /// Returns `Ok(None)` for 404 so that optional records can be told apart
    /// from transport failures.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        if !body.success {
            anyhow::bail!(
                "Ledger request {} failed ({}): {}",
                path,
                status,
                body.error.unwrap_or_default()
            );
        }
        body.data
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Ledger response for {} has no data", path))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_optional(path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Ledger record {} not found", path))
    }

    /// Submits a message and waits for the block that applies it.
    async fn submit(&self, msg: Msg) -> Result<MsgResponse> {
        let url = format!("{}/tx", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&msg)
            .send()
            .await
            .context("Failed to submit message")?;

        let status = response.status();
        let body: ApiResponse<MsgResponse> = response
            .json()
            .await
            .context("Failed to parse submission response")?;
        match (body.success, body.data) {
            (true, Some(data)) => Ok(data),
            _ => anyhow::bail!(
                "Message rejected ({}): {}",
                status,
                body.error.unwrap_or_default()
            ),
        }
    }
}

#[async_trait]
impl CoreBridge for HttpCoreBridge {
    fn operator(&self) -> &str {
        &self.operator
    }

    async fn get_block_height(&self) -> Result<u64> {
        let block: BlockSummary = self.get("/block").await?;
        Ok(block.height.max(0) as u64)
    }

    async fn get_pending_cctx(&self, chain_id: i64, limit: u64) -> Result<Vec<CrossChainTx>> {
        let list: PendingCctxList = self
            .get(&format!("/pending/{}?limit={}", chain_id, limit))
            .await?;
        Ok(list.cctxs)
    }

    async fn get_out_tx_tracker(&self, chain_id: i64, nonce: u64) -> Result<Option<OutTxTracker>> {
        self.get_optional(&format!("/trackers/{}/{}", chain_id, nonce))
            .await
    }

    async fn get_tss_history(&self) -> Result<Vec<Tss>> {
        self.get("/tss/history").await
    }

    async fn get_crosschain_flags(&self) -> Result<CrosschainFlags> {
        self.get("/flags").await
    }

    async fn get_keygen(&self) -> Result<Option<Keygen>> {
        self.get_optional("/keygen").await
    }

    async fn add_tx_hash_to_out_tx_tracker(
        &self,
        chain_id: i64,
        nonce: u64,
        tx_hash: &str,
    ) -> Result<MsgResponse> {
        self.submit(Msg::AddToOutTxTracker(MsgAddToOutTxTracker {
            creator: self.operator.clone(),
            chain_id,
            nonce,
            tx_hash: tx_hash.to_string(),
            proof: None,
            blame_index: None,
            vote_index: None,
        }))
        .await
    }

    async fn post_blame_data(&self, chain_id: i64, blame: Blame) -> Result<MsgResponse> {
        self.submit(Msg::AddBlameVote(MsgAddBlameVote {
            creator: self.operator.clone(),
            chain_id,
            blame_info: blame,
        }))
        .await
    }
}

//! Bitcoin Core JSON-RPC client
//!
//! Only the two calls the UTXO signer needs: `listunspent` to refresh
//! spendable outputs and `sendrawtransaction` to broadcast.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RpcCredentials;

pub const SATS_PER_BTC: f64 = 100_000_000.0;

/// One spendable output as reported by `listunspent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in BTC
    pub amount: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: String,
    #[serde(default)]
    pub confirmations: u64,
}

impl Utxo {
    pub fn value_sats(&self) -> u64 {
        (self.amount * SATS_PER_BTC).round() as u64
    }
}

/// Chain client used by the UTXO signer.
#[async_trait]
pub trait UtxoClient: Send + Sync {
    async fn list_unspent(&self) -> Result<Vec<Utxo>>;

    /// Broadcasts a raw transaction and returns its txid.
    async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String>;
}

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct BitcoinRpcClient {
    client: Client,
    rpc_url: String,
    credentials: Option<RpcCredentials>,
}

impl BitcoinRpcClient {
    pub fn new(rpc_url: &str, credentials: Option<RpcCredentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            credentials,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let mut builder = self.client.post(&self.rpc_url).json(&request);
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response: JsonRpcResponse<T> = builder
            .send()
            .await
            .with_context(|| format!("Failed to call {}", method))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = response.error {
            return Err(anyhow::anyhow!(
                "Bitcoin RPC error {} on {}: {}",
                error.code,
                method,
                error.message
            ));
        }
        response
            .result
            .ok_or_else(|| anyhow::anyhow!("Bitcoin RPC {} returned no result", method))
    }
}

#[async_trait]
impl UtxoClient for BitcoinRpcClient {
    async fn list_unspent(&self) -> Result<Vec<Utxo>> {
        self.call("listunspent", serde_json::json!([0, 9_999_999])).await
    }

    async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String> {
        self.call("sendrawtransaction", serde_json::json!([raw_tx_hex]))
            .await
    }
}

//! TSS Signing Coordinator
//!
//! Turns outbound digests into threshold signatures. The signing protocol
//! itself is a black box behind [`KeysignServer`]: a request names the pool
//! pubkey, the block height and one or more base64 digests, and the answer is
//! either one signature per digest or a list of blamed participants.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: Every returned signature is re-verified locally by recovering
//! the public key from (digest, signature) and comparing it to the expected
//! compressed pubkey. A signature that fails this check is never used, even
//! when the signing round reported success. Batches are all-or-nothing.

mod keyshare;
mod local;

pub use keyshare::{keyshare_file_name, load_keyshares_from_directory, write_keyshare, Keyshare};
pub use local::LocalKeysigner;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crosschain::types::{Blame, Tss};

use crate::bridge::CoreBridge;
use crate::hash::{double_sha256, hash160};
use crate::metrics::Metrics;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TssError {
    #[error("signature verification failed: {0}")]
    SignatureVerificationFailed(String),
    #[error("signature count mismatch: expected {expected}, got {got}")]
    SignatureCountMismatch { expected: usize, got: usize },
    #[error("keysign failed: {0}")]
    KeysignFailed(String),
    #[error("keysign round timed out after {0} ms")]
    Timeout(u64),
    #[error("pubkey {0} not found in keyshares")]
    KeyNotFound(String),
    #[error("invalid pubkey {0}")]
    InvalidPubkey(String),
    #[error("failed to post blame data: {0}")]
    BlamePostFailed(String),
}

impl TssError {
    /// True for failures that indicate a bug or manipulation rather than an unavailable round.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TssError::SignatureVerificationFailed(_) | TssError::SignatureCountMismatch { .. }
        )
    }
}

// ============================================================================
// KEYSIGN CAPABILITY
// ============================================================================

/// One signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignRequest {
    /// Pubkey (hex, compressed) of the key to sign with
    pub pool_pubkey: String,
    /// Base64 encoded 32-byte digests
    pub messages: Vec<String>,
    /// Ledger height anchoring the round
    pub block_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeysignStatus {
    Success,
    Fail,
}

/// Signature over one message, every field base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignSignature {
    /// The digest this signature belongs to
    pub msg: String,
    pub r: String,
    pub s: String,
    pub recovery_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysignResponse {
    pub status: KeysignStatus,
    #[serde(default)]
    pub signatures: Vec<KeysignSignature>,
    /// Blamed participants when `status` is `Fail`
    #[serde(default)]
    pub blame: Blame,
}

/// Threshold signing capability.
#[async_trait]
pub trait KeysignServer: Send + Sync {
    async fn keysign(&self, request: KeysignRequest) -> Result<KeysignResponse, TssError>;
}

// ============================================================================
// KEYS
// ============================================================================

/// A TSS pubkey in the forms the signers need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TssKey {
    /// Hex of the compressed SEC1 encoding
    pub pubkey: String,
    pub compressed: Vec<u8>,
    /// keccak256(uncompressed[1..])[12..], 0x-prefixed
    pub evm_address: String,
}

impl TssKey {
    /// Parses a hex compressed secp256k1 pubkey.
    pub fn new(pubkey: &str) -> Result<Self, TssError> {
        let bytes = hex::decode(pubkey.strip_prefix("0x").unwrap_or(pubkey))
            .map_err(|_| TssError::InvalidPubkey(pubkey.to_string()))?;
        let verifying_key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|_| TssError::InvalidPubkey(pubkey.to_string()))?;

        let compressed = verifying_key.to_encoded_point(true).as_bytes().to_vec();
        let uncompressed = verifying_key.to_encoded_point(false);
        let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
        let evm_address = format!("0x{}", hex::encode(&hash[12..]));

        Ok(Self {
            pubkey: hex::encode(&compressed),
            compressed,
            evm_address,
        })
    }

    /// P2WPKH witness program of this key.
    pub fn witness_program(&self) -> [u8; 20] {
        hash160(&self.compressed)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Ledger index of a blame record: `{chain}-{nonce}-{digest}-{height}`.
pub fn blame_index(chain_id: i64, nonce: u64, digest_hex: &str, height: u64) -> String {
    format!("{}-{}-{}-{}", chain_id, nonce, digest_hex, height)
}

/// Digest identifying a batch: double SHA-256 over the concatenated base64 digests.
pub fn combine_digests(messages: &[String]) -> [u8; 32] {
    double_sha256(messages.concat().as_bytes())
}

pub fn was_node_part_of_tss(node_pubkey: &str, participants: &[String]) -> bool {
    participants.iter().any(|p| p == node_pubkey)
}

fn decode_field(field: &str, value: &str, out: &mut [u8]) -> Result<(), TssError> {
    let bytes = general_purpose::STANDARD.decode(value).map_err(|e| {
        TssError::SignatureVerificationFailed(format!("decoding signature {}: {}", field, e))
    })?;
    if bytes.len() != out.len() {
        return Err(TssError::SignatureVerificationFailed(format!(
            "signature {} has {} bytes, expected {}",
            field,
            bytes.len(),
            out.len()
        )));
    }
    out.copy_from_slice(&bytes);
    Ok(())
}

/// Decodes a keysign signature into `r || s || v`.
pub fn decode_signature(signature: &KeysignSignature) -> Result<[u8; 65], TssError> {
    let mut sig = [0u8; 65];
    decode_field("R", &signature.r, &mut sig[..32])?;
    decode_field("S", &signature.s, &mut sig[32..64])?;
    decode_field("RecoveryID", &signature.recovery_id, &mut sig[64..])?;
    Ok(sig)
}

/// Recovers the signer of `digest` and compares it to `expected` (compressed SEC1).
pub fn verify_signature(expected: &[u8], digest: &[u8; 32], sig: &[u8; 65]) -> Result<(), TssError> {
    let signature = Signature::from_slice(&sig[..64])
        .map_err(|e| TssError::SignatureVerificationFailed(format!("malformed signature: {}", e)))?;
    let recovery_id = RecoveryId::try_from(sig[64])
        .map_err(|e| TssError::SignatureVerificationFailed(format!("bad recovery id: {}", e)))?;
    let recovered = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|e| TssError::SignatureVerificationFailed(format!("recovery failed: {}", e)))?;

    let recovered = recovered.to_encoded_point(true);
    if recovered.as_bytes() != expected {
        return Err(TssError::SignatureVerificationFailed(format!(
            "recovered pubkey {} does not match {}",
            hex::encode(recovered.as_bytes()),
            hex::encode(expected)
        )));
    }
    Ok(())
}

// ============================================================================
// SIGNER
// ============================================================================

/// Coordinates threshold signing for every chain worker.
pub struct TssSigner {
    server: Arc<dyn KeysignServer>,
    bridge: Arc<dyn CoreBridge>,
    metrics: Arc<Metrics>,
    /// Keys this node holds a share of, by hex pubkey
    keys: BTreeMap<String, TssKey>,
    current: TssKey,
    round_timeout: Duration,
}

impl TssSigner {
    /// Creates a signer for `current_pubkey`.
    ///
    /// # Arguments
    ///
    /// * `server` - Keysign capability
    /// * `bridge` - Ledger used to post blame
    /// * `metrics` - Blame and failure counters
    /// * `current_pubkey` - Hex compressed pubkey used when no override is given
    /// * `round_timeout` - Upper bound on one signing round
    pub fn new(
        server: Arc<dyn KeysignServer>,
        bridge: Arc<dyn CoreBridge>,
        metrics: Arc<Metrics>,
        current_pubkey: &str,
        round_timeout: Duration,
    ) -> Result<Self, TssError> {
        Ok(Self {
            server,
            bridge,
            metrics,
            keys: BTreeMap::new(),
            current: TssKey::new(current_pubkey)?,
            round_timeout,
        })
    }

    pub fn current(&self) -> &TssKey {
        &self.current
    }

    pub fn keys(&self) -> &BTreeMap<String, TssKey> {
        &self.keys
    }

    /// Adds a pubkey this node holds a share of.
    pub fn insert_pubkey(&mut self, pubkey: &str) -> Result<(), TssError> {
        let key = TssKey::new(pubkey)?;
        info!("Registering TSS pubkey {} (evm {})", key.pubkey, key.evm_address);
        self.keys.insert(key.pubkey.clone(), key);
        Ok(())
    }

    /// Loads every keyshare found in `dir`.
    ///
    /// Files with an unparsable pubkey are logged and skipped.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of keys registered
    /// * `Err(std::io::Error)` - Directory could not be read
    pub fn load_keyshares(&mut self, dir: &std::path::Path) -> std::io::Result<usize> {
        let pubkeys = load_keyshares_from_directory(dir)?;
        let mut loaded = 0;
        for pubkey in pubkeys {
            match self.insert_pubkey(&pubkey) {
                Ok(()) => loaded += 1,
                Err(e) => error!("Skipping keyshare {}: {}", pubkey, e),
            }
        }
        if loaded == 0 {
            info!("TSS keyshare file NOT found in {}", dir.display());
        }
        Ok(loaded)
    }

    /// Checks that a share is held for every historical TSS this node took part in.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every such key has a share
    /// * `Err(TssError::KeyNotFound)` - The first key without a share
    pub fn verify_keyshares_for_pubkeys(&self, history: &[Tss], node_pubkey: &str) -> Result<(), TssError> {
        for tss in history {
            if was_node_part_of_tss(node_pubkey, &tss.tss_participant_list)
                && !self.keys.contains_key(&tss.tss_pubkey)
            {
                return Err(TssError::KeyNotFound(tss.tss_pubkey.clone()));
            }
        }
        Ok(())
    }

    /// Runs one round under the configured timeout.
    async fn keysign(&self, request: KeysignRequest) -> Result<KeysignResponse, TssError> {
        match tokio::time::timeout(self.round_timeout, self.server.keysign(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!("keysign fail: {}", e);
                self.metrics.inc_keysign_failure("error");
                Err(e)
            }
            Err(_) => {
                let ms = self.round_timeout.as_millis() as u64;
                warn!("keysign round timed out after {} ms", ms);
                self.metrics.inc_keysign_failure("timeout");
                Err(TssError::Timeout(ms))
            }
        }
    }

    /// Posts the blame of a failed round and counts it per blamed node.
    async fn report_blame(&self, chain_id: i64, index: String, mut blame: Blame) -> Result<(), TssError> {
        warn!(
            "keysign status FAIL posting blame to ledger, blaming {} node(s)",
            blame.nodes.len()
        );
        self.metrics.inc_keysign_failure("blame");
        blame.index = index;
        let nodes: Vec<String> = blame.nodes.iter().map(|n| n.pubkey.clone()).collect();

        match self.bridge.post_blame_data(chain_id, blame).await {
            Ok(response) => {
                for node in &nodes {
                    self.metrics.inc_blame(node);
                }
                info!(
                    "keysign posted blame data on ballot {}",
                    response.ballot_identifier.unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                error!("error sending blame data to ledger: {:#}", e);
                Err(TssError::BlamePostFailed(e.to_string()))
            }
        }
    }

    /// Signs one digest.
    ///
    /// # Arguments
    ///
    /// * `digest` - 32-byte hash to sign
    /// * `height` - Ledger height anchoring the round
    /// * `nonce` - Outbound nonce, used in the blame index
    /// * `chain_id` - Destination chain, used in the blame index
    /// * `pubkey_override` - Sign with this key instead of the current one
    ///
    /// # Returns
    ///
    /// * `Ok([u8; 65])` - `r || s || v`, verified against the signing pubkey
    /// * `Err(TssError)` - Round failed, timed out or returned a bad signature
    pub async fn sign(
        &self,
        digest: &[u8; 32],
        height: u64,
        nonce: u64,
        chain_id: i64,
        pubkey_override: Option<&str>,
    ) -> Result<[u8; 65], TssError> {
        let key = match pubkey_override {
            Some(pubkey) => TssKey::new(pubkey)?,
            None => self.current.clone(),
        };
        debug!("hash of digest is {}", hex::encode(digest));

        let request = KeysignRequest {
            pool_pubkey: key.pubkey.clone(),
            messages: vec![general_purpose::STANDARD.encode(digest)],
            block_height: height,
        };
        let response = self.keysign(request).await?;

        if response.status == KeysignStatus::Fail {
            let index = blame_index(chain_id, nonce, &hex::encode(digest), height);
            self.report_blame(chain_id, index, response.blame).await?;
            return Err(TssError::KeysignFailed(format!(
                "round failed for chain {} nonce {}",
                chain_id, nonce
            )));
        }

        let signature = response
            .signatures
            .first()
            .ok_or_else(|| TssError::KeysignFailed("signature has length 0".to_string()))?;
        let sig = decode_signature(signature)?;
        if let Err(e) = verify_signature(&key.compressed, digest, &sig) {
            error!(
                "signature verification failure: chain {} nonce {} digest {}: {}",
                chain_id,
                nonce,
                hex::encode(digest),
                e
            );
            return Err(e);
        }
        Ok(sig)
    }

    /// Signs a batch of digests with the current key in one round.
    ///
    /// Signatures are matched to digests by message; every digest must get
    /// exactly one verified signature or the whole batch fails.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<[u8; 65]>)` - One signature per digest, in input order
    /// * `Err(TssError::SignatureCountMismatch)` - Round returned a different count
    /// * `Err(TssError::SignatureVerificationFailed)` - A digest has no valid signature
    pub async fn sign_batch(
        &self,
        digests: &[[u8; 32]],
        height: u64,
        nonce: u64,
        chain_id: i64,
    ) -> Result<Vec<[u8; 65]>, TssError> {
        let messages: Vec<String> = digests
            .iter()
            .map(|d| general_purpose::STANDARD.encode(d))
            .collect();
        let request = KeysignRequest {
            pool_pubkey: self.current.pubkey.clone(),
            messages: messages.clone(),
            block_height: height,
        };
        let response = self.keysign(request).await?;

        if response.status == KeysignStatus::Fail {
            let digest = combine_digests(&messages);
            let index = blame_index(chain_id, nonce, &hex::encode(digest), height);
            self.report_blame(chain_id, index, response.blame).await?;
            return Err(TssError::KeysignFailed(format!(
                "batch round failed for chain {} nonce {}",
                chain_id, nonce
            )));
        }

        if response.signatures.len() != digests.len() {
            error!(
                "signature count ({}) not equal to digest count ({}): chain {} nonce {}",
                response.signatures.len(),
                digests.len(),
                chain_id,
                nonce
            );
            return Err(TssError::SignatureCountMismatch {
                expected: digests.len(),
                got: response.signatures.len(),
            });
        }

        let mut signatures = Vec::with_capacity(digests.len());
        for (j, (digest, message)) in digests.iter().zip(&messages).enumerate() {
            let signature = response
                .signatures
                .iter()
                .find(|s| &s.msg == message)
                .ok_or_else(|| {
                    error!("signature not found for digest {}: chain {} nonce {}", j, chain_id, nonce);
                    TssError::SignatureVerificationFailed(format!("no signature for digest {}", j))
                })?;
            let sig = decode_signature(signature)?;
            if let Err(e) = verify_signature(&self.current.compressed, digest, &sig) {
                error!(
                    "{}-th signature verification failure: chain {} nonce {}: {}",
                    j, chain_id, nonce, e
                );
                return Err(e);
            }
            signatures.push(sig);
        }
        Ok(signatures)
    }
}

//! Single-party keysign backend for development and tests.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::Rng;

use super::{KeysignRequest, KeysignResponse, KeysignServer, KeysignSignature, KeysignStatus, TssError};

/// Signs every request with one local secp256k1 key.
pub struct LocalKeysigner {
    signing_key: SigningKey,
    pubkey: String,
}

impl LocalKeysigner {
    /// Creates a signer from a hex encoded 32-byte secret.
    pub fn from_hex(secret: &str) -> Result<Self, TssError> {
        let bytes = hex::decode(secret.trim().strip_prefix("0x").unwrap_or(secret.trim()))
            .map_err(|e| TssError::KeysignFailed(format!("invalid local key hex: {}", e)))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| TssError::KeysignFailed(format!("invalid local key: {}", e)))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Creates a signer with a fresh random key.
    pub fn generate() -> Result<Self, TssError> {
        let mut rng = rand::rngs::OsRng;
        let mut secret = [0u8; 32];
        rng.fill(&mut secret);
        let signing_key = SigningKey::from_slice(&secret)
            .map_err(|e| TssError::KeysignFailed(format!("failed to create signing key: {}", e)))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let pubkey = hex::encode(signing_key.verifying_key().to_encoded_point(true).as_bytes());
        Self { signing_key, pubkey }
    }

    /// Hex of the compressed pubkey.
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    /// Hex of the secret key. Only for writing dev keyshares.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    fn sign_message(&self, message: &str) -> Result<KeysignSignature, TssError> {
        let digest = general_purpose::STANDARD
            .decode(message)
            .map_err(|e| TssError::KeysignFailed(format!("message is not base64: {}", e)))?;
        if digest.len() != 32 {
            return Err(TssError::KeysignFailed(format!(
                "message must be a 32-byte digest, got {} bytes",
                digest.len()
            )));
        }

        let signature: Signature = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| TssError::KeysignFailed(format!("signing failed: {}", e)))?;

        // The recovery id selects which of the candidate keys is ours
        let verifying_key = self.signing_key.verifying_key();
        let recovery_id = (0u8..4)
            .filter_map(|v| RecoveryId::try_from(v).ok())
            .find(|id| {
                VerifyingKey::recover_from_prehash(&digest, &signature, *id)
                    .map(|k| &k == verifying_key)
                    .unwrap_or(false)
            })
            .ok_or_else(|| TssError::KeysignFailed("no recovery id matches".to_string()))?;

        let (r, s) = signature.split_bytes();
        Ok(KeysignSignature {
            msg: message.to_string(),
            r: general_purpose::STANDARD.encode(r),
            s: general_purpose::STANDARD.encode(s),
            recovery_id: general_purpose::STANDARD.encode([recovery_id.to_byte()]),
        })
    }
}

#[async_trait]
impl KeysignServer for LocalKeysigner {
    async fn keysign(&self, request: KeysignRequest) -> Result<KeysignResponse, TssError> {
        if request.pool_pubkey != self.pubkey {
            return Err(TssError::KeyNotFound(request.pool_pubkey));
        }
        let signatures = request
            .messages
            .iter()
            .map(|m| self.sign_message(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KeysignResponse {
            status: KeysignStatus::Success,
            signatures,
            blame: Default::default(),
        })
    }
}

//! Inbound Proof Verifier
//!
//! Checks that a claimed inbound transaction is included in a block before
//! the observer votes on it. Inclusion is proven with a Bitcoin-style Merkle
//! path against the root committed in the 80-byte block header.
//!
//! The replicated ledger does not run this check; it trusts the quorum.

mod merkle;

pub use merkle::{compute_merkle_root, MerkleTree};

use thiserror::Error;

use crate::hash::double_sha256;

/// Size of a serialized block header.
pub const HEADER_SIZE: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("block header must be {HEADER_SIZE} bytes, got {0}")]
    InvalidHeaderLength(usize),
    #[error("block has {have} confirmations, {need} required")]
    NotEnoughConfirmations { have: u64, need: u64 },
    #[error("transaction index {index} out of range for a path of depth {depth}")]
    IndexOutOfRange { index: u32, depth: usize },
    #[error("merkle root mismatch: computed {computed}, header has {expected}")]
    MerkleRootMismatch { computed: String, expected: String },
    #[error("empty merkle tree")]
    EmptyTree,
    #[error("right child at level {level} duplicates its sibling")]
    DuplicateNode { level: usize },
}

// ============================================================================
// BLOCK HEADER
// ============================================================================

/// Parsed 80-byte block header. Hashes are kept in internal byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_hash(bytes: &[u8], at: usize) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&bytes[at..at + 32]);
    buf
}

impl BlockHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProofError> {
        if bytes.len() != HEADER_SIZE {
            return Err(ProofError::InvalidHeaderLength(bytes.len()));
        }
        Ok(Self {
            version: read_u32(bytes, 0) as i32,
            prev_block: read_hash(bytes, 4),
            merkle_root: read_hash(bytes, 36),
            timestamp: read_u32(bytes, 68),
            bits: read_u32(bytes, 72),
            nonce: read_u32(bytes, 76),
        })
    }

    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Double SHA-256 of the serialized header.
    pub fn block_hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize())
    }
}

// ============================================================================
// PROOF
// ============================================================================

/// Inclusion proof of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Raw transaction bytes (non-witness serialization)
    pub tx_bytes: Vec<u8>,
    /// Sibling hashes from the leaf level up
    pub path: Vec<[u8; 32]>,
    /// Position of the transaction in the block
    pub index: u32,
}

/// Verifies `proof` against `header`.
///
/// # Arguments
///
/// * `proof` - Transaction, Merkle path and index
/// * `header` - Header of the block claimed to contain the transaction
/// * `confirmations` - Current confirmations of that block
/// * `min_confirmations` - Confirmations required before trusting it
///
/// # Returns
///
/// * `Ok(Vec<u8>)` - The transaction bytes, only when the root matches
/// * `Err(ProofError)` - Too few confirmations, index out of range or root mismatch
pub fn verify(
    proof: &MerkleProof,
    header: &BlockHeader,
    confirmations: u64,
    min_confirmations: u64,
) -> Result<Vec<u8>, ProofError> {
    if confirmations < min_confirmations {
        return Err(ProofError::NotEnoughConfirmations {
            have: confirmations,
            need: min_confirmations,
        });
    }

    let leaf = double_sha256(&proof.tx_bytes);
    let computed = compute_merkle_root(leaf, &proof.path, proof.index)?;
    if computed != header.merkle_root {
        return Err(ProofError::MerkleRootMismatch {
            computed: hex::encode(computed),
            expected: hex::encode(header.merkle_root),
        });
    }
    Ok(proof.tx_bytes.clone())
}

//! Bitcoin-style hash helpers shared by signing, proofs and transactions.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 applied twice.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// RIPEMD-160 of SHA-256; the witness program of a P2WPKH output.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

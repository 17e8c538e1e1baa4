//! Bitcoin-style Merkle tree
//!
//! Parents are `dsha256(left || right)`; a level with an odd number of nodes
//! duplicates its last node.

use super::ProofError;
use crate::hash::double_sha256;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    double_sha256(&buf)
}

/// Folds `leaf` up `path`; bit `i` of `index` says whether the level-`i` node is a right child.
///
/// Bits of `index` above the path depth must be zero so that every bit of
/// the index is bound to the path. A right child equal to its sibling only
/// arises from a duplicated odd node, so that position does not exist.
pub fn compute_merkle_root(leaf: [u8; 32], path: &[[u8; 32]], index: u32) -> Result<[u8; 32], ProofError> {
    let depth = path.len();
    if depth < 32 && (index >> depth) != 0 {
        return Err(ProofError::IndexOutOfRange { index, depth });
    }

    let mut current = leaf;
    for (level, sibling) in path.iter().enumerate() {
        current = if (index >> level) & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            if *sibling == current {
                return Err(ProofError::DuplicateNode { level });
            }
            hash_pair(sibling, &current)
        };
    }
    Ok(current)
}

/// Full tree kept level by level, leaves first.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<[u8; 32]>) -> Result<Self, ProofError> {
        if leaves.is_empty() {
            return Err(ProofError::EmptyTree);
        }
        let mut levels = vec![leaves];
        while let Some(level) = levels.last() {
            if level.len() == 1 {
                break;
            }
            let next: Vec<[u8; 32]> = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }
        Ok(Self { levels })
    }

    /// Builds the tree over the txids of raw transactions.
    pub fn from_transactions<T: AsRef<[u8]>>(txs: &[T]) -> Result<Self, ProofError> {
        Self::new(txs.iter().map(|tx| double_sha256(tx.as_ref())).collect())
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Sibling path of leaf `index`.
    pub fn proof(&self, index: u32) -> Result<Vec<[u8; 32]>, ProofError> {
        let mut position = index as usize;
        if position >= self.leaf_count() {
            return Err(ProofError::IndexOutOfRange {
                index,
                depth: self.levels.len() - 1,
            });
        }
        let mut path = Vec::with_capacity(self.levels.len() - 1);
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            // odd last node pairs with itself
            path.push(*level.get(sibling).unwrap_or(&level[position]));
            position /= 2;
        }
        Ok(path)
    }
}

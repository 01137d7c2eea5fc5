//! Merkle tree for multi-fill hashlocks
//!
//! Leaves are sorted and stored from the end of a flat array of `2n - 1` nodes;
//! every inner node is keccak256 of its two children in ascending order. This is
//! the layout relayers and escrow factories verify partial-fill proofs against.

use crate::chains::abi::keccak256;

/// Leaf for fill slot `index`: keccak256(uint64_be(index) ‖ secret_hash).
pub fn merkle_leaf(index: u64, secret_hash: &[u8; 32]) -> [u8; 32] {
    let mut packed = Vec::with_capacity(8 + 32);
    packed.extend_from_slice(&index.to_be_bytes());
    packed.extend_from_slice(secret_hash);
    keccak256(&packed)
}

fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut packed = [0u8; 64];
    packed[..32].copy_from_slice(lo);
    packed[32..].copy_from_slice(hi);
    keccak256(&packed)
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<[u8; 32]>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Builds the tree over `leaves` (sorted internally). Returns `None` for no leaves.
    pub fn from_leaves(leaves: &[[u8; 32]]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        let mut sorted = leaves.to_vec();
        sorted.sort();

        let len = 2 * sorted.len() - 1;
        let mut nodes = vec![[0u8; 32]; len];
        for (i, leaf) in sorted.iter().enumerate() {
            nodes[len - 1 - i] = *leaf;
        }
        for i in (0..len - sorted.len()).rev() {
            nodes[i] = hash_pair(&nodes[2 * i + 1], &nodes[2 * i + 2]);
        }

        Some(Self {
            nodes,
            leaf_count: sorted.len(),
        })
    }

    pub fn root(&self) -> [u8; 32] {
        self.nodes[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }
}

//! Incremental keccak Merkle tree.

use alloy_primitives::{B256, keccak256};

/// Levels of the anchor tree.
pub const TREE_DEPTH: usize = 30;

/// Number of recent roots an anchor accepts, for itself and per neighbor.
pub const ROOT_HISTORY_SIZE: usize = 30;

fn hash_left_right(left: B256, right: B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Append-only accumulator.
///
/// Only the rightmost filled node of every level is kept to compute the next
/// root; all leaves and the root after every insertion are retained as well
/// so membership can be checked against any past root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    depth: usize,
    zeros: Vec<B256>,
    filled_subtrees: Vec<B256>,
    leaves: Vec<B256>,
    /// `roots_by_size[n]` is the root after `n` leaves.
    roots_by_size: Vec<B256>,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new(TREE_DEPTH)
    }
}

impl MerkleTree {
    pub fn new(depth: usize) -> Self {
        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(keccak256(b"localnet.anchor.zero"));
        for level in 0..depth {
            zeros.push(hash_left_right(zeros[level], zeros[level]));
        }
        let empty_root = zeros[depth];

        Self {
            depth,
            filled_subtrees: zeros[..depth].to_vec(),
            zeros,
            leaves: Vec::new(),
            roots_by_size: vec![empty_root],
        }
    }

    /// Appends `leaf` and returns its index, or `None` once the tree is full.
    pub fn insert(&mut self, leaf: B256) -> Option<u32> {
        let index = self.leaves.len();
        if index as u128 >= 1u128 << self.depth {
            return None;
        }

        let mut current = leaf;
        let mut position = index;
        for level in 0..self.depth {
            let (left, right) = if position % 2 == 0 {
                self.filled_subtrees[level] = current;
                (current, self.zeros[level])
            } else {
                (self.filled_subtrees[level], current)
            };
            current = hash_left_right(left, right);
            position /= 2;
        }

        self.leaves.push(leaf);
        self.roots_by_size.push(current);

        u32::try_from(index).ok()
    }

    pub fn root(&self) -> B256 {
        self.roots_by_size[self.leaves.len()]
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaf(&self, index: u32) -> Option<B256> {
        self.leaves.get(index as usize).copied()
    }

    /// Whether `leaf` sits at `index` in the tree that produced `root`.
    pub fn contains_under_root(&self, index: u32, leaf: B256, root: B256) -> bool {
        self.leaf(index) == Some(leaf)
            && self
                .roots_by_size
                .iter()
                .skip(index as usize + 1)
                .any(|r| *r == root)
    }
}

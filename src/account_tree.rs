//! Sparse account Merkle tree.
//!
//! The tree is keyed by account index, fixed at [`ACCOUNT_TREE_DEPTH`]
//! levels, and combines nodes with the shared poseidon sponge. Empty leaves
//! hash to the canonical zero-account constant. Persistence, distribution
//! and concurrency belong to an external store; the trait below is the
//! surface the witness assembler needs — proof retrieval, deterministic
//! root-after-set, and monotonic versioning with commit/rollback. The
//! in-memory implementation snapshots per committed version.

use std::collections::HashMap;

use crate::bn254::Fr;
use crate::constants::{ACCOUNT_TREE_DEPTH, EMPTY_ACCOUNT_LEAF};
use crate::error::{Error, Result};
use crate::poseidon::hash2;

pub trait AccountTree {
    fn root(&self) -> Fr;
    /// Authentication path for an index, leaf-adjacent sibling first.
    fn get_proof(&self, index: u32) -> Result<[Fr; ACCOUNT_TREE_DEPTH]>;
    fn set(&mut self, index: u32, leaf: Fr) -> Result<()>;
    /// Number of committed versions; the empty tree is version 0.
    fn latest_version(&self) -> u64;
    /// Durability barrier: snapshot the working state as the next version.
    fn commit(&mut self) -> Result<u64>;
    /// Restore the working state to an earlier committed version.
    fn rollback(&mut self, version: u64) -> Result<()>;
}

type NodeKey = (usize, u64);

/// In-memory versioned tree used by tests, recovery tooling and small
/// deployments.
#[derive(Clone, Debug)]
pub struct MemAccountTree {
    nodes: HashMap<NodeKey, Fr>,
    snapshots: Vec<HashMap<NodeKey, Fr>>,
    /// Hash of an all-empty subtree, per level.
    defaults: Vec<Fr>,
}

impl MemAccountTree {
    pub fn new() -> Self {
        let mut defaults = Vec::with_capacity(ACCOUNT_TREE_DEPTH + 1);
        defaults.push(*EMPTY_ACCOUNT_LEAF);
        for level in 0..ACCOUNT_TREE_DEPTH {
            let below = defaults[level];
            defaults.push(hash2(below, below));
        }
        MemAccountTree {
            nodes: HashMap::new(),
            snapshots: Vec::new(),
            defaults,
        }
    }

    /// Root of the empty tree; the genesis endpoint of chain verification.
    pub fn empty_root() -> Fr {
        MemAccountTree::new().root()
    }

    fn node(&self, level: usize, index: u64) -> Fr {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.defaults[level])
    }

    fn check_index(index: u32) -> Result<u64> {
        let index = index as u64;
        if index >> ACCOUNT_TREE_DEPTH != 0 {
            return Err(Error::Tree(format!(
                "index {index} outside depth-{ACCOUNT_TREE_DEPTH} key space"
            )));
        }
        Ok(index)
    }
}

impl Default for MemAccountTree {
    fn default() -> Self {
        MemAccountTree::new()
    }
}

impl AccountTree for MemAccountTree {
    fn root(&self) -> Fr {
        self.node(ACCOUNT_TREE_DEPTH, 0)
    }

    fn get_proof(&self, index: u32) -> Result<[Fr; ACCOUNT_TREE_DEPTH]> {
        let index = Self::check_index(index)?;
        Ok(array_init::array_init(|level| {
            self.node(level, (index >> level) ^ 1)
        }))
    }

    fn set(&mut self, index: u32, leaf: Fr) -> Result<()> {
        let index = Self::check_index(index)?;
        self.nodes.insert((0, index), leaf);
        for level in 0..ACCOUNT_TREE_DEPTH {
            let parent_index = index >> (level + 1);
            let left = self.node(level, parent_index << 1);
            let right = self.node(level, (parent_index << 1) | 1);
            self.nodes.insert((level + 1, parent_index), hash2(left, right));
        }
        Ok(())
    }

    fn latest_version(&self) -> u64 {
        self.snapshots.len() as u64
    }

    fn commit(&mut self) -> Result<u64> {
        self.snapshots.push(self.nodes.clone());
        Ok(self.snapshots.len() as u64)
    }

    fn rollback(&mut self, version: u64) -> Result<()> {
        if version > self.snapshots.len() as u64 {
            return Err(Error::Tree(format!(
                "cannot roll back to version {version}, latest is {}",
                self.snapshots.len()
            )));
        }
        self.snapshots.truncate(version as usize);
        self.nodes = self.snapshots.last().cloned().unwrap_or_default();
        Ok(())
    }
}

/// Native Merkle proof verification, bit-compatible with the in-circuit
/// walk: bit `i` of the index picks the side of the `i`-th sibling.
pub fn verify_merkle_proof(
    root: Fr,
    account_index: u32,
    proof: &[Fr; ACCOUNT_TREE_DEPTH],
    mut node: Fr,
) -> bool {
    for (level, sibling) in proof.iter().enumerate() {
        node = if (account_index >> level) & 1 == 0 {
            hash2(node, *sibling)
        } else {
            hash2(*sibling, node)
        };
    }
    node == root
}

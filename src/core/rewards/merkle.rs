// Copyright (c) 2026 Stride
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic sorted-pair Merkle tree over reward leaves.
//!
//! leaf = keccak256( address || uint256(amount) )
//! node = keccak256( min(a, b) || max(a, b) )
//!
//! Leaf hashes are sorted ascending before the first level is paired, so the
//! root depends only on the leaf set. A level with an odd node count promotes
//! its last node unchanged; that level contributes no proof element for it.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::amount::TokenAmount;
use crate::core::rewards::leaf::{hash_leaf, keccak256};
use crate::core::types::{Address, RewardLeaf, H256};

/// Tree construction / lookup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("no eligible leaves")]
    Empty,
    #[error("leaf not found in tree")]
    LeafNotFound,
    #[error("duplicate leaf for address {0}")]
    DuplicateAddress(Address),
}

/// Combine two sibling digests under the sorted-pair rule.
pub fn hash_pair(a: &H256, b: &H256) -> H256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_bytes());
    buf[32..].copy_from_slice(hi.as_bytes());
    keccak256(&buf)
}

/// Recompute the root implied by `leaf` and `proof`.
pub fn process_proof(leaf: H256, proof: &[H256]) -> H256 {
    proof.iter().fold(leaf, |cur, sib| hash_pair(&cur, sib))
}

/// Verify proof against root (same check as the on-chain verifier).
pub fn verify_proof(root: H256, leaf: H256, proof: &[H256]) -> bool {
    process_proof(leaf, proof) == root
}

fn next_level(level: &[H256]) -> Vec<H256> {
    let mut next: Vec<H256> = Vec::with_capacity((level.len() + 1) / 2);
    for pair in level.chunks(2) {
        match pair {
            [a, b] => next.push(hash_pair(a, b)),
            _ => next.push(pair[0]),
        }
    }
    next
}

/// Materialized reward tree for one leaf snapshot.
#[derive(Clone, Debug)]
pub struct RewardTree {
    /// `levels[0]` holds the sorted leaf hashes; the last level holds the root.
    levels: Vec<Vec<H256>>,
    amounts: BTreeMap<Address, TokenAmount>,
}

impl RewardTree {
    /// Build from leaves in any order.
    pub fn build(leaves: &[RewardLeaf]) -> Result<Self, TreeError> {
        if leaves.is_empty() {
            return Err(TreeError::Empty);
        }

        let mut amounts = BTreeMap::new();
        for leaf in leaves {
            if amounts.insert(leaf.address, leaf.amount).is_some() {
                return Err(TreeError::DuplicateAddress(leaf.address));
            }
        }

        let mut level: Vec<H256> = leaves.iter().map(hash_leaf).collect();
        level.sort_unstable();

        let mut levels = Vec::new();
        while level.len() > 1 {
            let next = next_level(&level);
            levels.push(std::mem::replace(&mut level, next));
        }
        levels.push(level);

        Ok(Self { levels, amounts })
    }

    /// Tree root.
    pub fn root(&self) -> H256 {
        // `build` guarantees at least one level with exactly one node at the top.
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(H256::ZERO)
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Always false for a built tree.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted leaf hashes.
    pub fn leaf_hashes(&self) -> &[H256] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Leaf recorded for `address`, if any.
    pub fn leaf_for(&self, address: &Address) -> Option<RewardLeaf> {
        self.amounts
            .get(address)
            .map(|amount| RewardLeaf::new(*address, *amount))
    }

    /// Sibling path from `leaf` to the root, root-ward order.
    pub fn prove(&self, leaf: &RewardLeaf) -> Result<Vec<H256>, TreeError> {
        self.prove_hash(hash_leaf(leaf))
    }

    /// Sibling path for an already-hashed leaf.
    pub fn prove_hash(&self, leaf: H256) -> Result<Vec<H256>, TreeError> {
        let mut idx = self
            .leaf_hashes()
            .binary_search(&leaf)
            .map_err(|_| TreeError::LeafNotFound)?;

        let mut proof = Vec::with_capacity(self.levels.len().saturating_sub(1));
        for level in &self.levels[..self.levels.len() - 1] {
            let sib = idx ^ 1;
            if sib < level.len() {
                proof.push(level[sib]);
            }
            idx /= 2;
        }
        Ok(proof)
    }
}

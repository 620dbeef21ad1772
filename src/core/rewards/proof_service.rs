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

//! Claim proof queries.
//!
//! In `Snapshot` mode (default) proofs come from the highest published epoch
//! snapshot, so they always match a root that was confirmed on chain. `Live`
//! mode rebuilds from the current ledger on every query and reports a fixed
//! epoch; its proofs only verify while the ledger has not moved since that
//! epoch was settled.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::core::amount::TokenAmount;
use crate::core::rewards::merkle::{RewardTree, TreeError};
use crate::core::state::ledger::{LedgerError, LedgerSource};
use crate::core::state::snapshots::{EpochSnapshot, SnapshotStatus, SnapshotStore, StoreError};
use crate::core::types::{Address, Epoch, H256};

/// Proof query errors.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("address {0} has no eligible reward")]
    NotEligible(Address),
    #[error("no epoch has been published yet")]
    NoPublishedEpoch,
    #[error("epoch {0} is not published")]
    EpochNotPublished(Epoch),
    #[error("epoch {epoch} snapshot root {stored} does not match rebuilt root {rebuilt}")]
    SnapshotMismatch {
        /// Epoch of the snapshot.
        epoch: Epoch,
        /// Root stored with the snapshot.
        stored: H256,
        /// Root rebuilt from its leaves.
        rebuilt: H256,
    },
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("snapshot store: {0}")]
    Store(#[from] StoreError),
    #[error("tree: {0}")]
    Tree(#[from] TreeError),
}

impl ProofError {
    /// Stable machine-readable kind for API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProofError::NotEligible(_) => "not_eligible",
            ProofError::NoPublishedEpoch => "no_published_epoch",
            ProofError::EpochNotPublished(_) => "epoch_not_published",
            ProofError::SnapshotMismatch { .. } => "snapshot_mismatch",
            ProofError::Ledger(_) | ProofError::Store(_) | ProofError::Tree(_) => "backend",
        }
    }

    /// Whether the error describes the caller's data rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProofError::NotEligible(_)
                | ProofError::NoPublishedEpoch
                | ProofError::EpochNotPublished(_)
        )
    }
}

/// Where proofs are read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofSource {
    /// Latest published epoch snapshot.
    #[default]
    Snapshot,
    /// Current ledger, reported under a configured epoch.
    Live {
        /// Epoch the live root is assumed published under.
        epoch: Epoch,
    },
}

/// Everything a client needs to call `claim(epoch, amount, proof)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimProof {
    /// Claimant, lowercase hex.
    pub address: Address,
    /// Human token amount.
    pub amount: TokenAmount,
    /// Amount in base units, decimal string.
    pub amount_base_units: String,
    /// Sibling digests, root-ward order.
    pub proof: Vec<H256>,
    /// Root the proof verifies against.
    pub root: H256,
    /// Epoch the root is published under.
    pub epoch: Epoch,
}

/// Proof query service.
#[derive(Clone)]
pub struct ProofService {
    source: ProofSource,
    snapshots: SnapshotStore,
    ledger: Arc<dyn LedgerSource>,
}

impl ProofService {
    /// New service reading from `source`.
    pub fn new(source: ProofSource, snapshots: SnapshotStore, ledger: Arc<dyn LedgerSource>) -> Self {
        Self {
            source,
            snapshots,
            ledger,
        }
    }

    /// Configured source.
    pub fn source(&self) -> ProofSource {
        self.source
    }

    /// Proof for `address` under the current authoritative root.
    pub async fn get_proof(&self, address: &Address) -> Result<ClaimProof, ProofError> {
        match self.source {
            ProofSource::Snapshot => {
                let snap = self
                    .snapshots
                    .latest_published()?
                    .ok_or(ProofError::NoPublishedEpoch)?;
                prove_from_snapshot(&snap, address)
            }
            ProofSource::Live { epoch } => {
                let leaves = self.ledger.fetch_eligible_rewards().await?;
                if leaves.is_empty() {
                    return Err(ProofError::NotEligible(*address));
                }
                let tree = RewardTree::build(&leaves)?;
                prove_in_tree(&tree, epoch, address)
            }
        }
    }

    /// Proof for `address` in a specific published epoch.
    pub fn get_proof_at(&self, address: &Address, epoch: Epoch) -> Result<ClaimProof, ProofError> {
        match self.snapshots.get(epoch)? {
            Some(snap) if snap.status == SnapshotStatus::Published => {
                prove_from_snapshot(&snap, address)
            }
            _ => Err(ProofError::EpochNotPublished(epoch)),
        }
    }
}

fn prove_from_snapshot(snap: &EpochSnapshot, address: &Address) -> Result<ClaimProof, ProofError> {
    let tree = RewardTree::build(&snap.leaves)?;
    if tree.root() != snap.root {
        error!(
            epoch = snap.epoch,
            stored = %snap.root,
            rebuilt = %tree.root(),
            "snapshot integrity check failed"
        );
        return Err(ProofError::SnapshotMismatch {
            epoch: snap.epoch,
            stored: snap.root,
            rebuilt: tree.root(),
        });
    }
    prove_in_tree(&tree, snap.epoch, address)
}

fn prove_in_tree(tree: &RewardTree, epoch: Epoch, address: &Address) -> Result<ClaimProof, ProofError> {
    let leaf = tree
        .leaf_for(address)
        .filter(|l| !l.amount.is_zero())
        .ok_or(ProofError::NotEligible(*address))?;
    let proof = tree.prove(&leaf)?;
    debug!(%address, epoch, depth = proof.len(), "claim proof built");
    Ok(ClaimProof {
        address: leaf.address,
        amount: leaf.amount,
        amount_base_units: leaf.amount.base_units().to_string(),
        proof,
        root: tree.root(),
        epoch,
    })
}

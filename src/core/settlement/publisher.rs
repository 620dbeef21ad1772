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

//! Epoch root publisher.
//!
//! One settlement run:
//! 1. drop zero-amount leaves, reject an empty set
//! 2. take the in-process epoch lock
//! 3. read the on-chain root; promote a pending record it already matches
//! 4. build the tree, compare-and-set check against `expected_previous`
//! 5. same root on chain: no write
//! 6. different non-zero root on chain: overwrite, refused unless allowed
//! 7. record pending, write, wait for the receipt, publish the snapshot
//!
//! Nothing here retries. A failed or unconfirmed write is returned to the
//! operator as is; the next run for the epoch reconciles an unconfirmed one.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::rewards::merkle::{RewardTree, TreeError};
use crate::core::settlement::distributor::{ChainError, Distributor, TxReceipt};
use crate::core::state::ledger::{LedgerError, LedgerSource};
use crate::core::state::snapshots::{EpochSnapshot, SnapshotStatus, SnapshotStore, StoreError};
use crate::core::types::{Epoch, RewardLeaf, H256};
use crate::monitoring::metrics::Metrics;

/// Settlement errors.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("no eligible leaves; refusing to publish an empty root")]
    EmptyLeafSet,
    #[error("tree: {0}")]
    Tree(#[from] TreeError),
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("snapshot store: {0}")]
    Store(#[from] StoreError),
    #[error("epoch {epoch} is already being settled by this node")]
    EpochLocked {
        /// Epoch being settled.
        epoch: Epoch,
    },
    #[error("epoch {epoch}: expected on-chain root {expected}, found {actual}")]
    PreviousRootMismatch {
        /// Epoch being settled.
        epoch: Epoch,
        /// Root the operator expected.
        expected: H256,
        /// Root read from chain.
        actual: H256,
    },
    #[error(
        "epoch {epoch} already has root {current} on chain; writing {proposed} would \
         invalidate issued proofs (pass allow_overwrite to force)"
    )]
    RootOverwriteRefused {
        /// Epoch being settled.
        epoch: Epoch,
        /// Root currently on chain.
        current: H256,
        /// Root built from this leaf set.
        proposed: H256,
    },
}

/// Operator guards for one run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SettleOptions {
    /// Require the on-chain root to equal this before writing (`H256::ZERO`
    /// for "unset").
    pub expected_previous: Option<H256>,
    /// Permit replacing a different non-zero root.
    pub allow_overwrite: bool,
}

/// What a run did on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Root written to an unset epoch.
    Published,
    /// Chain already held this root; nothing written.
    AlreadyPublished,
    /// A different root was replaced.
    Overwritten {
        /// Root that was replaced.
        previous: H256,
    },
}

/// Result of a settlement run.
#[derive(Clone, Debug, Serialize)]
pub struct SettlementReport {
    /// Settled epoch.
    pub epoch: Epoch,
    /// Root built from the leaf set.
    pub root: H256,
    /// Number of leaves committed.
    pub leaf_count: usize,
    /// Chain effect.
    #[serde(flatten)]
    pub outcome: SettlementOutcome,
    /// Root-write receipt, absent when nothing was written.
    pub tx: Option<TxReceipt>,
}

/// Epochs with a settlement run in flight in this process.
///
/// Lives in memory only: sled already keeps a second process off the data
/// directory, and nothing survives a crash to block the next run.
#[derive(Default)]
struct EpochLocks {
    held: Mutex<BTreeSet<Epoch>>,
}

impl EpochLocks {
    fn try_acquire(&self, epoch: Epoch) -> Option<EpochGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if !held.insert(epoch) {
            return None;
        }
        Some(EpochGuard { locks: self, epoch })
    }
}

struct EpochGuard<'a> {
    locks: &'a EpochLocks,
    epoch: Epoch,
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.epoch);
    }
}

/// Settlement orchestrator.
pub struct Publisher {
    distributor: Arc<dyn Distributor>,
    snapshots: SnapshotStore,
    metrics: Arc<Metrics>,
    operator: String,
    locks: EpochLocks,
}

impl Publisher {
    /// `operator` is logged with every run.
    pub fn new(
        distributor: Arc<dyn Distributor>,
        snapshots: SnapshotStore,
        metrics: Arc<Metrics>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            distributor,
            snapshots,
            metrics,
            operator: operator.into(),
            locks: EpochLocks::default(),
        }
    }

    /// Read the ledger once and settle `epoch` from that read.
    pub async fn settle_from_ledger(
        &self,
        epoch: Epoch,
        ledger: &dyn LedgerSource,
        opts: SettleOptions,
    ) -> Result<SettlementReport, SettlementError> {
        let leaves = ledger.fetch_eligible_rewards().await.map_err(|e| {
            self.metrics.settlement_failures_total.inc();
            error!(epoch, error = %e, "ledger read failed");
            SettlementError::from(e)
        })?;
        self.settle(epoch, leaves, opts).await
    }

    /// Settle `epoch` with `leaves` (zero amounts are not committed).
    pub async fn settle(
        &self,
        epoch: Epoch,
        leaves: Vec<RewardLeaf>,
        opts: SettleOptions,
    ) -> Result<SettlementReport, SettlementError> {
        let res = self.run(epoch, leaves, opts).await;
        if let Err(e) = &res {
            self.metrics.settlement_failures_total.inc();
            error!(epoch, operator = %self.operator, error = %e, "settlement failed");
        }
        res
    }

    async fn run(
        &self,
        epoch: Epoch,
        mut leaves: Vec<RewardLeaf>,
        opts: SettleOptions,
    ) -> Result<SettlementReport, SettlementError> {
        let offered = leaves.len();
        leaves.retain(|l| !l.amount.is_zero());
        if leaves.len() < offered {
            debug!(epoch, dropped = offered - leaves.len(), "zero-amount leaves excluded");
        }
        if leaves.is_empty() {
            return Err(SettlementError::EmptyLeafSet);
        }

        let _guard = self
            .locks
            .try_acquire(epoch)
            .ok_or(SettlementError::EpochLocked { epoch })?;

        let current = self.distributor.current_root(epoch).await?;
        if let Some(report) = self.recover_pending(epoch, current)? {
            return Ok(report);
        }

        let tree = RewardTree::build(&leaves)?;
        let root = tree.root();
        leaves.sort_unstable_by_key(|l| l.address);
        info!(
            epoch,
            operator = %self.operator,
            %root,
            %current,
            leaves = tree.len(),
            "settlement tree built"
        );

        if let Some(expected) = opts.expected_previous {
            if expected != current {
                return Err(SettlementError::PreviousRootMismatch {
                    epoch,
                    expected,
                    actual: current,
                });
            }
        }

        if current == root {
            self.record_confirmed(EpochSnapshot::pending(epoch, root, leaves), None)?;
            self.metrics.settlements_already_published_total.inc();
            self.update_gauges(epoch, tree.len());
            info!(epoch, %root, "root already on chain; nothing written");
            return Ok(SettlementReport {
                epoch,
                root,
                leaf_count: tree.len(),
                outcome: SettlementOutcome::AlreadyPublished,
                tx: None,
            });
        }

        let outcome = if current.is_zero() {
            SettlementOutcome::Published
        } else {
            self.metrics.root_overwrites_total.inc();
            warn!(
                epoch,
                previous = %current,
                proposed = %root,
                allowed = opts.allow_overwrite,
                "root overwrite: leaf set changed for an already-settled epoch"
            );
            if !opts.allow_overwrite {
                return Err(SettlementError::RootOverwriteRefused {
                    epoch,
                    current,
                    proposed: root,
                });
            }
            SettlementOutcome::Overwritten { previous: current }
        };

        // The published record stays authoritative until this write is confirmed.
        let mut pending = EpochSnapshot::pending(epoch, root, leaves);
        self.snapshots.put_pending(&pending)?;

        let receipt = match self.distributor.set_root(epoch, root).await {
            Ok(r) => r,
            Err(e) => {
                if let Some(tx_hash) = e.unconfirmed_tx() {
                    pending.tx_hash = Some(tx_hash);
                    if let Err(store) = self.snapshots.put_pending(&pending) {
                        error!(epoch, error = %store, "failed to record unconfirmed tx hash");
                    }
                    warn!(
                        epoch,
                        %root,
                        %tx_hash,
                        "root write unconfirmed; run settle again once it is mined"
                    );
                }
                return Err(e.into());
            }
        };
        self.record_confirmed(pending, Some(receipt.tx_hash))?;

        self.metrics.settlements_published_total.inc();
        self.update_gauges(epoch, tree.len());
        info!(
            epoch,
            %root,
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            "root published"
        );

        Ok(SettlementReport {
            epoch,
            root,
            leaf_count: tree.len(),
            outcome,
            tx: Some(receipt),
        })
    }

    /// Publish the pending record for `epoch` if the chain already holds its
    /// root. Its leaf set is the one that root commits to, whatever the
    /// ledger says now.
    fn recover_pending(
        &self,
        epoch: Epoch,
        current: H256,
    ) -> Result<Option<SettlementReport>, SettlementError> {
        let Some(pending) = self.snapshots.pending(epoch)? else {
            return Ok(None);
        };
        if current.is_zero() || pending.root != current {
            return Ok(None);
        }
        let root = pending.root;
        let leaf_count = pending.leaves.len();
        let tx_hash = pending.tx_hash;
        self.record_confirmed(pending, None)?;
        self.metrics.settlements_already_published_total.inc();
        self.update_gauges(epoch, leaf_count);
        info!(
            epoch,
            %root,
            tx_hash = ?tx_hash,
            "unconfirmed write found on chain; pending snapshot published"
        );
        Ok(Some(SettlementReport {
            epoch,
            root,
            leaf_count,
            outcome: SettlementOutcome::AlreadyPublished,
            tx: None,
        }))
    }

    fn record_confirmed(
        &self,
        mut snap: EpochSnapshot,
        tx_hash: Option<H256>,
    ) -> Result<(), StoreError> {
        let epoch = snap.epoch;
        let existing = self.snapshots.get(epoch)?;
        let pending = self.snapshots.pending(epoch)?.filter(|p| p.root == snap.root);
        let unchanged = existing
            .as_ref()
            .is_some_and(|s| s.status == SnapshotStatus::Published && s.root == snap.root);

        if !(unchanged && tx_hash.is_none()) {
            snap.status = SnapshotStatus::Published;
            // keep the hash of an earlier, unconfirmed submission of the same root
            snap.tx_hash = tx_hash
                .or(snap.tx_hash)
                .or_else(|| pending.as_ref().and_then(|p| p.tx_hash))
                .or_else(|| {
                    existing
                        .filter(|s| s.root == snap.root)
                        .and_then(|s| s.tx_hash)
                });
            self.snapshots.put(&snap)?;
        }
        if pending.is_some() {
            self.snapshots.clear_pending(epoch)?;
        }
        Ok(())
    }

    fn update_gauges(&self, epoch: Epoch, leaf_count: usize) {
        if let Ok(n) = i64::try_from(leaf_count) {
            self.metrics.eligible_leaves.set(n);
        }
        match i64::try_from(epoch) {
            Ok(e) if e > self.metrics.last_settled_epoch.get() => {
                self.metrics.last_settled_epoch.set(e)
            }
            Ok(_) => {}
            Err(_) => debug!(epoch, "epoch exceeds gauge range; last_settled_epoch unchanged"),
        }
    }
}

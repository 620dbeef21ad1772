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

//! Versioned epoch snapshots.
//!
//! Each settlement run persists the exact leaf set it committed to, keyed by
//! big-endian epoch so iteration order is epoch order. Proofs are served from
//! these records, never from the live ledger, so a proof always matches the
//! root that was written for its epoch.
//!
//! A record waiting on its root write lives in a separate pending tree, so a
//! replacement write never shadows the published record it may replace.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

use crate::core::types::{
    decode_canonical_limited, encode_canonical, CodecError, Epoch, RewardLeaf, H256,
};

const SNAPSHOT_TREE: &str = "epoch_snapshots";
const PENDING_TREE: &str = "pending_snapshots";

/// Upper bound on one encoded snapshot.
pub const MAX_SNAPSHOT_BYTES: usize = 64 * 1024 * 1024;

/// Snapshot store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("snapshot codec: {0}")]
    Codec(#[from] CodecError),
}

/// Whether the root write for a snapshot has been confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    /// Recorded before the write; outcome not yet observed.
    Pending,
    /// On-chain root confirmed equal to `root`.
    Published,
}

/// Leaf set and root committed for one epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    /// Epoch id.
    pub epoch: Epoch,
    /// Root built from `leaves`.
    pub root: H256,
    /// Leaves as read from the ledger.
    pub leaves: Vec<RewardLeaf>,
    /// Write status.
    pub status: SnapshotStatus,
    /// Root-write transaction, once one was submitted.
    pub tx_hash: Option<H256>,
    /// Recorded-at time (ms since UNIX epoch).
    pub recorded_at_ms: u64,
}

impl EpochSnapshot {
    /// New pending snapshot stamped with the current time.
    pub fn pending(epoch: Epoch, root: H256, leaves: Vec<RewardLeaf>) -> Self {
        Self {
            epoch,
            root,
            leaves,
            status: SnapshotStatus::Pending,
            tx_hash: None,
            recorded_at_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// sled-backed snapshot store.
#[derive(Clone)]
pub struct SnapshotStore {
    snapshots: sled::Tree,
    pending: sled::Tree,
}

fn decode_snapshot(bytes: &[u8]) -> Result<EpochSnapshot, StoreError> {
    Ok(decode_canonical_limited(bytes, MAX_SNAPSHOT_BYTES)?)
}

fn write(tree: &sled::Tree, snap: &EpochSnapshot) -> Result<(), StoreError> {
    let bytes = encode_canonical(snap)?;
    tree.insert(snap.epoch.to_be_bytes(), bytes)
        .map_err(|_| StoreError::DbIo)?;
    tree.flush().map_err(|_| StoreError::DbIo)?;
    Ok(())
}

fn read(tree: &sled::Tree, epoch: Epoch) -> Result<Option<EpochSnapshot>, StoreError> {
    match tree.get(epoch.to_be_bytes()).map_err(|_| StoreError::DbIo)? {
        Some(v) => Ok(Some(decode_snapshot(&v)?)),
        None => Ok(None),
    }
}

impl SnapshotStore {
    /// Open the snapshot trees inside an existing database.
    pub fn open_tree(db: &sled::Db) -> Result<Self, StoreError> {
        let snapshots = db.open_tree(SNAPSHOT_TREE).map_err(|_| StoreError::DbOpen)?;
        let pending = db.open_tree(PENDING_TREE).map_err(|_| StoreError::DbOpen)?;
        Ok(Self { snapshots, pending })
    }

    /// Throwaway in-memory store.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|_| StoreError::DbOpen)?;
        Self::open_tree(&db)
    }

    /// Insert or replace the snapshot for `snap.epoch`.
    pub fn put(&self, snap: &EpochSnapshot) -> Result<(), StoreError> {
        write(&self.snapshots, snap)
    }

    /// Snapshot for `epoch`.
    pub fn get(&self, epoch: Epoch) -> Result<Option<EpochSnapshot>, StoreError> {
        read(&self.snapshots, epoch)
    }

    /// Record the leaf set behind a root write that has not been confirmed.
    /// Replaces any earlier pending record for the epoch.
    pub fn put_pending(&self, snap: &EpochSnapshot) -> Result<(), StoreError> {
        let mut snap = snap.clone();
        snap.status = SnapshotStatus::Pending;
        write(&self.pending, &snap)
    }

    /// Unconfirmed record for `epoch`.
    pub fn pending(&self, epoch: Epoch) -> Result<Option<EpochSnapshot>, StoreError> {
        read(&self.pending, epoch)
    }

    /// Drop the pending record for `epoch` once it is resolved.
    pub fn clear_pending(&self, epoch: Epoch) -> Result<(), StoreError> {
        if self
            .pending
            .remove(epoch.to_be_bytes())
            .map_err(|_| StoreError::DbIo)?
            .is_some()
        {
            debug!(epoch, "pending snapshot cleared");
        }
        self.pending.flush().map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Highest epoch whose root write is confirmed.
    pub fn latest_published(&self) -> Result<Option<EpochSnapshot>, StoreError> {
        for item in self.snapshots.iter().rev() {
            let (_, v) = item.map_err(|_| StoreError::DbIo)?;
            let snap = decode_snapshot(&v)?;
            if snap.status == SnapshotStatus::Published {
                return Ok(Some(snap));
            }
        }
        Ok(None)
    }

    /// All recorded epochs, ascending.
    pub fn epochs(&self) -> Result<Vec<Epoch>, StoreError> {
        let mut out = Vec::new();
        for key in self.snapshots.iter().keys() {
            let key = key.map_err(|_| StoreError::DbIo)?;
            let raw: [u8; 8] = key.as_ref().try_into().map_err(|_| StoreError::DbIo)?;
            out.push(Epoch::from_be_bytes(raw));
        }
        Ok(out)
    }
}

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

use std::sync::Arc;

use stride_settlement::core::amount::TokenAmount;
use stride_settlement::core::rewards::leaf::hash_leaf;
use stride_settlement::core::rewards::merkle::{verify_proof, RewardTree};
use stride_settlement::core::rewards::proof_service::{ProofError, ProofService, ProofSource};
use stride_settlement::core::settlement::distributor::{
    ChainError, Distributor, MemoryDistributor, WriteFault,
};
use stride_settlement::core::settlement::publisher::{
    Publisher, SettleOptions, SettlementError, SettlementOutcome,
};
use stride_settlement::core::state::ledger::SledLedger;
use stride_settlement::core::state::snapshots::{SnapshotStatus, SnapshotStore};
use stride_settlement::core::types::{Address, RewardLeaf, H256};
use stride_settlement::monitoring::metrics::Metrics;

struct Harness {
    chain: Arc<MemoryDistributor>,
    ledger: SledLedger,
    snapshots: SnapshotStore,
    metrics: Arc<Metrics>,
    publisher: Publisher,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let chain = Arc::new(MemoryDistributor::new());
    let ledger = SledLedger::open_tree(&db).unwrap();
    let snapshots = SnapshotStore::open_tree(&db).unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let publisher = Publisher::new(chain.clone(), snapshots.clone(), metrics.clone(), "itest");
    Harness {
        chain,
        ledger,
        snapshots,
        metrics,
        publisher,
        _dir: dir,
    }
}

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

fn amt(s: &str) -> TokenAmount {
    TokenAmount::from_decimal_str(s).unwrap()
}

#[tokio::test]
async fn identical_leaf_set_settles_idempotently() {
    let h = harness();
    h.ledger.set_total(&addr(1), amt("100")).unwrap();
    h.ledger.set_total(&addr(2), amt("50")).unwrap();

    let first = h
        .publisher
        .settle_from_ledger(1, &h.ledger, SettleOptions::default())
        .await
        .unwrap();
    let second = h
        .publisher
        .settle_from_ledger(1, &h.ledger, SettleOptions::default())
        .await
        .unwrap();

    assert_eq!(first.root, second.root);
    assert_eq!(first.outcome, SettlementOutcome::Published);
    assert_eq!(second.outcome, SettlementOutcome::AlreadyPublished);
    assert!(second.tx.is_none());
    assert_eq!(h.chain.writes().len(), 1);
    assert_eq!(h.metrics.settlements_already_published_total.get(), 1);
    assert_eq!(h.metrics.last_settled_epoch.get(), 1);
}

#[tokio::test]
async fn changed_leaf_set_for_settled_epoch_is_flagged() {
    let h = harness();
    h.ledger.set_total(&addr(1), amt("100")).unwrap();
    let original = h
        .publisher
        .settle_from_ledger(1, &h.ledger, SettleOptions::default())
        .await
        .unwrap();

    h.ledger.credit(&addr(1), amt("5")).unwrap();
    let err = h
        .publisher
        .settle_from_ledger(1, &h.ledger, SettleOptions::default())
        .await
        .unwrap_err();
    match err {
        SettlementError::RootOverwriteRefused { epoch, current, proposed } => {
            assert_eq!(epoch, 1);
            assert_eq!(current, original.root);
            assert_ne!(proposed, original.root);
        }
        other => panic!("expected overwrite refusal, got {other}"),
    }
    assert_eq!(h.chain.writes().len(), 1);
    assert_eq!(h.metrics.root_overwrites_total.get(), 1);
    assert_eq!(h.snapshots.get(1).unwrap().unwrap().root, original.root);

    let forced = h
        .publisher
        .settle_from_ledger(
            1,
            &h.ledger,
            SettleOptions {
                allow_overwrite: true,
                ..SettleOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        forced.outcome,
        SettlementOutcome::Overwritten {
            previous: original.root
        }
    );
    assert_eq!(h.metrics.root_overwrites_total.get(), 2);
    assert_eq!(h.chain.current_root(1).await.unwrap(), forced.root);
    assert_eq!(h.snapshots.get(1).unwrap().unwrap().root, forced.root);
}

#[tokio::test]
async fn expected_previous_guards_the_write() {
    let h = harness();
    let leaves = vec![RewardLeaf::new(addr(3), amt("1"))];

    let err = h
        .publisher
        .settle(
            2,
            leaves.clone(),
            SettleOptions {
                expected_previous: Some(H256::from_bytes([9; 32])),
                allow_overwrite: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::PreviousRootMismatch { epoch: 2, actual, .. } if actual == H256::ZERO
    ));
    assert!(h.chain.writes().is_empty());

    let ok = h
        .publisher
        .settle(
            2,
            leaves,
            SettleOptions {
                expected_previous: Some(H256::ZERO),
                allow_overwrite: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(ok.outcome, SettlementOutcome::Published);
}

#[tokio::test]
async fn reverted_write_is_surfaced_without_retry() {
    let h = harness();
    h.chain.revert_next_write();
    let err = h
        .publisher
        .settle(5, vec![RewardLeaf::new(addr(1), amt("1"))], SettleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Chain(ChainError::Reverted { .. })));
    assert!(h.chain.writes().is_empty());
    assert_eq!(h.metrics.settlement_failures_total.get(), 1);

    // pending record kept, never served
    let snap = h.snapshots.pending(5).unwrap().unwrap();
    assert_eq!(snap.status, SnapshotStatus::Pending);
    assert!(snap.tx_hash.is_none());
    assert!(h.snapshots.get(5).unwrap().is_none());
    assert!(h.snapshots.latest_published().unwrap().is_none());
}

#[tokio::test]
async fn empty_ledger_refuses_to_settle() {
    let h = harness();
    h.ledger.set_total(&addr(1), TokenAmount::ZERO).unwrap();
    let err = h
        .publisher
        .settle_from_ledger(1, &h.ledger, SettleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::EmptyLeafSet));
    assert!(h.chain.writes().is_empty());
}

#[tokio::test]
async fn snapshot_proofs_stay_valid_while_ledger_accrues() {
    let h = harness();
    h.ledger.set_total(&addr(1), amt("100")).unwrap();
    h.ledger.set_total(&addr(2), amt("50")).unwrap();
    h.ledger.set_total(&addr(3), amt("0.1234")).unwrap();
    let report = h
        .publisher
        .settle_from_ledger(7, &h.ledger, SettleOptions::default())
        .await
        .unwrap();

    // activity keeps crediting after settlement
    h.ledger.credit(&addr(1), amt("12")).unwrap();

    let proofs = ProofService::new(
        ProofSource::Snapshot,
        h.snapshots.clone(),
        Arc::new(h.ledger.clone()),
    );
    let claim = proofs.get_proof(&addr(1)).await.unwrap();
    assert_eq!(claim.epoch, 7);
    assert_eq!(claim.root, report.root);
    assert_eq!(claim.root, h.chain.current_root(7).await.unwrap());
    assert_eq!(claim.amount, amt("100"));
    assert!(verify_proof(
        claim.root,
        hash_leaf(&RewardLeaf::new(addr(1), claim.amount)),
        &claim.proof
    ));
}

#[tokio::test]
async fn already_published_root_recovers_snapshot() {
    // write landed on chain, but this process never saw the receipt
    let h = harness();
    let leaves = vec![RewardLeaf::new(addr(1), amt("3")), RewardLeaf::new(addr(2), amt("4"))];
    let root = RewardTree::build(&leaves).unwrap().root();
    h.chain.set_root(9, root).await.unwrap();

    let report = h
        .publisher
        .settle(9, leaves, SettleOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, SettlementOutcome::AlreadyPublished);
    let snap = h.snapshots.latest_published().unwrap().unwrap();
    assert_eq!(snap.epoch, 9);
    assert_eq!(snap.root, root);
}

#[tokio::test]
async fn unconfirmed_write_is_published_on_next_run() {
    let h = harness();
    h.ledger.set_total(&addr(1), amt("100")).unwrap();
    h.ledger.set_total(&addr(2), amt("50")).unwrap();
    h.chain.fail_next_write(WriteFault::ConfirmationTimeout);

    let err = h
        .publisher
        .settle_from_ledger(3, &h.ledger, SettleOptions::default())
        .await
        .unwrap_err();
    let tx_hash = match err {
        SettlementError::Chain(ChainError::ConfirmationTimeout { tx_hash, .. }) => tx_hash,
        other => panic!("expected confirmation timeout, got {other}"),
    };
    let pending = h.snapshots.pending(3).unwrap().unwrap();
    assert_eq!(pending.tx_hash, Some(tx_hash));
    assert!(h.snapshots.get(3).unwrap().is_none());

    let proofs = ProofService::new(
        ProofSource::Snapshot,
        h.snapshots.clone(),
        Arc::new(h.ledger.clone()),
    );
    assert!(matches!(
        proofs.get_proof(&addr(1)).await,
        Err(ProofError::NoPublishedEpoch)
    ));

    // the ledger moves on before the operator re-runs; the chain root wins
    h.ledger.credit(&addr(1), amt("7")).unwrap();
    let report = h
        .publisher
        .settle_from_ledger(3, &h.ledger, SettleOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, SettlementOutcome::AlreadyPublished);
    assert_eq!(report.root, pending.root);
    assert_eq!(h.chain.writes().len(), 1);

    let snap = h.snapshots.get(3).unwrap().unwrap();
    assert_eq!(snap.status, SnapshotStatus::Published);
    assert_eq!(snap.tx_hash, Some(tx_hash));
    assert!(h.snapshots.pending(3).unwrap().is_none());

    let claim = proofs.get_proof(&addr(1)).await.unwrap();
    assert_eq!(claim.root, h.chain.current_root(3).await.unwrap());
    assert_eq!(claim.amount, amt("100"));
}

#[tokio::test]
async fn unconfirmed_overwrite_keeps_published_snapshot() {
    let h = harness();
    h.ledger.set_total(&addr(1), amt("100")).unwrap();
    let original = h
        .publisher
        .settle_from_ledger(4, &h.ledger, SettleOptions::default())
        .await
        .unwrap();

    h.ledger.credit(&addr(1), amt("1")).unwrap();
    h.chain.fail_next_write(WriteFault::ConfirmationTimeout);
    let force = SettleOptions {
        allow_overwrite: true,
        ..SettleOptions::default()
    };
    let err = h
        .publisher
        .settle_from_ledger(4, &h.ledger, force)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Chain(ChainError::ConfirmationTimeout { .. })
    ));

    let published = h.snapshots.get(4).unwrap().unwrap();
    assert_eq!(published.root, original.root);
    assert_eq!(published.status, SnapshotStatus::Published);
    let pending = h.snapshots.pending(4).unwrap().unwrap();
    assert_ne!(pending.root, original.root);
    assert_eq!(h.chain.current_root(4).await.unwrap(), pending.root);

    let report = h
        .publisher
        .settle_from_ledger(4, &h.ledger, SettleOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, SettlementOutcome::AlreadyPublished);
    assert_eq!(h.snapshots.get(4).unwrap().unwrap().root, pending.root);
    assert!(h.snapshots.pending(4).unwrap().is_none());
}

#[tokio::test]
async fn interrupted_run_does_not_block_restart() {
    let dir = tempfile::tempdir().unwrap();
    let leaves = vec![RewardLeaf::new(addr(1), amt("2"))];
    {
        let db = sled::open(dir.path()).unwrap();
        let snapshots = SnapshotStore::open_tree(&db).unwrap();
        let chain = Arc::new(MemoryDistributor::new());
        chain.fail_next_write(WriteFault::Revert);
        let metrics = Arc::new(Metrics::new().unwrap());
        let publisher = Publisher::new(chain, snapshots, metrics, "first");
        publisher
            .settle(6, leaves.clone(), SettleOptions::default())
            .await
            .unwrap_err();
        db.flush().unwrap();
    }

    let db = sled::open(dir.path()).unwrap();
    let snapshots = SnapshotStore::open_tree(&db).unwrap();
    assert!(snapshots.pending(6).unwrap().is_some());
    let metrics = Arc::new(Metrics::new().unwrap());
    let publisher = Publisher::new(
        Arc::new(MemoryDistributor::new()),
        snapshots.clone(),
        metrics,
        "second",
    );
    let report = publisher
        .settle(6, leaves, SettleOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, SettlementOutcome::Published);
    assert!(snapshots.pending(6).unwrap().is_none());
}

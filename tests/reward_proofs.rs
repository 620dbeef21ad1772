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

use ethers::types::U256;

use stride_settlement::core::amount::TokenAmount;
use stride_settlement::core::rewards::leaf::{encode, hash_leaf};
use stride_settlement::core::rewards::merkle::{process_proof, verify_proof, RewardTree};
use stride_settlement::core::rewards::proof_service::{ProofError, ProofService, ProofSource};
use stride_settlement::core::state::ledger::SledLedger;
use stride_settlement::core::state::snapshots::SnapshotStore;
use stride_settlement::core::types::{Address, RewardLeaf, H256};

const A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1";
const B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2";

const LEAF_A_100: &str = "0x5ecf86ecbee0c2791df361423c62b136630dacf5e3519d628226caa3110cf3f1";
const LEAF_B_50: &str = "0xed8b8dc46b049dcba990525a200a61e2cd440557268f20b58e199f5492f2fce0";
const ROOT_AB: &str = "0xa68b5f534b6c72f4909d888e506e5c54c45b52ed5aafe6b235904d8ebdaa032f";
const ROOT_3: &str = "0xc56fa2421ca20520a1c7c318c39c23c0f694377dadfb582119a11104dce13d09";
const ROOT_5: &str = "0xf4c61cad33ec0ad7056fb441aa7d06dca00e630105e82b6a0e3a4405d352c013";

fn leaf(addr: &str, amount: &str) -> RewardLeaf {
    RewardLeaf::new(
        Address::parse(addr).unwrap(),
        TokenAmount::from_decimal_str(amount).unwrap(),
    )
}

fn filled(byte: u8, amount: &str) -> RewardLeaf {
    RewardLeaf::new(
        Address::from_bytes([byte; 20]),
        TokenAmount::from_decimal_str(amount).unwrap(),
    )
}

fn three_leaves() -> Vec<RewardLeaf> {
    vec![filled(0x11, "1"), filled(0x22, "2.5"), filled(0x33, "1234.5678")]
}

#[test]
fn leaf_hashes_match_evm_encoding() {
    assert_eq!(encode(A, "100.0").unwrap().to_string(), LEAF_A_100);
    assert_eq!(hash_leaf(&leaf(B, "50")).to_string(), LEAF_B_50);
}

#[test]
fn amount_scaling_truncates() {
    let scaled = U256::from(1_234_567_800_000_000_000_000u128);
    assert_eq!(TokenAmount::from_decimal_str("1234.5678").unwrap().base_units(), scaled);
    assert!(TokenAmount::from_decimal_str("0.00001").unwrap().base_units().is_zero());
    assert_eq!(TokenAmount::from_f64(1234.5678).unwrap().base_units(), scaled);
    assert!(TokenAmount::from_f64(0.00001).unwrap().base_units().is_zero());
}

#[test]
fn odd_leaf_count_roots_are_pinned() {
    let three = three_leaves();
    let mut five = three_leaves();
    five.push(filled(0x44, "0.0001"));
    five.push(filled(0x55, "50"));

    for _ in 0..3 {
        assert_eq!(RewardTree::build(&three).unwrap().root(), H256::from_hex(ROOT_3).unwrap());
        assert_eq!(RewardTree::build(&five).unwrap().root(), H256::from_hex(ROOT_5).unwrap());
    }

    let mut reversed = five.clone();
    reversed.reverse();
    assert_eq!(RewardTree::build(&reversed).unwrap().root(), H256::from_hex(ROOT_5).unwrap());
}

#[tokio::test]
async fn end_to_end_two_leaf_claim() {
    let ledger = SledLedger::open_temporary().unwrap();
    ledger.set_total(&Address::parse(A).unwrap(), TokenAmount::from_decimal_str("100.0").unwrap()).unwrap();
    ledger.set_total(&Address::parse(B).unwrap(), TokenAmount::from_decimal_str("50.0").unwrap()).unwrap();

    let leaves = ledger.eligible_rows().unwrap();
    let root = RewardTree::build(&leaves).unwrap().root();
    assert_eq!(root.to_string(), ROOT_AB);

    let svc = ProofService::new(
        ProofSource::Live { epoch: 1 },
        SnapshotStore::open_temporary().unwrap(),
        Arc::new(ledger),
    );
    let claim = svc.get_proof(&Address::parse(A).unwrap()).await.unwrap();
    assert_eq!(claim.amount.to_string(), "100.0");
    assert_eq!(claim.amount_base_units, "100000000000000000000");
    assert_eq!(claim.proof, vec![H256::from_hex(LEAF_B_50).unwrap()]);
    assert_eq!(claim.root, root);
    assert_eq!(claim.epoch, 1);
    assert_eq!(process_proof(H256::from_hex(LEAF_A_100).unwrap(), &claim.proof), root);
    assert!(verify_proof(root, hash_leaf(&leaf(A, "100")), &claim.proof));

    let absent = Address::parse("0xcccccccccccccccccccccccccccccccccccccccc").unwrap();
    match svc.get_proof(&absent).await {
        Err(ProofError::NotEligible(a)) => assert_eq!(a, absent),
        other => panic!("expected NotEligible, got {other:?}"),
    }
}

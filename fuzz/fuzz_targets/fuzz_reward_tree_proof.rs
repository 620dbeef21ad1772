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

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stride_settlement::core::amount::TokenAmount;
use stride_settlement::core::rewards::leaf::hash_leaf;
use stride_settlement::core::rewards::merkle::{verify_proof, RewardTree};
use stride_settlement::core::types::{Address, RewardLeaf};

#[derive(Clone, Debug, Arbitrary)]
struct Input {
    leaves: Vec<([u8; 20], [u8; 32])>,
    index: u16,
}

fuzz_target!(|inp: Input| {
    let leaves: Vec<RewardLeaf> = inp
        .leaves
        .iter()
        .map(|(a, v)| RewardLeaf::new(Address::from_bytes(*a), TokenAmount::from_be_bytes32(v)))
        .collect();

    // duplicates and empty sets are rejected, never panic
    let Ok(tree) = RewardTree::build(&leaves) else { return };
    let leaf = leaves[(inp.index as usize) % leaves.len()];
    let proof = tree.prove(&leaf).expect("leaf of a built tree");
    assert!(verify_proof(tree.root(), hash_leaf(&leaf), &proof));
});

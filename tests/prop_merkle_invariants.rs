// Copyright (c) 2026 Stride
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use ethers::types::U256;
use proptest::prelude::*;

use stride_settlement::core::amount::TokenAmount;
use stride_settlement::core::rewards::leaf::hash_leaf;
use stride_settlement::core::rewards::merkle::{verify_proof, RewardTree, TreeError};
use stride_settlement::core::types::{Address, RewardLeaf};

/// Base units per ledger step (0.0001 token).
const STEP: u128 = 100_000_000_000_000;

fn leaves_strategy() -> impl Strategy<Value = Vec<RewardLeaf>> {
    prop::collection::btree_map(any::<[u8; 20]>(), 1u64..10_000_000_000, 1..64).prop_map(|m| {
        m.into_iter()
            .map(|(a, steps)| {
                RewardLeaf::new(
                    Address::from_bytes(a),
                    TokenAmount::from_base_units(steps as u128 * STEP),
                )
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn every_leaf_proof_reconstructs_root(leaves in leaves_strategy()) {
        let tree = RewardTree::build(&leaves).unwrap();
        let root = tree.root();
        for leaf in &leaves {
            let proof = tree.prove(leaf).unwrap();
            prop_assert!(verify_proof(root, hash_leaf(leaf), &proof));
            // depth never exceeds ceil(log2(n))
            prop_assert!(proof.len() <= usize::BITS as usize - (leaves.len() - 1).leading_zeros() as usize);
        }
    }

    #[test]
    fn proof_rejects_tampered_amount(leaves in leaves_strategy(), pick in any::<prop::sample::Index>()) {
        let tree = RewardTree::build(&leaves).unwrap();
        let leaf = leaves[pick.index(leaves.len())];
        let proof = tree.prove(&leaf).unwrap();

        let inflated = RewardLeaf::new(
            leaf.address,
            TokenAmount::from_base_units(leaf.amount.base_units() + U256::from(STEP)),
        );
        prop_assert!(!verify_proof(tree.root(), hash_leaf(&inflated), &proof));
        prop_assert_eq!(tree.prove(&inflated).unwrap_err(), TreeError::LeafNotFound);
    }

    #[test]
    fn proof_for_one_leaf_fails_for_another(leaves in leaves_strategy(), a in any::<prop::sample::Index>(), b in any::<prop::sample::Index>()) {
        prop_assume!(leaves.len() >= 2);
        let (ia, ib) = (a.index(leaves.len()), b.index(leaves.len()));
        prop_assume!(ia != ib);

        let tree = RewardTree::build(&leaves).unwrap();
        let proof_a = tree.prove(&leaves[ia]).unwrap();
        // B's address claiming with A's proof
        prop_assert!(!verify_proof(tree.root(), hash_leaf(&leaves[ib]), &proof_a));
        let forged = RewardLeaf::new(leaves[ib].address, leaves[ia].amount);
        prop_assert!(!verify_proof(tree.root(), hash_leaf(&forged), &proof_a));
    }
}

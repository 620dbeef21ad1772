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
#![deny(missing_docs)]

//! Gas sponsorship allowlist.
//!
//! A call is sponsorable when its target contract is listed and, if a
//! function is named, that function is listed for the contract. The policy
//! is built from configuration and handed to whatever authorizes sponsored
//! calls; there is no process-wide list.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::types::Address;

/// One allow-listed contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsoredContract {
    /// Contract address.
    pub address: Address,
    /// Function names permitted on it.
    #[serde(default)]
    pub functions: Vec<String>,
}

/// Contract -> permitted functions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SponsorshipPolicy {
    contracts: BTreeMap<Address, BTreeSet<String>>,
}

impl SponsorshipPolicy {
    /// Policy that sponsors nothing.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Build from config entries; repeated contracts merge their functions.
    pub fn from_entries(entries: &[SponsoredContract]) -> Self {
        let mut policy = Self::default();
        for e in entries {
            let fns = policy.contracts.entry(e.address).or_default();
            fns.extend(e.functions.iter().map(|f| f.trim().to_string()));
        }
        policy
    }

    /// Add `function` on `contract`.
    pub fn allow(mut self, contract: Address, function: &str) -> Self {
        self.contracts
            .entry(contract)
            .or_default()
            .insert(function.to_string());
        self
    }

    /// Whether a call to `contract` (optionally `function`) may be sponsored.
    pub fn is_eligible(&self, contract: &Address, function: Option<&str>) -> bool {
        match (self.contracts.get(contract), function) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(fns), Some(f)) => fns.contains(f),
        }
    }

    /// Number of listed contracts.
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// True when nothing is sponsorable.
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nft() -> Address {
        Address::parse("0x00000000000000000000000000000000000000a1").unwrap()
    }

    #[test]
    fn contract_and_function_must_both_be_listed() {
        let policy = SponsorshipPolicy::deny_all().allow(nft(), "mintSneaker");
        assert!(policy.is_eligible(&nft(), None));
        assert!(policy.is_eligible(&nft(), Some("mintSneaker")));
        assert!(!policy.is_eligible(&nft(), Some("transferFrom")));
        assert!(!policy.is_eligible(&Address::from_bytes([9; 20]), None));
    }

    #[test]
    fn entries_merge_per_contract() {
        let policy = SponsorshipPolicy::from_entries(&[
            SponsoredContract {
                address: nft(),
                functions: vec!["mintSneaker".into()],
            },
            SponsoredContract {
                address: nft(),
                functions: vec![" claim ".into()],
            },
        ]);
        assert_eq!(policy.len(), 1);
        assert!(policy.is_eligible(&nft(), Some("claim")));
        assert!(SponsorshipPolicy::deny_all().is_empty());
    }
}

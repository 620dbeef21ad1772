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

//! Reward leaf encoding, bit-for-bit with the distributor's verifier.
//!
//! leaf = keccak256( address(20) || uint256_be(amount_base_units)(32) )
//!
//! This is Solidity's `keccak256(abi.encodePacked(address, uint256))`.

use sha3::{Digest, Keccak256};

use crate::core::amount::{EncodingError, TokenAmount};
use crate::core::types::{Address, RewardLeaf, H256};

/// Packed leaf preimage length.
pub const PACKED_LEAF_LEN: usize = 20 + 32;

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> H256 {
    let out = Keccak256::digest(data);
    let mut h = [0u8; 32];
    h.copy_from_slice(&out);
    H256::from_bytes(h)
}

/// `abi.encodePacked(address, uint256)`.
pub fn pack_leaf(address: &Address, amount: TokenAmount) -> [u8; PACKED_LEAF_LEN] {
    let mut buf = [0u8; PACKED_LEAF_LEN];
    buf[..20].copy_from_slice(address.as_bytes());
    buf[20..].copy_from_slice(&amount.to_be_bytes32());
    buf
}

/// Hash an already-validated leaf.
pub fn hash_leaf(leaf: &RewardLeaf) -> H256 {
    keccak256(&pack_leaf(&leaf.address, leaf.amount))
}

/// Validate raw ledger input and hash it.
///
/// `address` is normalized case-insensitively; `amount` is a human decimal
/// string, truncated to ledger precision before scaling.
pub fn encode(address: &str, amount: &str) -> Result<H256, EncodingError> {
    let address =
        Address::parse(address).map_err(|e| EncodingError::InvalidAddress(e.to_string()))?;
    let amount = TokenAmount::from_decimal_str(amount)?;
    Ok(hash_leaf(&RewardLeaf::new(address, amount)))
}

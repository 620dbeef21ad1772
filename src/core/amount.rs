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

//! Exact fixed-point token amounts.
//!
//! Amounts that reach the leaf hash are held as integer base units from the
//! moment they leave the ledger. Human-readable values are quantized to the
//! ledger precision by truncation, then scaled by `10^TOKEN_DECIMALS`:
//!
//! `"1234.5678"` -> `1234567800000000000000`, `"0.00001"` -> `0`.

use ethers::types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decimals of the reward token (smallest denomination).
pub const TOKEN_DECIMALS: u32 = 18;

/// Fractional digits the ledger tracks; anything finer is truncated.
pub const LEDGER_DECIMALS: u32 = 4;

fn base_units_per_token() -> U256 {
    U256::exp10(TOKEN_DECIMALS as usize)
}

fn base_units_per_ledger_step() -> U256 {
    U256::exp10((TOKEN_DECIMALS - LEDGER_DECIMALS) as usize)
}

/// Leaf/amount encoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("amount is negative")]
    Negative,
    #[error("amount is not finite")]
    NonFinite,
    #[error("malformed amount: {0}")]
    Malformed(String),
    #[error("amount overflows uint256")]
    Overflow,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Non-negative token quantity in base units, the full `uint256` range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(U256);

impl TokenAmount {
    /// Zero tokens.
    pub const ZERO: TokenAmount = TokenAmount(U256([0; 4]));

    /// Wrap raw base units (no quantization applied).
    pub fn from_base_units(units: impl Into<U256>) -> Self {
        Self(units.into())
    }

    /// Raw base units.
    pub fn base_units(&self) -> U256 {
        self.0
    }

    /// True if nothing is owed.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Base units as a 32-byte big-endian `uint256`.
    pub fn to_be_bytes32(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }

    /// Inverse of [`to_be_bytes32`](Self::to_be_bytes32).
    pub fn from_be_bytes32(bytes: &[u8; 32]) -> Self {
        Self(U256::from_big_endian(bytes))
    }

    /// Checked addition.
    pub fn checked_add(self, other: TokenAmount) -> Result<TokenAmount, EncodingError> {
        self.0
            .checked_add(other.0)
            .map(TokenAmount)
            .ok_or(EncodingError::Overflow)
    }

    /// Parse a human decimal string such as `"1234.5678"`.
    pub fn from_decimal_str(s: &str) -> Result<Self, EncodingError> {
        let raw = s.trim();
        let (negative, body) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(EncodingError::Malformed(raw.to_string()));
        }
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(EncodingError::Malformed(raw.to_string()));
        }
        if negative {
            // "-0.0" is zero, anything else below zero is rejected.
            if int_part.bytes().chain(frac_part.bytes()).any(|b| b != b'0') {
                return Err(EncodingError::Negative);
            }
            return Ok(Self::ZERO);
        }

        let ten = U256::from(10u8);
        let mut whole = U256::zero();
        for b in int_part.bytes() {
            whole = whole
                .checked_mul(ten)
                .and_then(|w| w.checked_add(U256::from(b - b'0')))
                .ok_or(EncodingError::Overflow)?;
        }

        let mut steps: u64 = 0;
        let mut digits = frac_part.bytes().take(LEDGER_DECIMALS as usize);
        for _ in 0..LEDGER_DECIMALS {
            let d = digits.next().map(|b| u64::from(b - b'0')).unwrap_or(0);
            steps = steps * 10 + d;
        }

        whole
            .checked_mul(base_units_per_token())
            .and_then(|w| w.checked_add(U256::from(steps) * base_units_per_ledger_step()))
            .map(Self)
            .ok_or(EncodingError::Overflow)
    }

    /// Convert a ledger float without ever scaling in floating point.
    ///
    /// The float is rendered through its shortest round-trip decimal form
    /// (`1234.5678_f64` -> `"1234.5678"`) and parsed exactly.
    pub fn from_f64(v: f64) -> Result<Self, EncodingError> {
        if !v.is_finite() {
            return Err(EncodingError::NonFinite);
        }
        if v < 0.0 {
            return Err(EncodingError::Negative);
        }
        Self::from_decimal_str(&format!("{v}"))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (whole, frac) = self.0.div_mod(base_units_per_token());
        let frac = format!("{:0width$}", frac.low_u64(), width = TOKEN_DECIMALS as usize);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            write!(f, "{whole}.0")
        } else {
            write!(f, "{whole}.{frac}")
        }
    }
}

impl FromStr for TokenAmount {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal_str(s)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_string())
        } else {
            self.to_be_bytes32().serialize(s)
        }
    }
}

struct HumanAmountVisitor;

impl<'de> de::Visitor<'de> for HumanAmountVisitor {
    type Value = TokenAmount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative decimal token amount")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TokenAmount, E> {
        TokenAmount::from_decimal_str(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TokenAmount, E> {
        U256::from(v)
            .checked_mul(base_units_per_token())
            .map(TokenAmount)
            .ok_or_else(|| E::custom(EncodingError::Overflow))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TokenAmount, E> {
        if v < 0 {
            return Err(E::custom(EncodingError::Negative));
        }
        self.visit_u64(v as u64)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<TokenAmount, E> {
        TokenAmount::from_f64(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            d.deserialize_any(HumanAmountVisitor)
        } else {
            <[u8; 32]>::deserialize(d).map(|b| TokenAmount::from_be_bytes32(&b))
        }
    }
}

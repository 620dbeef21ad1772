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

//! Reward ledger: address -> cumulative earned base units.
//!
//! The settlement core only reads it through [`LedgerSource`]. `SledLedger`
//! also exposes the write path the activity recorder uses (`credit`) and a
//! bulk import for operators.

use async_trait::async_trait;
use serde::Deserialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use thiserror::Error;
use tracing::debug;

use crate::core::amount::{EncodingError, TokenAmount};
use crate::core::types::{Address, RewardLeaf};

const LEDGER_TREE: &str = "ledger";

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("corrupt ledger row")]
    Corrupt,
    #[error("bad ledger row: {0}")]
    BadRow(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Read side consumed by settlement and proof queries.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// All addresses with amount > 0, as a point-in-time snapshot.
    async fn fetch_eligible_rewards(&self) -> Result<Vec<RewardLeaf>, LedgerError>;
}

/// Import row (`{"address": "0x..", "amount": 12.5}`).
#[derive(Clone, Debug, Deserialize)]
pub struct LedgerRow {
    /// Wallet address, any case.
    #[serde(alias = "wallet_address")]
    pub address: Address,
    /// Cumulative earned total.
    #[serde(alias = "total_earned_tokens")]
    pub amount: TokenAmount,
}

/// Parse a JSON array of ledger rows, or `{"rows": [...]}`.
pub fn rows_from_json(json: &str) -> Result<Vec<LedgerRow>, LedgerError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rows {
        List(Vec<LedgerRow>),
        Wrapped { rows: Vec<LedgerRow> },
    }
    match serde_json::from_str::<Rows>(json) {
        Ok(Rows::List(rows)) | Ok(Rows::Wrapped { rows }) => Ok(rows),
        Err(e) => Err(LedgerError::BadRow(e.to_string())),
    }
}

fn decode_amount(bytes: &[u8]) -> Result<TokenAmount, LedgerError> {
    let raw: [u8; 32] = bytes.try_into().map_err(|_| LedgerError::Corrupt)?;
    Ok(TokenAmount::from_be_bytes32(&raw))
}

fn decode_address(bytes: &[u8]) -> Result<Address, LedgerError> {
    let raw: [u8; 20] = bytes.try_into().map_err(|_| LedgerError::Corrupt)?;
    Ok(Address::from_bytes(raw))
}

/// sled-backed ledger.
#[derive(Clone)]
pub struct SledLedger {
    tree: sled::Tree,
}

impl SledLedger {
    /// Open the ledger tree inside an existing database.
    pub fn open_tree(db: &sled::Db) -> Result<Self, LedgerError> {
        let tree = db.open_tree(LEDGER_TREE).map_err(|_| LedgerError::DbOpen)?;
        Ok(Self { tree })
    }

    /// Throwaway in-memory ledger (tests, dry runs).
    pub fn open_temporary() -> Result<Self, LedgerError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|_| LedgerError::DbOpen)?;
        Self::open_tree(&db)
    }

    /// Current cumulative total.
    pub fn total(&self, address: &Address) -> Result<TokenAmount, LedgerError> {
        match self.tree.get(address.as_bytes()).map_err(|_| LedgerError::DbIo)? {
            Some(v) => decode_amount(&v),
            None => Ok(TokenAmount::ZERO),
        }
    }

    /// Overwrite the cumulative total.
    pub fn set_total(&self, address: &Address, amount: TokenAmount) -> Result<(), LedgerError> {
        self.tree
            .insert(address.as_bytes().as_slice(), amount.to_be_bytes32().to_vec())
            .map_err(|_| LedgerError::DbIo)?;
        Ok(())
    }

    /// Atomically add `earned` to the cumulative total; returns the new total.
    pub fn credit(&self, address: &Address, earned: TokenAmount) -> Result<TokenAmount, LedgerError> {
        let key = address.as_bytes().as_slice();
        let res: Result<TokenAmount, TransactionError<LedgerError>> = self.tree.transaction(|t| {
            let current = match t.get(key)? {
                Some(v) => decode_amount(&v).map_err(ConflictableTransactionError::Abort)?,
                None => TokenAmount::ZERO,
            };
            let next = current
                .checked_add(earned)
                .map_err(|e| ConflictableTransactionError::Abort(LedgerError::Encoding(e)))?;
            t.insert(key, next.to_be_bytes32().to_vec())?;
            Ok(next)
        });
        match res {
            Ok(total) => {
                debug!(%address, earned = %earned, total = %total, "ledger credited");
                Ok(total)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(_)) => Err(LedgerError::DbIo),
        }
    }

    /// Replace totals for every row; returns the number of rows written.
    pub fn import_rows(&self, rows: &[LedgerRow]) -> Result<usize, LedgerError> {
        let mut batch = sled::Batch::default();
        for row in rows {
            batch.insert(
                row.address.as_bytes().as_slice(),
                row.amount.to_be_bytes32().as_slice(),
            );
        }
        self.tree.apply_batch(batch).map_err(|_| LedgerError::DbIo)?;
        self.tree.flush().map_err(|_| LedgerError::DbIo)?;
        Ok(rows.len())
    }

    /// Import rows from JSON (see [`rows_from_json`]).
    pub fn import_json(&self, json: &str) -> Result<usize, LedgerError> {
        let rows = rows_from_json(json)?;
        let n = self.import_rows(&rows)?;
        debug!(rows = n, "ledger rows imported");
        Ok(n)
    }

    /// Synchronous read of every positive row, address order.
    pub fn eligible_rows(&self) -> Result<Vec<RewardLeaf>, LedgerError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (k, v) = item.map_err(|_| LedgerError::DbIo)?;
            let amount = decode_amount(&v)?;
            if amount.is_zero() {
                continue;
            }
            out.push(RewardLeaf::new(decode_address(&k)?, amount));
        }
        Ok(out)
    }
}

#[async_trait]
impl LedgerSource for SledLedger {
    async fn fetch_eligible_rewards(&self) -> Result<Vec<RewardLeaf>, LedgerError> {
        self.eligible_rows()
    }
}

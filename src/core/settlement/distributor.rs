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

//! On-chain rewards distributor client.
//!
//! ```text
//! setMerkleRoot(uint256 epoch, bytes32 root)
//! merkleRoots(uint256 epoch) view returns (bytes32)
//! ```
//!
//! `RpcDistributor` submits through `eth_sendTransaction` from the configured
//! operator account, which the node (or a signing proxy) it talks to holds
//! unlocked.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{self, AbiEncode, ParamType, Token};
use ethers::providers::{
    Http, JsonRpcClient, Middleware, PendingTransaction, Provider, ProviderError, RpcError,
};
use ethers::types::{TxHash, U256, U64};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::{Address, Epoch, H256};

mod bindings {
    #![allow(missing_docs, clippy::all)]

    ethers::contract::abigen!(
        RewardsDistributor,
        r#"[
            function setMerkleRoot(uint256 epoch, bytes32 root)
            function merkleRoots(uint256 epoch) view returns (bytes32)
        ]"#
    );
}

pub use bindings::{MerkleRootsCall, RewardsDistributor, SetMerkleRootCall};

/// Chain interaction errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Node-supplied message.
        message: String,
    },
    #[error("unexpected rpc response: {0}")]
    BadResponse(String),
    #[error("transaction {tx_hash} reverted")]
    Reverted {
        /// Mined transaction.
        tx_hash: H256,
    },
    #[error(
        "transaction {tx_hash} not confirmed after {waited_ms} ms; it may still be mined, \
         inspect the on-chain root before any retry"
    )]
    ConfirmationTimeout {
        /// Submitted transaction.
        tx_hash: H256,
        /// Time spent waiting.
        waited_ms: u64,
    },
    #[error("transaction {tx_hash} is no longer known to the node")]
    Dropped {
        /// Submitted transaction.
        tx_hash: H256,
    },
}

impl ChainError {
    /// Hash of a submitted write whose outcome was never observed.
    pub fn unconfirmed_tx(&self) -> Option<H256> {
        match self {
            ChainError::ConfirmationTimeout { tx_hash, .. } | ChainError::Dropped { tx_hash } => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }
}

fn provider_error(e: ProviderError) -> ChainError {
    match e.as_error_response() {
        Some(rpc) => ChainError::Rpc {
            code: rpc.code,
            message: rpc.message.clone(),
        },
        None => ChainError::Transport(e.to_string()),
    }
}

/// Mined root-write transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash.
    pub tx_hash: H256,
    /// Inclusion block, when reported.
    pub block_number: Option<u64>,
}

/// Root registry of the distributor contract.
#[async_trait]
pub trait Distributor: Send + Sync {
    /// Root stored for `epoch` (`H256::ZERO` if unset).
    async fn current_root(&self, epoch: Epoch) -> Result<H256, ChainError>;
    /// Write `root` for `epoch` and wait for it to be mined.
    async fn set_root(&self, epoch: Epoch, root: H256) -> Result<TxReceipt, ChainError>;
}

fn eth_address(a: &Address) -> ethers::types::Address {
    ethers::types::Address::from(*a.as_bytes())
}

fn decode_root(raw: &[u8]) -> Result<H256, ChainError> {
    let word = abi::decode(&[ParamType::FixedBytes(32)], raw)
        .map_err(|e| ChainError::BadResponse(format!("merkleRoots return: {e}")))?
        .into_iter()
        .next()
        .and_then(Token::into_fixed_bytes)
        .ok_or_else(|| ChainError::BadResponse("merkleRoots return: no bytes32".into()))?;
    let word: [u8; 32] = word
        .try_into()
        .map_err(|_| ChainError::BadResponse("merkleRoots return: short word".into()))?;
    Ok(H256::from_bytes(word))
}

/// JSON-RPC distributor connection settings.
#[derive(Clone, Debug)]
pub struct RpcDistributorConfig {
    /// Node endpoint.
    pub rpc_url: String,
    /// Distributor contract.
    pub contract: Address,
    /// Account that owns the distributor.
    pub operator: Address,
    /// How long to wait for a receipt.
    pub confirmation_timeout: Duration,
    /// Receipt poll interval.
    pub poll_interval: Duration,
}

/// Distributor reached over an ethers provider.
pub struct RpcDistributor<P: JsonRpcClient = Http> {
    provider: Arc<Provider<P>>,
    contract: RewardsDistributor<Provider<P>>,
    operator: ethers::types::Address,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RpcDistributor<Http> {
    /// HTTP provider for `cfg.rpc_url`.
    pub fn new(cfg: RpcDistributorConfig) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
            .map_err(|e| ChainError::Transport(format!("rpc url {:?}: {e}", cfg.rpc_url)))?;
        Ok(Self::with_provider(provider, &cfg))
    }
}

impl<P: JsonRpcClient + 'static> RpcDistributor<P> {
    /// Wrap an existing provider; `cfg.rpc_url` is not used.
    pub fn with_provider(provider: Provider<P>, cfg: &RpcDistributorConfig) -> Self {
        let provider = Arc::new(provider.interval(cfg.poll_interval));
        let contract = RewardsDistributor::new(eth_address(&cfg.contract), provider.clone());
        Self {
            provider,
            contract,
            operator: eth_address(&cfg.operator),
            confirmation_timeout: cfg.confirmation_timeout,
            poll_interval: cfg.poll_interval,
        }
    }

    /// Send `setMerkleRoot(epoch, root)`; returns the transaction hash
    /// without waiting for it to be mined.
    pub async fn submit(&self, epoch: Epoch, root: H256) -> Result<H256, ChainError> {
        let call = self
            .contract
            .set_merkle_root(U256::from(epoch), *root.as_bytes())
            .from(self.operator);
        let pending = self
            .provider
            .send_transaction(call.tx.clone(), None)
            .await
            .map_err(provider_error)?;
        Ok(H256::from_bytes(pending.tx_hash().0))
    }

    /// Wait for `tx_hash` to be mined, bounded by the confirmation timeout.
    pub async fn confirm(&self, tx_hash: H256) -> Result<TxReceipt, ChainError> {
        let retries = (self.confirmation_timeout.as_millis()
            / self.poll_interval.as_millis().max(1))
        .max(1) as usize;
        let pending = PendingTransaction::new(TxHash::from(*tx_hash.as_bytes()), self.provider.as_ref())
            .interval(self.poll_interval)
            .retries(retries);

        let receipt = match tokio::time::timeout(self.confirmation_timeout, pending).await {
            Ok(res) => res.map_err(provider_error)?,
            Err(_) => {
                return Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    waited_ms: u64::try_from(self.confirmation_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        };
        match receipt {
            None => Err(ChainError::Dropped { tx_hash }),
            Some(r) if r.status == Some(U64::zero()) => Err(ChainError::Reverted { tx_hash }),
            Some(r) => {
                debug!(%tx_hash, block = ?r.block_number, "receipt observed");
                Ok(TxReceipt {
                    tx_hash,
                    block_number: r.block_number.map(|b| b.as_u64()),
                })
            }
        }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> Distributor for RpcDistributor<P> {
    async fn current_root(&self, epoch: Epoch) -> Result<H256, ChainError> {
        let call = self.contract.merkle_roots(U256::from(epoch));
        let raw = self
            .provider
            .call(&call.tx, None)
            .await
            .map_err(provider_error)?;
        decode_root(raw.as_ref())
    }

    async fn set_root(&self, epoch: Epoch, root: H256) -> Result<TxReceipt, ChainError> {
        let tx_hash = self.submit(epoch, root).await?;
        info!(epoch, %root, %tx_hash, "root write submitted");
        self.confirm(tx_hash).await
    }
}

/// Failure the next [`MemoryDistributor::set_root`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteFault {
    /// Mined and reverted; root unchanged.
    Revert,
    /// Root stored, but the receipt never arrives.
    ConfirmationTimeout,
}

/// In-process distributor for local devnets and tests.
///
/// Keeps one root per epoch and a log of every write, like the contract.
#[derive(Default)]
pub struct MemoryDistributor {
    roots: Mutex<BTreeMap<Epoch, H256>>,
    writes: Mutex<Vec<(Epoch, H256)>>,
    fault: Mutex<Option<WriteFault>>,
}

impl MemoryDistributor {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write that reached the registry, in order.
    pub fn writes(&self) -> Vec<(Epoch, H256)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Make the next `set_root` fail with `fault`.
    pub fn fail_next_write(&self, fault: WriteFault) {
        if let Ok(mut f) = self.fault.lock() {
            *f = Some(fault);
        }
    }

    /// Make the next `set_root` revert.
    pub fn revert_next_write(&self) {
        self.fail_next_write(WriteFault::Revert);
    }
}

#[async_trait]
impl Distributor for MemoryDistributor {
    async fn current_root(&self, epoch: Epoch) -> Result<H256, ChainError> {
        let roots = self
            .roots
            .lock()
            .map_err(|_| ChainError::Transport("poisoned".into()))?;
        Ok(roots.get(&epoch).copied().unwrap_or(H256::ZERO))
    }

    async fn set_root(&self, epoch: Epoch, root: H256) -> Result<TxReceipt, ChainError> {
        let mut writes = self
            .writes
            .lock()
            .map_err(|_| ChainError::Transport("poisoned".into()))?;
        let mut preimage = SetMerkleRootCall {
            epoch: U256::from(epoch),
            root: *root.as_bytes(),
        }
        .encode();
        preimage.extend_from_slice(&(writes.len() as u64).to_be_bytes());
        let tx_hash = crate::core::rewards::leaf::keccak256(&preimage);

        let fault = self
            .fault
            .lock()
            .map(|mut f| f.take())
            .unwrap_or(None);
        if fault == Some(WriteFault::Revert) {
            return Err(ChainError::Reverted { tx_hash });
        }

        self.roots
            .lock()
            .map_err(|_| ChainError::Transport("poisoned".into()))?
            .insert(epoch, root);
        writes.push((epoch, root));
        if fault == Some(WriteFault::ConfirmationTimeout) {
            return Err(ChainError::ConfirmationTimeout {
                tx_hash,
                waited_ms: 0,
            });
        }
        Ok(TxReceipt {
            tx_hash,
            block_number: Some(writes.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rewards::leaf::keccak256;
    use ethers::contract::EthCall;
    use ethers::providers::{JsonRpcError, MockProvider, MockResponse};
    use ethers::types::{Bytes, Transaction, TransactionReceipt};

    fn mocked(timeout_ms: u64) -> (RpcDistributor<MockProvider>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        let cfg = RpcDistributorConfig {
            rpc_url: String::new(),
            contract: Address::from_bytes([0xd1; 20]),
            operator: Address::from_bytes([0xe2; 20]),
            confirmation_timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(5),
        };
        (RpcDistributor::with_provider(provider, &cfg), mock)
    }

    fn mined_tx(hash: H256) -> Transaction {
        Transaction {
            hash: TxHash::from(*hash.as_bytes()),
            block_number: Some(U64::from(9u64)),
            ..Default::default()
        }
    }

    fn receipt(hash: H256, status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: TxHash::from(*hash.as_bytes()),
            block_number: Some(U64::from(9u64)),
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    #[test]
    fn bindings_use_distributor_selectors() {
        assert_eq!(
            SetMerkleRootCall::selector(),
            keccak256(b"setMerkleRoot(uint256,bytes32)").as_bytes()[..4]
        );
        assert_eq!(
            MerkleRootsCall::selector(),
            keccak256(b"merkleRoots(uint256)").as_bytes()[..4]
        );
    }

    #[tokio::test]
    async fn current_root_decodes_bytes32_word() {
        let (d, mock) = mocked(100);
        mock.push::<Bytes, _>(Bytes::from(vec![0xab; 32])).unwrap();
        assert_eq!(d.current_root(3).await.unwrap(), H256::from_bytes([0xab; 32]));

        mock.push::<Bytes, _>(Bytes::from(vec![0x01; 7])).unwrap();
        assert!(matches!(d.current_root(3).await, Err(ChainError::BadResponse(_))));
    }

    #[tokio::test]
    async fn rpc_error_object_is_surfaced() {
        let (d, mock) = mocked(100);
        mock.push_response(MockResponse::Error(JsonRpcError {
            code: -32000,
            message: "header not found".into(),
            data: None,
        }));
        match d.current_root(1).await {
            Err(ChainError::Rpc { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "header not found");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }

        // a failed submission never reaches the receipt wait
        mock.push_response(MockResponse::Error(JsonRpcError {
            code: -32601,
            message: "method not found".into(),
            data: None,
        }));
        assert!(matches!(
            d.set_root(1, H256::from_bytes([1; 32])).await,
            Err(ChainError::Rpc { code: -32601, .. })
        ));
    }

    #[tokio::test]
    async fn reverted_receipt_maps_to_reverted() {
        let (d, mock) = mocked(2_000);
        let hash = H256::from_bytes([0x77; 32]);
        // responses pop last-in first
        mock.push::<TransactionReceipt, _>(receipt(hash, 0)).unwrap();
        mock.push::<Transaction, _>(mined_tx(hash)).unwrap();
        assert!(matches!(
            d.confirm(hash).await,
            Err(ChainError::Reverted { tx_hash }) if tx_hash == hash
        ));
    }

    #[tokio::test]
    async fn successful_receipt_reports_block() {
        let (d, mock) = mocked(2_000);
        let hash = H256::from_bytes([0x55; 32]);
        mock.push::<TransactionReceipt, _>(receipt(hash, 1)).unwrap();
        mock.push::<Transaction, _>(mined_tx(hash)).unwrap();
        let r = d.confirm(hash).await.unwrap();
        assert_eq!(r.tx_hash, hash);
        assert_eq!(r.block_number, Some(9));
    }

    #[tokio::test]
    async fn missing_receipt_times_out() {
        let (d, mock) = mocked(60);
        let hash = H256::from_bytes([0x66; 32]);
        mock.push::<serde_json::Value, _>(serde_json::Value::Null).unwrap();
        mock.push::<Transaction, _>(mined_tx(hash)).unwrap();
        match d.confirm(hash).await {
            Err(e @ ChainError::ConfirmationTimeout { .. }) => {
                assert_eq!(e.unconfirmed_tx(), Some(hash));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn memory_distributor_stores_one_root_per_epoch() {
        let d = MemoryDistributor::new();
        assert_eq!(d.current_root(1).await.unwrap(), H256::ZERO);
        let r1 = H256::from_bytes([1; 32]);
        let r2 = H256::from_bytes([2; 32]);
        d.set_root(1, r1).await.unwrap();
        d.set_root(1, r2).await.unwrap();
        assert_eq!(d.current_root(1).await.unwrap(), r2);
        assert_eq!(d.writes(), vec![(1, r1), (1, r2)]);

        d.revert_next_write();
        assert!(matches!(
            d.set_root(2, r1).await,
            Err(ChainError::Reverted { .. })
        ));
        assert_eq!(d.current_root(2).await.unwrap(), H256::ZERO);

        d.fail_next_write(WriteFault::ConfirmationTimeout);
        let err = d.set_root(2, r1).await.unwrap_err();
        assert!(err.unconfirmed_tx().is_some());
        assert_eq!(d.current_root(2).await.unwrap(), r1);
    }
}

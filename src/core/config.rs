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

//! Settlement node configuration.
//!
//! ## Format (TOML)
//! ```text
//! [node]
//! data_dir = "/srv/stride/data"
//! operator_name = "settler-1"
//!
//! [http]
//! listen_addr = "0.0.0.0:8080"
//! admin_token = "..."          # enables POST /_admin/settle
//!
//! [chain]
//! rpc_url = "http://127.0.0.1:8545"
//! distributor_address = "0x..."
//! operator_address = "0x..."
//! confirmation_timeout_ms = 120000
//! poll_interval_ms = 2000
//!
//! [rewards]
//! proof_source = "snapshot"   # or "live"
//! live_epoch = 0
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [[sponsorship.contracts]]
//! address = "0x..."
//! functions = ["mintSneaker"]
//! ```
//!
//! `STRIDE_DATA_DIR`, `STRIDE_LISTEN_ADDR`, `STRIDE_RPC_URL` and
//! `STRIDE_ADMIN_TOKEN` override the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::rewards::proof_service::ProofSource;
use crate::core::security::sponsorship::{SponsoredContract, SponsorshipPolicy};
use crate::core::settlement::distributor::RpcDistributorConfig;
use crate::core::types::{Address, Epoch};
use crate::monitoring::logging::LogFormat;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read the config file.
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    /// Cannot parse TOML.
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range or malformed.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// A value required by the requested command is unset.
    #[error("missing config value: {0}")]
    Missing(&'static str),
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettlementConfig {
    /// Storage and identity.
    #[serde(default)]
    pub node: NodeSection,
    /// HTTP API.
    #[serde(default)]
    pub http: HttpSection,
    /// Distributor chain access.
    #[serde(default)]
    pub chain: ChainSection,
    /// Proof serving.
    #[serde(default)]
    pub rewards: RewardsSection,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Gas sponsorship allowlist.
    #[serde(default)]
    pub sponsorship: SponsorshipSection,
}

/// `[node]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSection {
    /// sled database directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Logged with settlement runs.
    #[serde(default = "default_operator_name")]
    pub operator_name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            operator_name: default_operator_name(),
        }
    }
}

/// `[http]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSection {
    /// Bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bearer token for the operator routes; unset disables them.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_token: None,
        }
    }
}

/// `[chain]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSection {
    /// JSON-RPC endpoint.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Rewards distributor contract.
    #[serde(default)]
    pub distributor_address: Option<Address>,
    /// Account that sends `setMerkleRoot`.
    #[serde(default)]
    pub operator_address: Option<Address>,
    /// Receipt wait limit.
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    /// Receipt polling interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            distributor_address: None,
            operator_address: None,
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Proof source selector as written in the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofSourceKind {
    /// Published epoch snapshots.
    #[default]
    Snapshot,
    /// Live ledger.
    Live,
}

/// `[rewards]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsSection {
    /// Where proofs are read from.
    #[serde(default)]
    pub proof_source: ProofSourceKind,
    /// Epoch reported in live mode.
    #[serde(default)]
    pub live_epoch: Epoch,
}

/// `[logging]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// `[sponsorship]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipSection {
    /// Allow-listed contracts.
    #[serde(default)]
    pub contracts: Vec<SponsoredContract>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_operator_name() -> String {
    "stride-operator".to_string()
}
fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_confirmation_timeout_ms() -> u64 {
    120_000
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_log_level() -> String {
    "stride_settlement=info,tower_http=info".to_string()
}

impl SettlementConfig {
    /// Read, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_toml_str(&std::fs::read_to_string(p)?)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse without validating.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `STRIDE_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("STRIDE_DATA_DIR") {
            self.node.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("STRIDE_LISTEN_ADDR") {
            self.http.listen_addr = v;
        }
        if let Some(v) = get("STRIDE_RPC_URL") {
            self.chain.rpc_url = v;
        }
        if let Some(v) = get("STRIDE_ADMIN_TOKEN") {
            self.http.admin_token = Some(v);
        }
    }

    /// Range and shape checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.operator_name.trim().is_empty() {
            return Err(ConfigError::Invalid("node.operator_name is empty".into()));
        }
        self.http.listen_addr.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Invalid(format!("http.listen_addr {:?}", self.http.listen_addr))
        })?;
        let url = self.chain.rpc_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!("chain.rpc_url {:?}", url)));
        }
        if let Some(t) = &self.http.admin_token {
            if t.trim().len() < 16 {
                return Err(ConfigError::Invalid(
                    "http.admin_token must be at least 16 characters".into(),
                ));
            }
        }
        if self.chain.confirmation_timeout_ms == 0 || self.chain.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("chain timeouts must be non-zero".into()));
        }
        if self.chain.poll_interval_ms > self.chain.confirmation_timeout_ms {
            return Err(ConfigError::Invalid(
                "chain.poll_interval_ms exceeds confirmation_timeout_ms".into(),
            ));
        }
        Ok(())
    }

    /// Proof source resolved from `[rewards]`.
    pub fn proof_source(&self) -> ProofSource {
        match self.rewards.proof_source {
            ProofSourceKind::Snapshot => ProofSource::Snapshot,
            ProofSourceKind::Live => ProofSource::Live {
                epoch: self.rewards.live_epoch,
            },
        }
    }

    /// Sponsorship policy from `[[sponsorship.contracts]]`.
    pub fn sponsorship_policy(&self) -> SponsorshipPolicy {
        SponsorshipPolicy::from_entries(&self.sponsorship.contracts)
    }

    /// Operator token, trimmed; `None` when unset or blank.
    pub fn admin_token(&self) -> Option<String> {
        self.http
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Distributor client settings; both addresses must be set.
    pub fn distributor(&self) -> Result<RpcDistributorConfig, ConfigError> {
        Ok(RpcDistributorConfig {
            rpc_url: self.chain.rpc_url.trim().to_string(),
            contract: self
                .chain
                .distributor_address
                .ok_or(ConfigError::Missing("chain.distributor_address"))?,
            operator: self
                .chain
                .operator_address
                .ok_or(ConfigError::Missing("chain.operator_address"))?,
            confirmation_timeout: Duration::from_millis(self.chain.confirmation_timeout_ms),
            poll_interval: Duration::from_millis(self.chain.poll_interval_ms),
        })
    }
}

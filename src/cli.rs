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

//! Operator command line.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stride_settlement::core::types::{Epoch, H256};

/// STRIDE reward settlement node.
#[derive(Parser, Debug)]
#[command(name = "stride-settlement", version, propagate_version = true)]
pub struct StrideCli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "STRIDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the proof and sponsorship HTTP API.
    Serve,
    /// Build the tree from the ledger and publish the epoch root.
    Settle(SettleArgs),
    /// Print the on-chain root for an epoch.
    Root(EpochArgs),
    /// Load ledger rows from a JSON file.
    Import(ImportArgs),
    /// Print a persisted epoch snapshot, or list all epochs.
    Snapshot(SnapshotArgs),
    /// Print build information and exit.
    Version,
}

/// `settle` arguments.
#[derive(Args, Debug)]
pub struct SettleArgs {
    /// Epoch to settle.
    #[arg(long)]
    pub epoch: Epoch,

    /// Refuse to write unless the on-chain root equals this
    /// (0x00..00 for an unset epoch).
    #[arg(long, value_parser = parse_root)]
    pub expect_previous: Option<H256>,

    /// Replace a different root already on chain. Invalidates every proof
    /// issued against it.
    #[arg(long, default_value_t = false)]
    pub allow_overwrite: bool,
}

/// Arguments naming one epoch.
#[derive(Args, Debug)]
pub struct EpochArgs {
    /// Epoch id.
    #[arg(long)]
    pub epoch: Epoch,
}

/// `import` arguments.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON array of `{address, amount}` rows.
    #[arg(long)]
    pub file: PathBuf,
}

/// `snapshot` arguments.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Epoch id; lists recorded epochs when omitted.
    #[arg(long)]
    pub epoch: Option<Epoch>,
}

fn parse_root(s: &str) -> Result<H256, String> {
    H256::from_hex(s).map_err(|e| e.to_string())
}

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

//! Settlement node entrypoint (systemd-friendly).
//!
//! One process owns the data directory: sled locks it on open, so `settle`
//! fails fast while `serve` holds the same directory. A serving node settles
//! through `POST /_admin/settle` instead.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use stride_settlement::api::server::{create_router, AdminState, AppState};
use stride_settlement::core::config::SettlementConfig;
use stride_settlement::core::rewards::proof_service::ProofService;
use stride_settlement::core::settlement::distributor::{Distributor, RpcDistributor};
use stride_settlement::core::settlement::publisher::{Publisher, SettleOptions};
use stride_settlement::core::state::ledger::SledLedger;
use stride_settlement::core::state::snapshots::SnapshotStore;
use stride_settlement::monitoring::logging::init_logging;
use stride_settlement::monitoring::metrics::Metrics;

use cli::{Commands, StrideCli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrideCli::parse();
    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    let cfg = SettlementConfig::load(cli.config.as_deref()).context("load configuration")?;
    init_logging(&cfg.logging.level, cfg.logging.format);

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Settle(args) => settle(cfg, args).await,
        Commands::Root(args) => read_root(cfg, args.epoch).await,
        Commands::Import(args) => import(cfg, &args.file),
        Commands::Snapshot(args) => show_snapshot(cfg, args.epoch),
        Commands::Version => Ok(()),
    }
}

fn open_db(data_dir: &Path) -> Result<sled::Db> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data directory {}", data_dir.display()))?;
    sled::open(data_dir).with_context(|| {
        format!(
            "open database at {} (is `serve` running? settle through its /_admin/settle route)",
            data_dir.display()
        )
    })
}

async fn serve(cfg: SettlementConfig) -> Result<()> {
    let db = open_db(&cfg.node.data_dir)?;
    let snapshots = SnapshotStore::open_tree(&db).context("open snapshot store")?;
    let ledger = Arc::new(SledLedger::open_tree(&db).context("open ledger")?);
    let metrics = Arc::new(Metrics::new().context("metrics init")?);

    let admin = match cfg.admin_token() {
        Some(token) => {
            let settlement = match cfg.distributor() {
                Ok(d) => {
                    let distributor = RpcDistributor::new(d).context("distributor client")?;
                    Some(Arc::new(Publisher::new(
                        Arc::new(distributor),
                        snapshots.clone(),
                        metrics.clone(),
                        cfg.node.operator_name.clone(),
                    )))
                }
                Err(e) => {
                    warn!(error = %e, "admin settle route has no distributor");
                    None
                }
            };
            Some(AdminState {
                token,
                settlement,
                ledger: ledger.clone(),
            })
        }
        None => None,
    };

    let state = AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        proofs: ProofService::new(cfg.proof_source(), snapshots, ledger),
        sponsorship: Arc::new(cfg.sponsorship_policy()),
        metrics,
        admin,
    };

    let listener = tokio::net::TcpListener::bind(&cfg.http.listen_addr)
        .await
        .with_context(|| format!("bind {}", cfg.http.listen_addr))?;
    info!(
        listen = %cfg.http.listen_addr,
        data_dir = %cfg.node.data_dir.display(),
        proof_source = ?cfg.proof_source(),
        sponsored_contracts = state.sponsorship.len(),
        admin_routes = state.admin.is_some(),
        "stride-settlement serving"
    );

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    info!("shutdown complete");
    Ok(())
}

async fn settle(cfg: SettlementConfig, args: cli::SettleArgs) -> Result<()> {
    let db = open_db(&cfg.node.data_dir)?;
    let ledger = SledLedger::open_tree(&db).context("open ledger")?;
    let snapshots = SnapshotStore::open_tree(&db).context("open snapshot store")?;
    let distributor = RpcDistributor::new(cfg.distributor()?).context("distributor client")?;
    let metrics = Arc::new(Metrics::new().context("metrics init")?);

    let publisher = Publisher::new(
        Arc::new(distributor),
        snapshots,
        metrics,
        cfg.node.operator_name.clone(),
    );
    let opts = SettleOptions {
        expected_previous: args.expect_previous,
        allow_overwrite: args.allow_overwrite,
    };
    let report = publisher
        .settle_from_ledger(args.epoch, &ledger, opts)
        .await
        .with_context(|| format!("settle epoch {}", args.epoch))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn read_root(cfg: SettlementConfig, epoch: u64) -> Result<()> {
    let distributor = RpcDistributor::new(cfg.distributor()?).context("distributor client")?;
    let root = distributor
        .current_root(epoch)
        .await
        .with_context(|| format!("read root for epoch {epoch}"))?;
    if root.is_zero() {
        warn!(epoch, "no root set on chain");
    }
    println!("{root}");
    Ok(())
}

fn import(cfg: SettlementConfig, file: &Path) -> Result<()> {
    let json =
        std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let db = open_db(&cfg.node.data_dir)?;
    let ledger = SledLedger::open_tree(&db).context("open ledger")?;
    let n = ledger.import_json(&json).context("import ledger rows")?;
    info!(rows = n, file = %file.display(), "ledger import complete");
    println!("{n}");
    Ok(())
}

fn show_snapshot(cfg: SettlementConfig, epoch: Option<u64>) -> Result<()> {
    let db = open_db(&cfg.node.data_dir)?;
    let snapshots = SnapshotStore::open_tree(&db).context("open snapshot store")?;
    match epoch {
        Some(epoch) => {
            let snap = snapshots
                .get(epoch)?
                .with_context(|| format!("no snapshot recorded for epoch {epoch}"))?;
            println!("{}", serde_json::to_string_pretty(&snap)?);
        }
        None => {
            for epoch in snapshots.epochs()? {
                if let Some(s) = snapshots.get(epoch)? {
                    println!("{epoch}\t{:?}\t{}\t{} leaves", s.status, s.root, s.leaves.len());
                }
            }
        }
    }
    Ok(())
}

fn print_version() {
    println!("stride-settlement {}", env!("CARGO_PKG_VERSION"));
    println!("git      {}", option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"));
    println!("built    {}", option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"));
    println!("rustc    {}", option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown"));
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}

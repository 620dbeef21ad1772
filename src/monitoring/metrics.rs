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

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Claim proofs returned.
    pub proofs_served_total: IntCounter,
    /// Proof queries for addresses without a leaf.
    pub proofs_not_eligible_total: IntCounter,
    /// Proof queries that failed on the backend.
    pub proof_errors_total: IntCounter,

    /// Root writes confirmed.
    pub settlements_published_total: IntCounter,
    /// Settlement runs whose root was already on chain.
    pub settlements_already_published_total: IntCounter,
    /// Settlement runs that found a different root on chain.
    pub root_overwrites_total: IntCounter,
    /// Settlement runs that ended in an error.
    pub settlement_failures_total: IntCounter,

    /// Highest epoch settled by this process.
    pub last_settled_epoch: IntGauge,
    /// Leaf count of the last settled tree.
    pub eligible_leaves: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let c = IntCounter::new(name, help).map_err(|_| MetricsError::Prom)?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|_| MetricsError::Prom)?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, MetricsError> {
    let g = IntGauge::new(name, help).map_err(|_| MetricsError::Prom)?;
    registry
        .register(Box::new(g.clone()))
        .map_err(|_| MetricsError::Prom)?;
    Ok(g)
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let proofs_served_total =
            counter(&registry, "stride_proofs_served_total", "Claim proofs served")?;
        let proofs_not_eligible_total = counter(
            &registry,
            "stride_proofs_not_eligible_total",
            "Proof queries for ineligible addresses",
        )?;
        let proof_errors_total = counter(
            &registry,
            "stride_proof_errors_total",
            "Proof queries failed on the backend",
        )?;

        let settlements_published_total = counter(
            &registry,
            "stride_settlements_published_total",
            "Root writes confirmed",
        )?;
        let settlements_already_published_total = counter(
            &registry,
            "stride_settlements_already_published_total",
            "Settlement runs with the root already on chain",
        )?;
        let root_overwrites_total = counter(
            &registry,
            "stride_root_overwrites_total",
            "Settlement runs that found a different root on chain",
        )?;
        let settlement_failures_total = counter(
            &registry,
            "stride_settlement_failures_total",
            "Settlement runs that failed",
        )?;

        let last_settled_epoch = gauge(
            &registry,
            "stride_last_settled_epoch",
            "Highest epoch settled by this process",
        )?;
        let eligible_leaves = gauge(
            &registry,
            "stride_eligible_leaves",
            "Leaf count of the last settled tree",
        )?;

        Ok(Self {
            registry,
            proofs_served_total,
            proofs_not_eligible_total,
            proof_errors_total,
            settlements_published_total,
            settlements_already_published_total,
            root_overwrites_total,
            settlement_failures_total,
            last_settled_epoch,
            eligible_leaves,
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|_| MetricsError::Prom)?;
        String::from_utf8(buf).map_err(|_| MetricsError::Prom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_series() {
        let m = Metrics::new().unwrap();
        m.proofs_served_total.inc();
        m.last_settled_epoch.set(12);
        let text = m.render().unwrap();
        assert!(text.contains("stride_proofs_served_total 1"));
        assert!(text.contains("stride_last_settled_epoch 12"));
    }
}

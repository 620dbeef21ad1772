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

//! HTTP query API.
//!
//! | Method | Path                   | Description                         |
//! |--------|------------------------|-------------------------------------|
//! | GET    | `/health`              | Liveness check                      |
//! | GET    | `/rewards/proof`       | Claim proof for `?address=[&epoch=]`|
//! | GET    | `/sponsorship/check`   | `?contract=[&function=]` allowlist  |
//! | GET    | `/metrics`             | Prometheus exposition               |
//! | POST   | `/_admin/settle`       | Settle an epoch (operator token)    |
//!
//! The admin route answers 404 unless a token is configured and 403 unless
//! the request carries `Authorization: Bearer <token>`. It settles inside the
//! serving process, which owns the data directory.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::core::rewards::proof_service::{ClaimProof, ProofError, ProofService};
use crate::core::security::sponsorship::SponsorshipPolicy;
use crate::core::settlement::publisher::{
    Publisher, SettleOptions, SettlementError, SettlementReport,
};
use crate::core::state::ledger::LedgerSource;
use crate::core::types::{Address, Epoch, H256};
use crate::monitoring::metrics::Metrics;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Reported version string.
    pub version: String,
    /// Proof queries.
    pub proofs: ProofService,
    /// Sponsorship allowlist.
    pub sponsorship: Arc<SponsorshipPolicy>,
    /// Metrics registry.
    pub metrics: Arc<Metrics>,
    /// Operator routes; `None` disables them.
    pub admin: Option<AdminState>,
}

/// State behind `/_admin/*`.
#[derive(Clone)]
pub struct AdminState {
    /// Expected bearer token.
    pub token: String,
    /// Settlement runner; `None` when no distributor is configured.
    pub settlement: Option<Arc<Publisher>>,
    /// Ledger settled from.
    pub ledger: Arc<dyn LedgerSource>,
}

impl AdminState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();
        if bool::from(presented.as_bytes().ct_eq(self.token.as_bytes())) {
            Ok(())
        } else {
            Err(ApiError::new(StatusCode::FORBIDDEN, "forbidden", "forbidden"))
        }
    }
}

/// Error body: `kind` separates "not eligible" from backend failures.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable kind.
    pub kind: String,
}

/// Handler error carrying its status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, msg: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: msg.into(),
                kind: kind.into(),
            },
        }
    }

    fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let (status, kind) = match &e {
            SettlementError::EmptyLeafSet => (StatusCode::UNPROCESSABLE_ENTITY, "empty_leaf_set"),
            SettlementError::EpochLocked { .. } => (StatusCode::CONFLICT, "epoch_locked"),
            SettlementError::PreviousRootMismatch { .. } => {
                (StatusCode::CONFLICT, "previous_root_mismatch")
            }
            SettlementError::RootOverwriteRefused { .. } => {
                (StatusCode::CONFLICT, "overwrite_refused")
            }
            SettlementError::Chain(_) => (StatusCode::BAD_GATEWAY, "chain"),
            SettlementError::Tree(_) | SettlementError::Ledger(_) | SettlementError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self::new(status, kind, e.to_string())
    }
}

impl From<ProofError> for ApiError {
    fn from(e: ProofError) -> Self {
        let status = if e.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            body: ErrorResponse {
                error: e.to_string(),
                kind: e.kind().into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build the router with CORS (the mobile web client calls cross-origin) and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/rewards/proof", get(proof_handler))
        .route("/sponsorship/check", get(sponsorship_handler))
        .route("/metrics", get(metrics_handler))
        .route("/_admin/settle", post(admin_settle_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: state.version.clone(),
    })
}

/// Raw strings so malformed values get the JSON error body.
#[derive(Debug, Deserialize)]
struct ProofQuery {
    address: Option<String>,
    epoch: Option<String>,
}

fn parse_address(raw: Option<&str>, field: &str) -> Result<Address, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing `{field}` parameter")))?;
    Address::parse(raw).map_err(|e| ApiError::bad_request(format!("invalid `{field}`: {e}")))
}

/// `GET /rewards/proof?address=0x..[&epoch=N]`
async fn proof_handler(
    State(state): State<AppState>,
    Query(q): Query<ProofQuery>,
) -> Result<Json<ClaimProof>, ApiError> {
    let address = parse_address(q.address.as_deref(), "address")?;
    let epoch = match q.epoch.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<Epoch>()
                .map_err(|_| ApiError::bad_request(format!("invalid `epoch`: {raw:?}")))?,
        ),
        None => None,
    };

    let res = match epoch {
        Some(epoch) => state.proofs.get_proof_at(&address, epoch),
        None => state.proofs.get_proof(&address).await,
    };
    match res {
        Ok(proof) => {
            state.metrics.proofs_served_total.inc();
            Ok(Json(proof))
        }
        Err(e) => {
            if e.is_not_found() {
                state.metrics.proofs_not_eligible_total.inc();
            } else {
                state.metrics.proof_errors_total.inc();
                warn!(%address, error = %e, "proof query failed");
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct SponsorshipQuery {
    contract: Option<String>,
    function: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SponsorshipResponse {
    eligible: bool,
}

/// `GET /sponsorship/check?contract=0x..[&function=name]`
async fn sponsorship_handler(
    State(state): State<AppState>,
    Query(q): Query<SponsorshipQuery>,
) -> Result<Json<SponsorshipResponse>, ApiError> {
    let contract = parse_address(q.contract.as_deref(), "contract")?;
    let function = q.function.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(Json(SponsorshipResponse {
        eligible: state.sponsorship.is_eligible(&contract, function),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettleRequest {
    epoch: Epoch,
    #[serde(default)]
    expect_previous: Option<H256>,
    #[serde(default)]
    allow_overwrite: bool,
}

/// `POST /_admin/settle` with `{"epoch": N[, "expect_previous": "0x..", "allow_overwrite": true]}`
async fn admin_settle_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<SettlementReport>, ApiError> {
    let admin = state
        .admin
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "disabled", "disabled"))?;
    admin.authorize(&headers)?;

    let req: SettleRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid settle request: {e}")))?;
    let publisher = admin.settlement.as_ref().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "settlement_unavailable",
            "no distributor configured",
        )
    })?;

    info!(epoch = req.epoch, "settlement requested over admin route");
    let opts = SettleOptions {
        expected_previous: req.expect_previous,
        allow_overwrite: req.allow_overwrite,
    };
    let report = publisher
        .settle_from_ledger(req.epoch, admin.ledger.as_ref(), opts)
        .await?;
    Ok(Json(report))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

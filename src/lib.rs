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

//! STRIDE reward settlement and claim-proof engine.
//!
//! This crate provides:
//! - Leaf encoding bit-for-bit with the on-chain distributor verifier
//! - Deterministic sorted-pair Merkle trees and claim proofs
//! - Guarded epoch root publication over Ethereum JSON-RPC
//! - Versioned epoch snapshots in sled, served over HTTP
//! - Monitoring via Prometheus metrics and structured logging

/// HTTP API (axum).
pub mod api;
/// Settlement primitives (types, rewards, state, settlement, config).
pub mod core;
/// Observability (metrics, logging).
pub mod monitoring;

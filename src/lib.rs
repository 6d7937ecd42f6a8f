//! Assay: a pre-signing safety gate for EVM transactions.
//!
//! Assay sits between a wallet (or dApp) and its upstream JSON-RPC endpoint.
//! It intercepts send-transaction and typed-data-signing requests, runs a
//! budgeted multi-provider risk analysis plus a forked-node simulation of
//! the transaction's effects, and decides, per a configurable policy,
//! whether to forward, block, or prompt.
//!
//! # Modules
//!
//! - [`chains`] — supported chains and their static metadata.
//! - [`config`] — the `assay.config.json` model and discovery.
//! - [`findings`] — risk findings and the recommendation lattice.
//! - [`budget`] — per-call deadlines under a shared wall-clock budget.
//! - [`providers`] — the six data-source adapters behind the analyzer.
//! - [`analyzer`] — bounded-concurrency provider aggregation.
//! - [`calldata`] — selector decoding, intents, EIP-712 classification.
//! - [`simulate`] — the forked-node simulation pipeline and verdicts.
//! - [`scan`] — the orchestrator producing the canonical scan response.
//! - [`policy`] — thresholds, allowlists, and the forward/prompt/block
//!   decision.
//! - [`proxy`] — the intercepting JSON-RPC HTTP server with recordings.
//! - [`transport`] — the same gate as an embeddable client-side wrapper.

pub mod analyzer;
pub mod budget;
pub mod calldata;
pub mod chains;
pub mod config;
pub mod findings;
pub mod policy;
pub mod providers;
pub mod proxy;
pub mod scan;
pub mod simulate;
pub mod transport;
pub mod util;

pub use scan::{AssayCore, ScanInput, ScanOptions, ScanResponse, scan_with_analysis};

//! Forked-node simulation: result model, fork client plumbing, receipt-log
//! extraction, the execution pipeline, and post-simulation verdicts.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use alloy_primitives::{I256, U256};

pub mod fork;
pub mod logs;
pub mod pipeline;
pub mod verdict;

pub use fork::{AnvilInstance, ForkClient, ForkKey, ForkRegistry, HttpForkClient, SimError};
pub use pipeline::{SimProfile, simulate};
pub use verdict::apply_simulation_verdict;

use crate::chains::EvmAddress;

/// How much the simulator trusts a class of extracted changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Downgrades are monotonic; confidence never climbs back up.
    pub fn lower_to(&mut self, ceiling: Confidence) {
        if *self > ceiling {
            *self = ceiling;
        }
    }
}

/// Kind of asset observed moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Native,
    Erc20,
    Erc721,
    Erc1155,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// One balance delta observed for the sender.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetChange {
    pub asset_type: AssetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<EvmAddress>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<U256>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<U256>,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

/// Allowance standard an approval belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStandard {
    Erc20,
    Erc721,
    Erc1155,
    Permit2,
}

/// Whether an approval covers one token id or the whole collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalScope {
    Token,
    All,
}

/// One allowance mutation observed for the sender.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalChange {
    pub standard: ApprovalStandard,
    pub token: EvmAddress,
    pub owner: EvmAddress,
    pub spender: EvmAddress,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<U256>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_amount: Option<U256>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ApprovalScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_spender: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

/// A class of changes with an attached confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section<T> {
    pub changes: Vec<T>,
    pub confidence: Confidence,
}

impl<T> Section<T> {
    pub fn not_run() -> Self {
        Self {
            changes: Vec::new(),
            confidence: Confidence::None,
        }
    }
}

/// The simulator's full answer for one transaction.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSimulationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u128>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<u128>,
    /// Signed native delta in base units, gas-inclusive: sent value shows as
    /// negative regardless of the gas spent on the simulated transaction.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_diff: Option<I256>,
    pub balances: Section<AssetChange>,
    pub approvals: Section<ApprovalChange>,
    pub notes: Vec<String>,
}

impl BalanceSimulationResult {
    /// The sentinel value for "simulation did not run at all".
    pub fn not_run() -> Self {
        Self {
            success: false,
            revert_reason: None,
            gas_used: None,
            effective_gas_price: None,
            native_diff: None,
            balances: Section::not_run(),
            approvals: Section::not_run(),
            notes: Vec::new(),
        }
    }

    pub fn was_attempted(&self) -> bool {
        self.balances.confidence != Confidence::None
            || self.approvals.confidence != Confidence::None
    }
}

//! Risk findings and the recommendation lattice.
//!
//! A scan produces a flat list of [`Finding`]s, each carrying a stable code
//! and a severity [`Level`]. The aggregate [`Recommendation`] is derived from
//! the findings alone, so identical findings always yield an identical
//! recommendation regardless of which providers produced them or in which
//! order they completed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity attached to a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Safe,
    Info,
    Warning,
    Danger,
}

/// Aggregate risk verdict for a scan. Total order: `ok < caution < warning < danger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Ok,
    Caution,
    Warning,
    Danger,
}

impl Recommendation {
    /// Wire-level severity of a finding level, used when findings are
    /// rendered into the scan response.
    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Safe => Recommendation::Ok,
            Level::Info => Recommendation::Caution,
            Level::Warning => Recommendation::Warning,
            Level::Danger => Recommendation::Danger,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Recommendation::Ok => "ok",
            Recommendation::Caution => "caution",
            Recommendation::Warning => "warning",
            Recommendation::Danger => "danger",
        };
        write!(f, "{s}")
    }
}

/// A single risk signal with a stable machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub level: Level,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
}

impl Finding {
    pub fn new(level: Level, code: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            code: code.to_string(),
            message: message.into(),
            details: None,
            refs: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_refs(mut self, refs: Vec<String>) -> Self {
        self.refs = Some(refs);
        self
    }
}

/// Stable finding codes.
pub mod codes {
    pub const VERIFIED: &str = "VERIFIED";
    pub const UNVERIFIED: &str = "UNVERIFIED";
    pub const UNKNOWN_SECURITY: &str = "UNKNOWN_SECURITY";
    pub const KNOWN_PROTOCOL: &str = "KNOWN_PROTOCOL";
    pub const KNOWN_PHISHING: &str = "KNOWN_PHISHING";
    pub const PROXY: &str = "PROXY";
    pub const UPGRADEABLE: &str = "UPGRADEABLE";
    pub const NEW_CONTRACT: &str = "NEW_CONTRACT";
    pub const LOW_ACTIVITY: &str = "LOW_ACTIVITY";
    pub const HONEYPOT: &str = "HONEYPOT";
    pub const HIDDEN_MINT: &str = "HIDDEN_MINT";
    pub const SELFDESTRUCT: &str = "SELFDESTRUCT";
    pub const OWNER_DRAIN: &str = "OWNER_DRAIN";
    pub const BLACKLIST: &str = "BLACKLIST";
    pub const HIGH_TAX: &str = "HIGH_TAX";
    pub const CALLDATA_EMPTY: &str = "CALLDATA_EMPTY";
    pub const CALLDATA_DECODED: &str = "CALLDATA_DECODED";
    pub const CALLDATA_UNKNOWN_SELECTOR: &str = "CALLDATA_UNKNOWN_SELECTOR";
    pub const CALLDATA_SIGNATURES: &str = "CALLDATA_SIGNATURES";
    pub const UNLIMITED_APPROVAL: &str = "UNLIMITED_APPROVAL";
    pub const PERMIT_SIGNATURE: &str = "PERMIT_SIGNATURE";
    pub const PERMIT_UNLIMITED_ALLOWANCE: &str = "PERMIT_UNLIMITED_ALLOWANCE";
    pub const PERMIT_ZERO_EXPIRY: &str = "PERMIT_ZERO_EXPIRY";
    pub const PERMIT_EXPIRED_DEADLINE: &str = "PERMIT_EXPIRED_DEADLINE";
    pub const PERMIT_LONG_EXPIRY: &str = "PERMIT_LONG_EXPIRY";
    pub const EIP7702_AUTHORIZATION: &str = "EIP7702_AUTHORIZATION";
    pub const SIM_UNLIMITED_APPROVAL_UNKNOWN_SPENDER: &str =
        "SIM_UNLIMITED_APPROVAL_UNKNOWN_SPENDER";
    pub const SIM_APPROVAL_FOR_ALL_UNKNOWN_OPERATOR: &str =
        "SIM_APPROVAL_FOR_ALL_UNKNOWN_OPERATOR";
    pub const SIM_MULTIPLE_OUTBOUND_TRANSFERS: &str = "SIM_MULTIPLE_OUTBOUND_TRANSFERS";
}

/// Derive the aggregate recommendation from a set of findings.
///
/// - any `danger` finding yields `danger`;
/// - a `warning` softened by at least one `safe` finding yields `caution`;
/// - an unsoftened `warning` yields `warning`;
/// - otherwise `ok`.
pub fn recommendation_from_findings(findings: &[Finding]) -> Recommendation {
    let mut any_safe = false;
    let mut any_warning = false;
    for finding in findings {
        match finding.level {
            Level::Danger => return Recommendation::Danger,
            Level::Warning => any_warning = true,
            Level::Safe => any_safe = true,
            Level::Info => {}
        }
    }
    if any_warning && any_safe {
        Recommendation::Caution
    } else if any_warning {
        Recommendation::Warning
    } else {
        Recommendation::Ok
    }
}

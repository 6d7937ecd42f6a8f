//! EIP-712 typed-data classification for `eth_signTypedData_v4`.
//!
//! Classification goes by `(primaryType, declared types)`, never by message
//! values: a small schema registry recognizes ERC-2612 permits (including
//! the DAI variant) and Permit2 `PermitSingle` / `PermitBatch`.

use alloy_primitives::U256;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use super::intent::short_address;
use super::parse_quantity;
use crate::findings::{Finding, Level, Recommendation, codes, recommendation_from_findings};

const LONG_EXPIRY: u64 = 30 * 24 * 60 * 60;
const PERMIT2_UNLIMITED: &str = "1461501637330902918203684832716283019655932542975"; // 2^160 - 1

/// Which permit schema a typed-data payload matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitSchema {
    Erc2612,
    Dai,
    Permit2Single,
    Permit2Batch,
}

impl PermitSchema {
    fn label(&self) -> &'static str {
        match self {
            PermitSchema::Erc2612 => "ERC-2612 permit",
            PermitSchema::Dai => "DAI-style permit",
            PermitSchema::Permit2Single => "Permit2 single permit",
            PermitSchema::Permit2Batch => "Permit2 batch permit",
        }
    }
}

/// Outcome of classifying a typed-data payload.
#[derive(Debug)]
pub struct TypedDataAnalysis {
    pub primary_type: String,
    pub permit_like: bool,
    pub findings: Vec<Finding>,
    pub recommendation: Recommendation,
    pub intent: Option<String>,
}

/// Classify the typed data and derive findings. Non-permit payloads come
/// back with no findings and recommendation `ok`.
pub fn analyze_typed_data(typed_data: &Value) -> TypedDataAnalysis {
    let primary_type = typed_data
        .get("primaryType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let schema = classify(typed_data, &primary_type);
    let mut findings = Vec::new();
    let mut intent = None;

    if let Some(schema) = schema {
        let message = typed_data.get("message").cloned().unwrap_or(Value::Null);
        let spender = message
            .get("spender")
            .and_then(Value::as_str)
            .map(str::to_string);
        let token = typed_data
            .pointer("/domain/verifyingContract")
            .and_then(Value::as_str)
            .map(str::to_string);

        findings.push(
            Finding::new(
                Level::Info,
                codes::PERMIT_SIGNATURE,
                format!("Signature request is a {}", schema.label()),
            )
            .with_details(serde_json::json!({
                "primaryType": primary_type,
                "spender": spender,
                "token": token,
            })),
        );

        let amount = permit_amount(schema, &message);
        if let Some(amount) = amount {
            let unlimited = match schema {
                PermitSchema::Erc2612 | PermitSchema::Dai => amount == U256::MAX,
                PermitSchema::Permit2Single | PermitSchema::Permit2Batch => {
                    amount == U256::MAX || amount.to_string() == PERMIT2_UNLIMITED
                }
            };
            if unlimited {
                findings.push(Finding::new(
                    Level::Warning,
                    codes::PERMIT_UNLIMITED_ALLOWANCE,
                    "Permit grants an unlimited allowance",
                ));
            }
        }

        if matches!(schema, PermitSchema::Dai)
            && message.get("allowed").and_then(Value::as_bool) == Some(true)
        {
            findings.push(Finding::new(
                Level::Warning,
                codes::PERMIT_UNLIMITED_ALLOWANCE,
                "DAI-style permit toggles an unlimited allowance",
            ));
        }

        match permit_deadline(schema, &message) {
            Some(deadline) if deadline.is_zero() => {
                findings.push(Finding::new(
                    Level::Warning,
                    codes::PERMIT_ZERO_EXPIRY,
                    "Permit has a zero expiry",
                ));
            }
            Some(deadline) => {
                let now = now_unix();
                let deadline_secs = u64::try_from(deadline).unwrap_or(u64::MAX);
                if deadline_secs < now {
                    findings.push(Finding::new(
                        Level::Info,
                        codes::PERMIT_EXPIRED_DEADLINE,
                        "Permit deadline already passed",
                    ));
                } else if deadline_secs > now + LONG_EXPIRY {
                    findings.push(Finding::new(
                        Level::Warning,
                        codes::PERMIT_LONG_EXPIRY,
                        "Permit stays valid for an unusually long time",
                    ));
                }
            }
            None => {}
        }

        let spender_short = spender
            .as_deref()
            .and_then(|s| s.parse::<alloy_primitives::Address>().ok())
            .map(|a| short_address(&a))
            .unwrap_or_else(|| "unknown spender".to_string());
        intent = Some(format!("Sign {} for {}", schema.label(), spender_short));
    }

    // A permit-shaped signature is never fully benign.
    let mut recommendation = recommendation_from_findings(&findings);
    if schema.is_some() {
        recommendation = recommendation.max(Recommendation::Caution);
    }
    TypedDataAnalysis {
        primary_type,
        permit_like: schema.is_some(),
        findings,
        recommendation,
        intent,
    }
}

fn classify(typed_data: &Value, primary_type: &str) -> Option<PermitSchema> {
    let types = typed_data.get("types")?;
    match primary_type {
        "PermitSingle" if types.get("PermitSingle").is_some() => Some(PermitSchema::Permit2Single),
        "PermitBatch" if types.get("PermitBatch").is_some() => Some(PermitSchema::Permit2Batch),
        "Permit" => {
            let fields = types.get("Permit")?.as_array()?;
            let names: Vec<&str> = fields
                .iter()
                .filter_map(|f| f.get("name").and_then(Value::as_str))
                .collect();
            if names.contains(&"holder") && names.contains(&"allowed") {
                Some(PermitSchema::Dai)
            } else if names.contains(&"owner") && names.contains(&"spender") {
                Some(PermitSchema::Erc2612)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn permit_amount(schema: PermitSchema, message: &Value) -> Option<U256> {
    let raw = match schema {
        PermitSchema::Erc2612 => message.get("value"),
        PermitSchema::Dai => return None,
        PermitSchema::Permit2Single => message.pointer("/details/amount"),
        PermitSchema::Permit2Batch => message
            .pointer("/details")
            .and_then(Value::as_array)
            .and_then(|d| d.first())
            .and_then(|d| d.get("amount")),
    }?;
    quantity(raw)
}

fn permit_deadline(schema: PermitSchema, message: &Value) -> Option<U256> {
    let raw = match schema {
        PermitSchema::Erc2612 => message.get("deadline"),
        PermitSchema::Dai => message.get("expiry"),
        PermitSchema::Permit2Single => message
            .pointer("/details/expiration")
            .or_else(|| message.get("sigDeadline")),
        PermitSchema::Permit2Batch => message.get("sigDeadline"),
    }?;
    quantity(raw)
}

fn quantity(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => parse_quantity(s).ok(),
        Value::Number(n) => U256::from_str_radix(&n.to_string(), 10).ok(),
        _ => None,
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn erc2612(value: &str, deadline: u64) -> Value {
        serde_json::json!({
            "types": {
                "EIP712Domain": [],
                "Permit": [
                    { "name": "owner", "type": "address" },
                    { "name": "spender", "type": "address" },
                    { "name": "value", "type": "uint256" },
                    { "name": "nonce", "type": "uint256" },
                    { "name": "deadline", "type": "uint256" }
                ]
            },
            "primaryType": "Permit",
            "domain": {
                "name": "USD Coin",
                "verifyingContract": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
            },
            "message": {
                "owner": "0x41653c7d61609d856f29355e404f310ec4142cfb",
                "spender": "0x000000000022d473030f116ddee9f6b43ac78ba3",
                "value": value,
                "nonce": "0",
                "deadline": deadline.to_string()
            }
        })
    }

    #[test]
    fn unlimited_erc2612_permit_warns() {
        let analysis = analyze_typed_data(&erc2612(
            "115792089237316195423570985008687907853269984665640564039457584007913129639935",
            now_unix() + 600,
        ));
        assert!(analysis.permit_like);
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::PERMIT_SIGNATURE)
        );
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::PERMIT_UNLIMITED_ALLOWANCE)
        );
        assert_eq!(analysis.recommendation, Recommendation::Warning);
        assert!(analysis.intent.unwrap().contains("0x0000…8ba3"));
    }

    #[test]
    fn zero_expiry_warns() {
        let analysis = analyze_typed_data(&erc2612("1000", 0));
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::PERMIT_ZERO_EXPIRY)
        );
    }

    #[test]
    fn expired_deadline_is_informational() {
        let analysis = analyze_typed_data(&erc2612("1000", 1_000_000));
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::PERMIT_EXPIRED_DEADLINE)
        );
        assert_eq!(analysis.recommendation, Recommendation::Caution);
    }

    #[test]
    fn long_expiry_warns() {
        let analysis = analyze_typed_data(&erc2612("1000", now_unix() + 10 * 365 * 24 * 3600));
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::PERMIT_LONG_EXPIRY)
        );
    }

    #[test]
    fn permit2_single_classifies() {
        let typed = serde_json::json!({
            "types": { "PermitSingle": [], "PermitDetails": [] },
            "primaryType": "PermitSingle",
            "domain": { "name": "Permit2" },
            "message": {
                "details": {
                    "token": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                    "amount": "1461501637330902918203684832716283019655932542975",
                    "expiration": (now_unix() + 600).to_string(),
                    "nonce": "0"
                },
                "spender": "0x3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad",
                "sigDeadline": (now_unix() + 600).to_string()
            }
        });
        let analysis = analyze_typed_data(&typed);
        assert!(analysis.permit_like);
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::PERMIT_UNLIMITED_ALLOWANCE)
        );
    }

    #[test]
    fn unrelated_typed_data_is_clean() {
        let typed = serde_json::json!({
            "types": { "Mail": [ { "name": "contents", "type": "string" } ] },
            "primaryType": "Mail",
            "domain": { "name": "Mailer" },
            "message": { "contents": "hello" }
        });
        let analysis = analyze_typed_data(&typed);
        assert!(!analysis.permit_like);
        assert!(analysis.findings.is_empty());
        assert_eq!(analysis.recommendation, Recommendation::Ok);
    }
}

//! Post-simulation drainer heuristics.
//!
//! Runs after the pipeline on calldata scans: suspicious approval and
//! transfer shapes become findings, the recommendation is recomputed from
//! the full finding set, and a failed simulation clamps it to at least
//! `caution` so "could not verify" never reads as "safe".

use alloy_primitives::U256;

use super::{ApprovalScope, ApprovalStandard, BalanceSimulationResult, Direction};
use crate::chains::Chain;
use crate::findings::{Finding, Level, Recommendation, codes, recommendation_from_findings};

/// 2^160 - 1, the unlimited sentinel at Permit2's amount width.
fn permit2_unlimited() -> U256 {
    (U256::from(1u64) << 160) - U256::from(1u64)
}

/// Fold the simulation outcome into the finding set and recompute the
/// recommendation.
pub fn apply_simulation_verdict(
    chain: Chain,
    simulation: &BalanceSimulationResult,
    findings: &mut Vec<Finding>,
) -> Recommendation {
    if simulation.success {
        add_approval_findings(chain, simulation, findings);
        add_outbound_findings(chain, simulation, findings);
    }

    let mut recommendation = recommendation_from_findings(findings);
    if !simulation.success {
        recommendation = recommendation.max(Recommendation::Caution);
    }
    recommendation
}

fn add_approval_findings(
    chain: Chain,
    simulation: &BalanceSimulationResult,
    findings: &mut Vec<Finding>,
) {
    for approval in &simulation.approvals.changes {
        let spender = approval.spender.0;
        if chain.is_known_spender(&spender) {
            continue;
        }

        let unlimited = match approval.standard {
            ApprovalStandard::Erc20 => approval.amount == Some(U256::MAX),
            ApprovalStandard::Permit2 => {
                approval.amount == Some(permit2_unlimited())
                    || approval.amount == Some(U256::MAX)
            }
            _ => false,
        };
        if unlimited {
            findings.push(
                Finding::new(
                    Level::Warning,
                    codes::SIM_UNLIMITED_APPROVAL_UNKNOWN_SPENDER,
                    format!(
                        "Simulation granted an unlimited allowance to unrecognized spender {}",
                        approval.spender
                    ),
                )
                .with_details(serde_json::json!({
                    "spender": approval.spender,
                    "token": approval.token,
                    "standard": approval.standard,
                })),
            );
        }

        let operator_grant = matches!(
            approval.standard,
            ApprovalStandard::Erc721 | ApprovalStandard::Erc1155
        ) && approval.scope == Some(ApprovalScope::All)
            && approval.approved == Some(true);
        if operator_grant {
            findings.push(
                Finding::new(
                    Level::Danger,
                    codes::SIM_APPROVAL_FOR_ALL_UNKNOWN_OPERATOR,
                    format!(
                        "Simulation granted collection-wide operator access to unrecognized address {}",
                        approval.spender
                    ),
                )
                .with_details(serde_json::json!({
                    "operator": approval.spender,
                    "collection": approval.token,
                })),
            );
        }
    }
}

fn add_outbound_findings(
    chain: Chain,
    simulation: &BalanceSimulationResult,
    findings: &mut Vec<Finding>,
) {
    let outgoing: Vec<_> = simulation
        .balances
        .changes
        .iter()
        .filter(|c| c.direction == Direction::Out)
        .collect();
    let unknown_counterparties = outgoing
        .iter()
        .filter(|c| match &c.counterparty {
            Some(counterparty) => !chain.is_known_spender(&counterparty.0),
            None => true,
        })
        .count();

    if unknown_counterparties >= 2 {
        findings.push(
            Finding::new(
                Level::Danger,
                codes::SIM_MULTIPLE_OUTBOUND_TRANSFERS,
                format!(
                    "Simulation moved assets out to {unknown_counterparties} unrecognized counterparties"
                ),
            )
            .with_details(serde_json::json!({
                "outgoing": outgoing.len(),
                "unknownCounterparties": unknown_counterparties,
            })),
        );
    } else if outgoing.len() >= 3 {
        findings.push(
            Finding::new(
                Level::Warning,
                codes::SIM_MULTIPLE_OUTBOUND_TRANSFERS,
                format!("Simulation produced {} outgoing transfers", outgoing.len()),
            )
            .with_details(serde_json::json!({
                "outgoing": outgoing.len(),
                "unknownCounterparties": unknown_counterparties,
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::PERMIT2;
    use crate::simulate::{ApprovalChange, AssetChange, AssetKind, Confidence, Section};
    use alloy_primitives::{Address, address};

    const UNKNOWN: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const OWNER: Address = address!("0x1111111111111111111111111111111111111111");
    const TOKEN: Address = address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

    fn ok_sim() -> BalanceSimulationResult {
        BalanceSimulationResult {
            success: true,
            revert_reason: None,
            gas_used: Some(50_000),
            effective_gas_price: Some(1),
            native_diff: None,
            balances: Section {
                changes: Vec::new(),
                confidence: Confidence::High,
            },
            approvals: Section {
                changes: Vec::new(),
                confidence: Confidence::High,
            },
            notes: Vec::new(),
        }
    }

    fn approval(spender: Address, amount: U256, standard: ApprovalStandard) -> ApprovalChange {
        ApprovalChange {
            standard,
            token: TOKEN.into(),
            owner: OWNER.into(),
            spender: spender.into(),
            amount: Some(amount),
            previous_amount: None,
            token_id: None,
            scope: Some(ApprovalScope::Token),
            approved: None,
            previous_approved: None,
            previous_spender: None,
            symbol: None,
            decimals: None,
        }
    }

    fn out_change(counterparty: Address) -> AssetChange {
        AssetChange {
            asset_type: AssetKind::Erc20,
            address: Some(TOKEN.into()),
            token_id: None,
            amount: Some(U256::from(100u64)),
            direction: Direction::Out,
            counterparty: Some(counterparty.into()),
            symbol: None,
            decimals: None,
        }
    }

    #[test]
    fn unlimited_approval_to_permit2_is_quiet() {
        let mut sim = ok_sim();
        sim.approvals
            .changes
            .push(approval(PERMIT2, U256::MAX, ApprovalStandard::Erc20));
        let mut findings = Vec::new();
        let rec = apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert!(findings.is_empty());
        assert_eq!(rec, Recommendation::Ok);
    }

    #[test]
    fn unlimited_approval_to_unknown_spender_warns() {
        let mut sim = ok_sim();
        sim.approvals
            .changes
            .push(approval(UNKNOWN, U256::MAX, ApprovalStandard::Erc20));
        let mut findings = Vec::new();
        let rec = apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert!(
            findings
                .iter()
                .any(|f| f.code == codes::SIM_UNLIMITED_APPROVAL_UNKNOWN_SPENDER)
        );
        assert_eq!(rec, Recommendation::Warning);
    }

    #[test]
    fn permit2_width_unlimited_is_recognized() {
        let mut sim = ok_sim();
        sim.approvals.changes.push(approval(
            UNKNOWN,
            permit2_unlimited(),
            ApprovalStandard::Permit2,
        ));
        let mut findings = Vec::new();
        apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn approval_for_all_to_unknown_operator_is_danger() {
        let mut sim = ok_sim();
        let mut grant = approval(UNKNOWN, U256::ZERO, ApprovalStandard::Erc721);
        grant.amount = None;
        grant.scope = Some(ApprovalScope::All);
        grant.approved = Some(true);
        sim.approvals.changes.push(grant);
        let mut findings = Vec::new();
        let rec = apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert!(
            findings
                .iter()
                .any(|f| f.code == codes::SIM_APPROVAL_FOR_ALL_UNKNOWN_OPERATOR
                    && f.level == Level::Danger)
        );
        assert_eq!(rec, Recommendation::Danger);
    }

    #[test]
    fn many_unknown_counterparties_is_danger() {
        let mut sim = ok_sim();
        sim.balances.changes.push(out_change(UNKNOWN));
        sim.balances
            .changes
            .push(out_change(address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")));
        let mut findings = Vec::new();
        let rec = apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert_eq!(rec, Recommendation::Danger);
    }

    #[test]
    fn many_outgoing_to_known_routers_is_only_warning() {
        let mut sim = ok_sim();
        sim.balances.changes.push(out_change(PERMIT2));
        sim.balances.changes.push(out_change(PERMIT2));
        sim.balances.changes.push(out_change(PERMIT2));
        let mut findings = Vec::new();
        let rec = apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert!(
            findings
                .iter()
                .any(|f| f.code == codes::SIM_MULTIPLE_OUTBOUND_TRANSFERS
                    && f.level == Level::Warning)
        );
        assert_eq!(rec, Recommendation::Warning);
    }

    #[test]
    fn failed_simulation_clamps_to_caution() {
        let mut sim = ok_sim();
        sim.success = false;
        sim.revert_reason = Some("execution reverted".to_string());
        let mut findings = Vec::new();
        let rec = apply_simulation_verdict(Chain::Ethereum, &sim, &mut findings);
        assert!(findings.is_empty());
        assert_eq!(rec, Recommendation::Caution);
    }
}

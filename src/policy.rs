//! Risk policy: threshold comparison, allowlist evaluation, and the
//! forward/prompt/block decision.

use serde::{Deserialize, Serialize};

use crate::chains::EvmAddress;
use crate::config::AllowlistConfig;
use crate::findings::{Recommendation, codes};
use crate::scan::ScanResponse;

/// What to do when a scan crosses the risk threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAction {
    Block,
    Prompt,
}

/// Operator policy for intercepted entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskPolicy {
    pub threshold: Recommendation,
    pub on_risk: RiskAction,
    pub allow_prompt_when_simulation_fails: bool,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            threshold: Recommendation::Caution,
            on_risk: RiskAction::Prompt,
            allow_prompt_when_simulation_fails: false,
        }
    }
}

/// Threshold test on the recommendation order.
pub fn recommendation_at_least(actual: Recommendation, threshold: Recommendation) -> bool {
    actual >= threshold
}

/// The gate's verdict for one intercepted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Forward,
    Prompt,
    Block,
}

/// Decide what to do with an intercepted entry.
///
/// Simulation failure is treated as risk: a clean recommendation forwards
/// only when the simulation also succeeded, and prompting through a failed
/// simulation requires explicit opt-in.
pub fn decide_risk_action(
    recommendation: Recommendation,
    simulation_success: bool,
    policy: &RiskPolicy,
    interactive: bool,
) -> Decision {
    let risky = recommendation_at_least(recommendation, policy.threshold);
    if !risky && simulation_success {
        return Decision::Forward;
    }
    if !interactive {
        return Decision::Block;
    }
    if !simulation_success && !policy.allow_prompt_when_simulation_fails {
        return Decision::Block;
    }
    match policy.on_risk {
        RiskAction::Block => Decision::Block,
        RiskAction::Prompt => Decision::Prompt,
    }
}

/// Kind of allowlist violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    ApprovalSpender,
    Target,
}

/// Where the violating address was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSource {
    Simulation,
    Calldata,
    To,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistViolation {
    pub kind: ViolationKind,
    pub address: EvmAddress,
    pub source: ViolationSource,
}

/// Allowlist evaluation output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistReport {
    pub violations: Vec<AllowlistViolation>,
    /// Set when the allowlist is on but the simulation failed and no
    /// spenders could be discovered, so the spender set is unknowable.
    pub unknown_approval_spenders: bool,
}

impl AllowlistReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && !self.unknown_approval_spenders
    }
}

/// Extract touched spenders and the target from a scan response and compare
/// them against the configured allowlist.
pub fn evaluate_allowlist(allowlist: &AllowlistConfig, response: &ScanResponse) -> AllowlistReport {
    let mut report = AllowlistReport::default();
    if allowlist.is_empty() {
        return report;
    }
    let scan = &response.scan;

    let mut touched: Vec<(EvmAddress, ViolationSource)> = Vec::new();
    if let Some(simulation) = &scan.simulation {
        for approval in &simulation.approvals.changes {
            touched.push((approval.spender, ViolationSource::Simulation));
        }
    }
    for finding in &scan.findings {
        if finding.code != codes::CALLDATA_DECODED {
            continue;
        }
        let Some(args) = finding.details.as_ref().and_then(|d| d.get("args")) else {
            continue;
        };
        for key in ["spender", "operator"] {
            if let Some(spender) = args
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<EvmAddress>().ok())
            {
                touched.push((spender, ViolationSource::Calldata));
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    for (spender, source) in touched.iter() {
        if !seen.insert(spender.0) {
            continue;
        }
        if !allowlist.spenders.contains(spender) {
            report.violations.push(AllowlistViolation {
                kind: ViolationKind::ApprovalSpender,
                address: *spender,
                source: *source,
            });
        }
    }

    if !allowlist.to.is_empty() {
        if let Some(to) = &scan.input.calldata.as_ref().map(|c| c.to) {
            if !allowlist.to.contains(to) {
                report.violations.push(AllowlistViolation {
                    kind: ViolationKind::Target,
                    address: *to,
                    source: ViolationSource::To,
                });
            }
        }
    }

    let simulation_failed = scan
        .simulation
        .as_ref()
        .map(|s| !s.success)
        .unwrap_or(false);
    if simulation_failed && touched.is_empty() && !allowlist.spenders.is_empty() {
        report.unknown_approval_spenders = true;
    }

    report
}

/// Allowlist violations can only tighten a decision.
pub fn apply_allowlist(
    decision: Decision,
    report: &AllowlistReport,
    policy: &RiskPolicy,
    interactive: bool,
) -> Decision {
    if report.is_clean() {
        return decision;
    }
    if decision != Decision::Forward {
        return decision;
    }
    if !interactive {
        return Decision::Block;
    }
    match policy.on_risk {
        RiskAction::Block => Decision::Block,
        RiskAction::Prompt => Decision::Prompt,
    }
}

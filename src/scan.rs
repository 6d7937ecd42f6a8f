//! Scan orchestration: normalize the request, run the analyzer, merge
//! calldata findings, simulate, apply the verdict, and shape the canonical
//! response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::analyzer::{AnalyzeError, AnalyzeOptions, Analyzer, AnalyzerDeps, ContractInfo};
use crate::calldata::{CalldataInput, analyze_calldata};
use crate::chains::{Chain, EvmAddress};
use crate::config::{AssayConfig, SimulationBackend};
use crate::findings::{Finding, Level, Recommendation, recommendation_from_findings};
use crate::providers::AnalyzeMode;
use crate::simulate::pipeline::SimulationJob;
use crate::simulate::{
    ApprovalChange, ApprovalScope, ApprovalStandard, BalanceSimulationResult, Confidence,
    ForkKey, ForkRegistry, SimProfile, apply_simulation_verdict, simulate,
};

/// Current scan response schema.
pub const SCHEMA_VERSION: u32 = 2;

/// Process-wide context: configuration plus every shared cache, created once
/// at startup and passed explicitly so tests can build fresh cores.
pub struct AssayCore {
    pub config: AssayConfig,
    pub analyzer: Analyzer,
    pub forks: ForkRegistry,
    pub offline: bool,
}

impl AssayCore {
    pub fn new(config: AssayConfig, offline: bool) -> Self {
        let deps = AnalyzerDeps::from_config(&config, offline);
        Self {
            config,
            analyzer: Analyzer::new(deps),
            forks: ForkRegistry::new(),
            offline,
        }
    }
}

/// What to scan: a bare address or an intercepted calldata payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calldata: Option<CalldataInput>,
}

/// Per-scan options.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub chain: Option<Chain>,
    pub mode: AnalyzeMode,
    pub request_id: Option<String>,
    pub parent: Option<CancellationToken>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

/// A finding as rendered in the response: the internal level plus the
/// wire severity scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFinding {
    pub severity: Recommendation,
    pub level: Level,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
}

impl From<Finding> for WireFinding {
    fn from(finding: Finding) -> Self {
        Self {
            severity: Recommendation::from_level(finding.level),
            level: finding.level,
            code: finding.code,
            message: finding.message,
            details: finding.details,
            refs: finding.refs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub input: ScanInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub recommendation: Recommendation,
    pub findings: Vec<WireFinding>,
    pub contract: ContractInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<BalanceSimulationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// The canonical scan response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub schema_version: u32,
    pub request_id: String,
    pub scan: ScanBody,
}

/// Scan outcome plus per-stage timings (`provider.*`, `proxy.scan`).
pub struct ScanOutcome {
    pub response: ScanResponse,
    pub timings: HashMap<String, u128>,
    pub queue_wait_ms: u128,
}

/// Run the full analysis-and-simulation scan.
#[tracing::instrument(skip_all)]
pub async fn scan_with_analysis(
    core: &AssayCore,
    input: ScanInput,
    options: ScanOptions,
) -> Result<ScanOutcome, ScanError> {
    let started = Instant::now();

    let chain = input
        .calldata
        .as_ref()
        .and_then(|c| c.chain)
        .or(options.chain)
        .unwrap_or(Chain::Ethereum);

    let target = input
        .address
        .or_else(|| input.calldata.as_ref().map(|c| c.to))
        .ok_or_else(|| ScanError::Validation("Missing scan input".to_string()))?;

    let analyze_options = AnalyzeOptions {
        mode: options.mode,
        offline: core.offline,
        parent: options.parent.clone(),
    };
    let analysis = core
        .analyzer
        .analyze(chain, target.0, &analyze_options)
        .await?;

    let mut findings = analysis.findings.clone();
    let mut recommendation = analysis.recommendation;
    let mut intent = None;
    let mut protocol = analysis.protocol.clone();

    // The address branch wins when both are present.
    let calldata = input.address.is_none().then_some(()).and(input.calldata.as_ref());
    let decoded = if let Some(calldata) = calldata {
        let calldata_analysis =
            analyze_calldata(calldata, chain, analysis.contract_abi.as_ref());
        findings.extend(calldata_analysis.findings);
        intent = calldata_analysis.intent;
        if protocol.is_none()
            && calldata.data.is_empty()
            && calldata.value.unwrap_or_default() > alloy_primitives::U256::ZERO
        {
            protocol = Some(format!("{} transfer", chain.native_symbol()));
        }
        calldata_analysis.decoded
    } else {
        None
    };
    recommendation = recommendation.max(recommendation_from_findings(&findings));

    let mut timings = analysis.timings.clone();
    let mut queue_wait_ms = 0u128;

    let simulation = if let Some(calldata) = calldata {
        if core.config.simulation.enabled {
            let profile = match options.mode {
                AnalyzeMode::Default => SimProfile::Full,
                AnalyzeMode::Wallet => SimProfile::WalletFast,
            };
            let (result, wait) = run_simulation(
                core,
                chain,
                calldata,
                decoded.as_ref(),
                profile,
            )
            .await;
            queue_wait_ms = wait;
            Some(result)
        } else {
            None
        }
    } else {
        None
    };

    if let Some(simulation) = &simulation {
        recommendation =
            recommendation.max(apply_simulation_verdict(chain, simulation, &mut findings));
    }

    let response = ScanResponse {
        schema_version: SCHEMA_VERSION,
        request_id: options
            .request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        scan: ScanBody {
            input,
            intent,
            recommendation,
            findings: findings.into_iter().map(WireFinding::from).collect(),
            contract: analysis.contract,
            simulation,
            protocol,
        },
    };
    timings.insert("proxy.scan".to_string(), started.elapsed().as_millis());
    Ok(ScanOutcome {
        response,
        timings,
        queue_wait_ms,
    })
}

async fn run_simulation(
    core: &AssayCore,
    chain: Chain,
    calldata: &CalldataInput,
    decoded: Option<&crate::calldata::DecodedCall>,
    profile: SimProfile,
) -> (BalanceSimulationResult, u128) {
    if core.config.simulation.backend == SimulationBackend::Heuristic {
        return (heuristic_simulation(calldata, decoded), 0);
    }

    let fork_url = core
        .config
        .simulation
        .rpc_url
        .as_ref()
        .map(|u| (**u).clone())
        .unwrap_or_else(|| {
            Url::parse("http://127.0.0.1:8545").expect("static URL is valid")
        });
    let key = ForkKey {
        chain,
        fork_url,
        fork_block: core.config.simulation.fork_block,
    };
    let instance = match core.forks.get_or_connect(key.clone()).await {
        Ok(instance) => instance,
        Err(err) => {
            core.forks.evict(&key);
            let mut result = BalanceSimulationResult::not_run();
            result.balances.confidence = Confidence::Low;
            result.approvals.confidence = Confidence::Low;
            result.notes.push(format!(
                "fork node unreachable at {}: {err}; install Foundry (anvil) or point \
                 simulation.rpcUrl at a running fork",
                key.fork_url
            ));
            return (result, 0);
        }
    };
    let job = SimulationJob {
        chain,
        input: calldata,
        decoded,
        profile,
    };
    let (result, wait) = simulate(&instance, job).await;
    (result, wait.as_millis())
}

/// Heuristic backend: no fork execution; approvals are derived from the
/// decoded calldata so the allowlist still sees spenders.
fn heuristic_simulation(
    calldata: &CalldataInput,
    decoded: Option<&crate::calldata::DecodedCall>,
) -> BalanceSimulationResult {
    let mut result = BalanceSimulationResult::not_run();
    result.success = true;
    result.balances.confidence = Confidence::Low;
    result.approvals.confidence = Confidence::Low;
    result
        .notes
        .push("heuristic backend: effects derived from calldata, not executed".to_string());
    if let Some(decoded) = decoded {
        if decoded.signature == "approve(address,uint256)" {
            let spender = decoded
                .arg("spender")
                .and_then(crate::calldata::DecodedValue::as_address);
            let amount = decoded
                .arg("amount")
                .and_then(crate::calldata::DecodedValue::as_uint);
            if let (Some(spender), Some(owner)) = (spender, calldata.from) {
                result.approvals.changes.push(ApprovalChange {
                    standard: ApprovalStandard::Erc20,
                    token: calldata.to,
                    owner,
                    spender: spender.into(),
                    amount,
                    previous_amount: None,
                    token_id: None,
                    scope: Some(ApprovalScope::Token),
                    approved: None,
                    previous_approved: None,
                    previous_spender: None,
                    symbol: None,
                    decimals: None,
                });
            }
        }
    }
    result
}

/// Short plain-text rendering used for recordings and transport errors.
pub fn render_summary(response: &ScanResponse) -> String {
    let scan = &response.scan;
    let mut out = String::new();
    out.push_str(&format!("recommendation: {}\n", scan.recommendation));
    if let Some(intent) = &scan.intent {
        out.push_str(&format!("intent: {intent}\n"));
    }
    if let Some(name) = &scan.contract.name {
        out.push_str(&format!(
            "contract: {name} ({}) on {}\n",
            scan.contract.address, scan.contract.chain
        ));
    }
    for finding in &scan.findings {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            finding.severity, finding.code, finding.message
        ));
    }
    if let Some(simulation) = &scan.simulation {
        out.push_str(&format!(
            "simulation: {}\n",
            if simulation.success { "ok" } else { "failed" }
        ));
        if let Some(reason) = &simulation.revert_reason {
            out.push_str(&format!("revert: {reason}\n"));
        }
        for change in &simulation.balances.changes {
            let direction = match change.direction {
                crate::simulate::Direction::In => "+",
                crate::simulate::Direction::Out => "-",
            };
            let symbol = change.symbol.clone().unwrap_or_else(|| {
                change
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "native".to_string())
            });
            let amount = change
                .amount
                .map(|a| a.to_string())
                .unwrap_or_else(|| "?".to_string());
            out.push_str(&format!("  {direction}{amount} {symbol}\n"));
        }
        for approval in &simulation.approvals.changes {
            out.push_str(&format!(
                "  approval: {} -> {} ({:?})\n",
                approval.token, approval.spender, approval.standard
            ));
        }
        for note in &simulation.notes {
            out.push_str(&format!("  note: {note}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_input_requires_a_target() {
        let input = ScanInput::default();
        assert!(input.address.is_none() && input.calldata.is_none());
    }

    #[test]
    fn response_serializes_schema_v2_camel_case() {
        let response = ScanResponse {
            schema_version: SCHEMA_VERSION,
            request_id: "c6cff1a0-9e4b-4fcb-a04e-9d1ff1b9a0a1".to_string(),
            scan: ScanBody {
                input: ScanInput {
                    address: Some(
                        "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984".parse().unwrap(),
                    ),
                    calldata: None,
                },
                intent: None,
                recommendation: Recommendation::Ok,
                findings: vec![WireFinding::from(Finding::new(
                    Level::Safe,
                    "VERIFIED",
                    "Contract source code is verified",
                ))],
                contract: ContractInfo {
                    address: "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984".parse().unwrap(),
                    chain: Chain::Ethereum,
                    name: Some("Uni".to_string()),
                    verified: true,
                    confidence: crate::analyzer::ContractConfidence::Medium,
                    is_proxy: false,
                    implementation: None,
                    beacon: None,
                    age_days: None,
                    tx_count: None,
                },
                simulation: None,
                protocol: None,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert!(json["requestId"].is_string());
        assert_eq!(json["scan"]["recommendation"], "ok");
        assert_eq!(json["scan"]["findings"][0]["severity"], "ok");
        assert_eq!(json["scan"]["findings"][0]["code"], "VERIFIED");
        assert_eq!(json["scan"]["contract"]["isProxy"], false);
        assert_eq!(
            json["scan"]["contract"]["address"],
            "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984"
        );
    }

    #[test]
    fn severity_mapping_follows_the_scale() {
        assert_eq!(
            WireFinding::from(Finding::new(Level::Info, "X", "x")).severity,
            Recommendation::Caution
        );
        assert_eq!(
            WireFinding::from(Finding::new(Level::Safe, "X", "x")).severity,
            Recommendation::Ok
        );
        assert_eq!(
            WireFinding::from(Finding::new(Level::Danger, "X", "x")).severity,
            Recommendation::Danger
        );
    }

    #[test]
    fn heuristic_backend_synthesizes_approvals() {
        use alloy_primitives::U256;
        use alloy_sol_types::{SolCall, sol};
        sol! { function approve(address spender, uint256 amount) returns (bool); }

        let calldata = CalldataInput {
            to: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".parse().unwrap(),
            from: Some("0x1111111111111111111111111111111111111111".parse().unwrap()),
            data: approveCall {
                spender: "0x000000000022d473030f116ddee9f6b43ac78ba3".parse().unwrap(),
                amount: U256::MAX,
            }
            .abi_encode()
            .into(),
            value: None,
            chain: Some(Chain::Ethereum),
            authorization_list: None,
        };
        let analysis = analyze_calldata(&calldata, Chain::Ethereum, None);
        let result = heuristic_simulation(&calldata, analysis.decoded.as_ref());
        assert!(result.success);
        assert_eq!(result.approvals.changes.len(), 1);
        assert_eq!(result.approvals.confidence, Confidence::Low);
    }
}

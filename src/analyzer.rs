//! The provider aggregator: fans adapters out under a shared time budget
//! with bounded concurrency, then folds their outcomes into findings, a
//! contract profile, and a recommendation.
//!
//! Provider failures never escape: a timeout or error becomes a recorded
//! step and degrades confidence instead. The only error this module raises
//! is a structurally invalid offline configuration.

use alloy_primitives::Address;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::budget::{RunOptions, StepOutcome, TimeBudget, run_with_timeout};
use crate::chains::{Chain, EvmAddress};
use crate::config::{AssayConfig, cache_dir};
use crate::findings::{
    Finding, Level, Recommendation, codes, recommendation_from_findings,
};
use crate::providers::{
    AnalyzeMode, AnalyzePolicy, DefillamaClient, EtherscanClient, ExplorerInfo, GoplusClient,
    PhishListClient, ProtocolMatch, ProviderBudget, ProviderError, ProviderId,
    ProviderRequestOptions, ProviderStep, ProxyInfo, RpcProbe, SourcifyClient, TokenSecurity,
    VerificationInfo,
};
use crate::simulate::BalanceSimulationResult;

static PHISHING_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?i)phish|scam").expect("static regex compiles"));

const MAIN_FANOUT_WIDTH: usize = 3;
const IMPL_FANOUT_WIDTH: usize = 2;
const NEW_CONTRACT_DAYS: u64 = 7;
const LOW_ACTIVITY_TXS: u64 = 100;
const HIGH_TAX_THRESHOLD: f64 = 0.10;

/// How firm the contract profile is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractConfidence {
    High,
    Medium,
    Low,
}

/// Aggregated facts about the scanned contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub address: EvmAddress,
    pub chain: Chain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub verified: bool,
    pub confidence: ContractConfidence,
    pub is_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_count: Option<u64>,
}

/// Analyzer output for one address.
#[derive(Debug)]
pub struct AnalysisResult {
    pub contract: ContractInfo,
    pub findings: Vec<Finding>,
    pub recommendation: Recommendation,
    pub protocol: Option<String>,
    pub protocol_match: Option<ProtocolMatch>,
    pub intent: Option<String>,
    pub simulation: Option<BalanceSimulationResult>,
    /// Verified ABI, when one source produced it; feeds the calldata decoder.
    pub contract_abi: Option<serde_json::Value>,
    /// Per-provider wall time, keyed `provider.<label>`, in milliseconds.
    pub timings: HashMap<String, u128>,
}

/// Analyzer options resolved by the caller.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub mode: AnalyzeMode,
    pub offline: bool,
    pub parent: Option<CancellationToken>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("Offline mode requires a configured RPC URL for chain {0}")]
    OfflineNoRpc(Chain),
}

/// Adapter handles the analyzer drives. Constructed once per core so tests
/// can instantiate fresh instances with scripted endpoints.
pub struct AnalyzerDeps {
    pub rpc: RpcProbe,
    pub sourcify: SourcifyClient,
    pub etherscan: EtherscanClient,
    pub labels: PhishListClient,
    pub defillama: DefillamaClient,
    pub goplus: GoplusClient,
    pub etherscan_keys: HashMap<Chain, String>,
}

impl AnalyzerDeps {
    pub fn from_config(config: &AssayConfig, offline: bool) -> Self {
        let http = reqwest::Client::new();
        let mut urls: HashMap<Chain, Url> = HashMap::new();
        for chain in Chain::ALL {
            if config.has_configured_rpc(chain) {
                urls.insert(chain, config.rpc_url(chain));
            } else if !offline {
                urls.insert(chain, config.rpc_url(chain));
            }
        }
        let etherscan_keys = Chain::ALL
            .into_iter()
            .filter_map(|chain| {
                config
                    .etherscan_key(chain)
                    .map(|key| (chain, key.to_string()))
            })
            .collect();
        Self {
            rpc: RpcProbe::new(urls),
            sourcify: SourcifyClient::new(http.clone()),
            etherscan: EtherscanClient::new(http.clone()),
            labels: PhishListClient::new(http.clone(), cache_dir()),
            defillama: DefillamaClient::new(http.clone()),
            goplus: GoplusClient::new(http),
            etherscan_keys,
        }
    }
}

/// The dependency-injected analyzer.
pub struct Analyzer {
    deps: AnalyzerDeps,
}

struct StepSet {
    sourcify: ProviderStep<VerificationInfo>,
    etherscan: ProviderStep<Option<ExplorerInfo>>,
    labels: ProviderStep<Option<String>>,
    proxy: ProviderStep<ProxyInfo>,
    defillama: ProviderStep<Option<ProtocolMatch>>,
    goplus: ProviderStep<Option<TokenSecurity>>,
    sourcify_impl: ProviderStep<VerificationInfo>,
    defillama_impl: ProviderStep<Option<ProtocolMatch>>,
}

impl Analyzer {
    pub fn new(deps: AnalyzerDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &AnalyzerDeps {
        &self.deps
    }

    /// Analyze one address on one chain.
    #[tracing::instrument(skip_all, fields(%chain, address = %EvmAddress(address)))]
    pub async fn analyze(
        &self,
        chain: Chain,
        address: Address,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisResult, AnalyzeError> {
        if options.offline && !self.deps.rpc.has_chain(chain) {
            return Err(AnalyzeError::OfflineNoRpc(chain));
        }

        let policy = AnalyzePolicy::for_mode(options.mode);
        let budget = match policy.total_budget {
            Some(total) => TimeBudget::new(total),
            None => TimeBudget::unbounded(),
        };
        let mut timings: HashMap<String, u128> = HashMap::new();

        // Contract probe first: an EOA target short-circuits the fan-out.
        let rpc_budget = policy.provider(ProviderId::Rpc);
        let probe_options = ProviderRequestOptions {
            timeout: Some(budget.clamp(rpc_budget.timeout)),
            cancel: options.parent.clone(),
            cache: policy.cache,
        };
        let is_contract = run_with_timeout(
            RunOptions {
                timeout: budget.clamp(rpc_budget.timeout),
                parent: options.parent.clone(),
            },
            |_cancel| async {
                self.deps
                    .rpc
                    .is_contract(chain, address, &probe_options)
                    .await
            },
        )
        .await;
        timings.insert(
            format!("provider.{}", ProviderId::Rpc.label()),
            is_contract.elapsed().as_millis(),
        );

        if let StepOutcome::Ok { value: false, .. } = is_contract {
            let findings = vec![Finding::new(
                Level::Warning,
                codes::LOW_ACTIVITY,
                "Target address has no deployed code",
            )];
            return Ok(AnalysisResult {
                contract: ContractInfo {
                    address: address.into(),
                    chain,
                    name: None,
                    verified: false,
                    confidence: ContractConfidence::Medium,
                    is_proxy: false,
                    implementation: None,
                    beacon: None,
                    age_days: None,
                    tx_count: None,
                },
                findings,
                recommendation: Recommendation::Caution,
                protocol: None,
                protocol_match: None,
                intent: None,
                simulation: None,
                contract_abi: None,
                timings,
            });
        }

        let steps = self
            .fan_out(chain, address, &policy, &budget, options, &mut timings)
            .await;
        Ok(self.assemble(chain, address, steps, &policy, timings))
    }

    async fn fan_out(
        &self,
        chain: Chain,
        address: Address,
        policy: &AnalyzePolicy,
        budget: &TimeBudget,
        options: &AnalyzeOptions,
        timings: &mut HashMap<String, u128>,
    ) -> StepSet {
        let semaphore = Arc::new(Semaphore::new(MAIN_FANOUT_WIDTH));
        let offline_skip = |id: ProviderId| {
            options
                .offline
                .then(|| format!("skipped (offline mode, {} disabled)", id.label()))
        };
        let api_key = self.deps.etherscan_keys.get(&chain).cloned();

        let sourcify = run_step(
            &semaphore,
            budget,
            policy,
            policy.provider(ProviderId::Sourcify),
            offline_skip(ProviderId::Sourcify),
            options.parent.clone(),
            |request| async move { self.deps.sourcify.lookup(chain, address, &request).await },
        );
        let labels = run_step(
            &semaphore,
            budget,
            policy,
            policy.provider(ProviderId::EtherscanLabels),
            offline_skip(ProviderId::EtherscanLabels),
            options.parent.clone(),
            |request| async move {
                self.deps
                    .labels
                    .lookup(chain, address, &request)
                    .await
                    .map_err(Arc::new)
            },
        );
        let etherscan_skip = offline_skip(ProviderId::Etherscan).or_else(|| {
            api_key
                .is_none()
                .then(|| "skipped (no explorer API key)".to_string())
        });
        let etherscan_key = api_key.clone().unwrap_or_default();
        let etherscan = run_step(
            &semaphore,
            budget,
            policy,
            policy.provider(ProviderId::Etherscan),
            etherscan_skip,
            options.parent.clone(),
            |request| {
                let key = etherscan_key.clone();
                async move {
                    self.deps
                        .etherscan
                        .lookup(chain, address, &key, &request)
                        .await
                        .map_err(Arc::new)
                }
            },
        );
        let proxy = run_step(
            &semaphore,
            budget,
            policy,
            policy.provider(ProviderId::Proxy),
            None,
            options.parent.clone(),
            |request| async move {
                self.deps
                    .rpc
                    .detect_proxy(chain, address, &request)
                    .await
                    .map_err(Arc::new)
            },
        );
        let defillama = run_step(
            &semaphore,
            budget,
            policy,
            policy.provider(ProviderId::Defillama),
            None,
            options.parent.clone(),
            |request| {
                let allow_network = !options.offline;
                async move {
                    self.deps
                        .defillama
                        .lookup(chain, address, allow_network, &request)
                        .await
                        .map_err(Arc::new)
                }
            },
        );
        let goplus = run_step(
            &semaphore,
            budget,
            policy,
            policy.provider(ProviderId::Goplus),
            offline_skip(ProviderId::Goplus),
            options.parent.clone(),
            |request| async move { self.deps.goplus.lookup(chain, address, &request).await },
        );

        let (sourcify, labels, etherscan, proxy, defillama, goplus) =
            tokio::join!(sourcify, labels, etherscan, proxy, defillama, goplus);

        record_timing(timings, ProviderId::Sourcify, &sourcify);
        record_timing(timings, ProviderId::EtherscanLabels, &labels);
        record_timing(timings, ProviderId::Etherscan, &etherscan);
        record_timing(timings, ProviderId::Proxy, &proxy);
        record_timing(timings, ProviderId::Defillama, &defillama);
        record_timing(timings, ProviderId::Goplus, &goplus);

        // Implementation follow-up, narrower fan-out.
        let implementation = proxy
            .0
            .value()
            .filter(|p| p.is_proxy)
            .and_then(|p| p.implementation)
            .map(|a| a.0);
        let (sourcify_impl, defillama_impl) = match implementation {
            Some(implementation) => {
                let follow_semaphore = Arc::new(Semaphore::new(IMPL_FANOUT_WIDTH));
                let main_protocol_missing =
                    !matches!(&defillama.0, ProviderStep::Ok(Some(_)));
                let sourcify_impl = run_step(
                    &follow_semaphore,
                    budget,
                    policy,
                    policy.provider(ProviderId::SourcifyImpl),
                    offline_skip(ProviderId::SourcifyImpl),
                    options.parent.clone(),
                    |request| async move {
                        self.deps.sourcify.lookup(chain, implementation, &request).await
                    },
                );
                let defillama_impl_skip = offline_skip(ProviderId::DefillamaImpl).or_else(|| {
                    (!main_protocol_missing)
                        .then(|| "skipped (protocol already matched)".to_string())
                });
                let defillama_impl = run_step(
                    &follow_semaphore,
                    budget,
                    policy,
                    policy.provider(ProviderId::DefillamaImpl),
                    defillama_impl_skip,
                    options.parent.clone(),
                    |request| {
                        let allow_network = !options.offline;
                        async move {
                            self.deps
                                .defillama
                                .lookup(chain, implementation, allow_network, &request)
                                .await
                                .map_err(Arc::new)
                        }
                    },
                );
                let (sourcify_impl, defillama_impl) = tokio::join!(sourcify_impl, defillama_impl);
                record_timing(timings, ProviderId::SourcifyImpl, &sourcify_impl);
                record_timing(timings, ProviderId::DefillamaImpl, &defillama_impl);
                (sourcify_impl.0, defillama_impl.0)
            }
            None => (
                ProviderStep::Skipped("skipped (not a proxy)".to_string()),
                ProviderStep::Skipped("skipped (not a proxy)".to_string()),
            ),
        };

        StepSet {
            sourcify: sourcify.0,
            etherscan: etherscan.0,
            labels: labels.0,
            proxy: proxy.0,
            defillama: defillama.0,
            goplus: goplus.0,
            sourcify_impl,
            defillama_impl,
        }
    }

    /// Deterministic findings assembly: fixed inspection order over the
    /// captured steps, so identical provider outputs yield identical
    /// findings regardless of completion order.
    fn assemble(
        &self,
        chain: Chain,
        address: Address,
        steps: StepSet,
        _policy: &AnalyzePolicy,
        timings: HashMap<String, u128>,
    ) -> AnalysisResult {
        let mut findings = Vec::new();

        let sourcify = steps.sourcify.value();
        let sourcify_impl = steps.sourcify_impl.value();
        let explorer = steps.etherscan.value().and_then(|e| e.as_ref());
        let proxy = steps.proxy.value();
        let is_proxy = proxy.map(|p| p.is_proxy).unwrap_or(false);

        let verified = sourcify.map(|s| s.verified).unwrap_or(false)
            || explorer.map(|e| e.verified).unwrap_or(false)
            || (is_proxy && sourcify_impl.map(|s| s.verified).unwrap_or(false));
        let verification_known = sourcify.map(|s| s.verification_known).unwrap_or(false)
            || explorer.is_some();

        if verified {
            findings.push(Finding::new(
                Level::Safe,
                codes::VERIFIED,
                "Contract source code is verified",
            ));
        } else if verification_known {
            findings.push(Finding::new(
                Level::Danger,
                codes::UNVERIFIED,
                "Contract source code is not verified",
            ));
        } else {
            findings.push(Finding::new(
                Level::Info,
                codes::UNKNOWN_SECURITY,
                "Verification status could not be determined",
            ));
        }

        let protocol_match = match (&steps.defillama, &steps.defillama_impl) {
            (ProviderStep::Ok(Some(m)), _) => Some(m.clone()),
            (_, ProviderStep::Ok(Some(m))) => Some(m.clone()),
            _ => None,
        };
        if let Some(protocol) = &protocol_match {
            findings.push(
                Finding::new(
                    Level::Safe,
                    codes::KNOWN_PROTOCOL,
                    format!("Address belongs to a known protocol: {}", protocol.name),
                )
                .with_details(serde_json::json!({ "protocol": protocol.name })),
            );
        }

        let phishing_label = steps
            .labels
            .value()
            .and_then(|l| l.as_deref())
            .filter(|label| PHISHING_LABEL.is_match(label));
        if let Some(label) = phishing_label {
            findings.push(
                Finding::new(
                    Level::Danger,
                    codes::KNOWN_PHISHING,
                    "Address is on a public phishing/hack list",
                )
                .with_details(serde_json::json!({ "label": label }))
                .with_refs(vec![format!(
                    "{}/address/{}",
                    chain.explorer_base(),
                    EvmAddress(address)
                )]),
            );
        }

        if let Some(proxy_info) = proxy.filter(|p| p.is_proxy) {
            findings.push(
                Finding::new(Level::Info, codes::PROXY, "Contract is a proxy")
                    .with_details(serde_json::to_value(proxy_info).unwrap_or_default()),
            );
            findings.push(Finding::new(
                Level::Warning,
                codes::UPGRADEABLE,
                "Contract logic can be upgraded by its admin",
            ));
        }

        let age_days = explorer.and_then(|e| e.age_days);
        if let Some(age) = age_days {
            if age < NEW_CONTRACT_DAYS {
                findings.push(Finding::new(
                    Level::Warning,
                    codes::NEW_CONTRACT,
                    format!("Contract is only {age} day(s) old"),
                ));
            }
        }
        let tx_count = explorer.and_then(|e| e.tx_count);
        if let Some(count) = tx_count {
            if count < LOW_ACTIVITY_TXS {
                findings.push(Finding::new(
                    Level::Info,
                    codes::LOW_ACTIVITY,
                    format!("Contract has seen only {count} transaction(s)"),
                ));
            }
        }

        if let Some(Some(security)) = steps.goplus.value() {
            push_token_security_findings(&mut findings, security);
        }

        let has_api_key = self.deps.etherscan_keys.contains_key(&chain);
        let confidence = if verified && has_api_key {
            ContractConfidence::High
        } else if verified || !verification_known {
            ContractConfidence::Medium
        } else {
            ContractConfidence::Low
        };

        let name = resolve_name(
            address,
            is_proxy,
            sourcify
                .and_then(|s| s.name.clone())
                .or_else(|| explorer.and_then(|e| e.name.clone())),
            sourcify_impl.and_then(|s| s.name.clone()),
            protocol_match.as_ref().map(|p| p.name.clone()),
        );

        let recommendation = recommendation_from_findings(&findings);
        let contract_abi = sourcify
            .and_then(|s| s.abi.clone())
            .or_else(|| sourcify_impl.and_then(|s| s.abi.clone()));

        AnalysisResult {
            contract: ContractInfo {
                address: address.into(),
                chain,
                name,
                verified,
                confidence,
                is_proxy,
                implementation: proxy.and_then(|p| p.implementation),
                beacon: proxy.and_then(|p| p.beacon),
                age_days,
                tx_count,
            },
            findings,
            recommendation,
            protocol: protocol_match.as_ref().map(|p| p.name.clone()),
            protocol_match,
            intent: None,
            simulation: None,
            contract_abi,
            timings,
        }
    }
}

fn push_token_security_findings(findings: &mut Vec<Finding>, security: &TokenSecurity) {
    if security.is_honeypot {
        findings.push(Finding::new(
            Level::Danger,
            codes::HONEYPOT,
            "Token is flagged as a honeypot",
        ));
    }
    if security.is_mintable {
        findings.push(Finding::new(
            Level::Danger,
            codes::HIDDEN_MINT,
            "Token supply can be minted at will",
        ));
    }
    if security.selfdestruct {
        findings.push(Finding::new(
            Level::Danger,
            codes::SELFDESTRUCT,
            "Token contract can self-destruct",
        ));
    }
    if security.owner_can_change_balance {
        findings.push(Finding::new(
            Level::Danger,
            codes::OWNER_DRAIN,
            "Token owner can modify holder balances",
        ));
    }
    if security.is_blacklisted {
        findings.push(Finding::new(
            Level::Warning,
            codes::BLACKLIST,
            "Token supports blacklisting holders",
        ));
    }
    if security.max_tax() > HIGH_TAX_THRESHOLD {
        findings.push(
            Finding::new(
                Level::Warning,
                codes::HIGH_TAX,
                format!(
                    "Token charges a {:.0}% transfer tax",
                    security.max_tax() * 100.0
                ),
            )
            .with_details(serde_json::json!({
                "buyTax": security.buy_tax,
                "sellTax": security.sell_tax,
            })),
        );
    }
}

/// One display name out of the proxy/implementation/protocol candidates.
fn resolve_name(
    address: Address,
    is_proxy: bool,
    proxy_name: Option<String>,
    implementation_name: Option<String>,
    protocol_name: Option<String>,
) -> Option<String> {
    if is_proxy {
        match (protocol_name, implementation_name) {
            (Some(protocol), Some(implementation)) => {
                if implementation
                    .to_lowercase()
                    .contains(&protocol.to_lowercase())
                {
                    Some(implementation)
                } else {
                    Some(format!("{protocol} {implementation}"))
                }
            }
            (Some(protocol), None) => Some(protocol),
            (None, Some(implementation)) => Some(implementation),
            (None, None) => proxy_name,
        }
    } else {
        proxy_name
            .or(protocol_name)
            .or_else(|| Some(EvmAddress(address).to_string()))
    }
}

fn record_timing<T>(
    timings: &mut HashMap<String, u128>,
    id: ProviderId,
    step: &(ProviderStep<T>, Duration),
) {
    timings.insert(format!("provider.{}", id.label()), step.1.as_millis());
}

/// Drive one provider through the timeout runner under the fan-out
/// semaphore, producing exactly one step.
async fn run_step<T, F, Fut>(
    semaphore: &Semaphore,
    budget: &TimeBudget,
    policy: &AnalyzePolicy,
    provider: ProviderBudget,
    skip_reason: Option<String>,
    parent: Option<CancellationToken>,
    make: F,
) -> (ProviderStep<T>, Duration)
where
    F: FnOnce(ProviderRequestOptions) -> Fut,
    Fut: Future<Output = Result<T, Arc<ProviderError>>>,
{
    if let Some(reason) = skip_reason {
        return (ProviderStep::Skipped(reason), Duration::ZERO);
    }
    if !provider.enabled {
        return (
            ProviderStep::Skipped("skipped (disabled by policy)".to_string()),
            Duration::ZERO,
        );
    }
    let permit = semaphore.acquire().await;
    if permit.is_err() {
        return (
            ProviderStep::Skipped("skipped (fan-out closed)".to_string()),
            Duration::ZERO,
        );
    }
    let timeout = budget.clamp(provider.timeout);
    if timeout.is_zero() {
        return (
            ProviderStep::Skipped("skipped (budget exhausted)".to_string()),
            Duration::ZERO,
        );
    }
    let cache = policy.cache;
    let outcome = run_with_timeout(
        RunOptions {
            timeout,
            parent,
        },
        |cancel| {
            make(ProviderRequestOptions {
                timeout: Some(timeout),
                cancel: Some(cancel),
                cache,
            })
        },
    )
    .await;
    let elapsed = outcome.elapsed();
    let step = match outcome {
        StepOutcome::Ok { value, .. } => ProviderStep::Ok(value),
        StepOutcome::Timeout { .. } => ProviderStep::Timeout,
        StepOutcome::Aborted { .. } => ProviderStep::Skipped("skipped (aborted)".to_string()),
        StepOutcome::Error { error, .. } => ProviderStep::Error(error),
    };
    (step, elapsed)
}

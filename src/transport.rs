//! Embeddable client transport: the proxy's decision logic as an in-process
//! interception point, for wallets that would rather wrap their upstream
//! transport than run a local HTTP server.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::calldata::typed_data::analyze_typed_data;
use crate::chains::Chain;
use crate::policy::{Decision, RiskPolicy, apply_allowlist, decide_risk_action, evaluate_allowlist};
use crate::proxy::raw_tx::decode_raw_transaction;
use crate::scan::{AssayCore, ScanError, ScanInput, ScanOptions, ScanResponse, render_summary, scan_with_analysis};

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportBlockReason {
    Risky,
    SimulationFailed,
    AnalysisError,
    InvalidParams,
}

/// Typed refusal raised instead of calling the upstream.
#[derive(Debug, thiserror::Error)]
#[error("Request blocked ({reason:?})")]
pub struct AssayTransportError {
    pub reason: TransportBlockReason,
    pub analyze_response: Option<ScanResponse>,
    pub rendered_summary: Option<String>,
}

/// The wrapped upstream.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    type Error: Send + Sync + 'static;

    async fn request(&self, method: &str, params: Value) -> Result<Value, Self::Error>;
}

/// Errors surfaced by [`AssayTransport::request`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError<U> {
    #[error(transparent)]
    Blocked(#[from] AssayTransportError),
    #[error("upstream transport error")]
    Upstream(#[source] U),
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub uid: Option<String>,
}

/// Client-side interceptor sharing the proxy's scan-and-decide path.
pub struct AssayTransport<U> {
    core: Arc<AssayCore>,
    upstream: U,
    chain: Chain,
    policy: RiskPolicy,
    on_risk: Option<Box<dyn Fn(&ScanResponse) + Send + Sync>>,
}

impl<U: UpstreamTransport> AssayTransport<U> {
    pub fn new(core: Arc<AssayCore>, upstream: U, chain: Chain) -> Self {
        Self {
            core,
            upstream,
            chain,
            policy: RiskPolicy::default(),
            on_risk: None,
        }
    }

    pub fn with_policy(mut self, policy: RiskPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Callback invoked with the scan response before a risky request is
    /// refused.
    pub fn with_on_risk<F>(mut self, on_risk: F) -> Self
    where
        F: Fn(&ScanResponse) + Send + Sync + 'static,
    {
        self.on_risk = Some(Box::new(on_risk));
        self
    }

    /// Intercept one request: interceptable methods are scanned and either
    /// refused with a typed error or delegated upstream; everything else
    /// passes straight through.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        context: RequestContext,
    ) -> Result<Value, TransportError<U::Error>> {
        match method {
            "eth_sendTransaction" | "eth_sendRawTransaction" => {
                self.gate_send(method, &params, context).await?;
            }
            "eth_signTypedData_v4" => {
                self.gate_typed_data(&params)?;
            }
            _ => {}
        }
        self.upstream
            .request(method, params)
            .await
            .map_err(TransportError::Upstream)
    }

    async fn gate_send(
        &self,
        method: &str,
        params: &Value,
        context: RequestContext,
    ) -> Result<(), AssayTransportError> {
        let calldata = if method == "eth_sendRawTransaction" {
            let raw = params.get(0).and_then(Value::as_str).unwrap_or_default();
            decode_raw_transaction(raw).map_err(|_| AssayTransportError {
                reason: TransportBlockReason::InvalidParams,
                analyze_response: None,
                rendered_summary: None,
            })?
        } else {
            crate::proxy::parse_send_transaction_params(params).map_err(|_| {
                AssayTransportError {
                    reason: TransportBlockReason::InvalidParams,
                    analyze_response: None,
                    rendered_summary: None,
                }
            })?
        };

        let scan = scan_with_analysis(
            &self.core,
            ScanInput {
                address: None,
                calldata: Some(calldata),
            },
            ScanOptions {
                chain: Some(self.chain),
                mode: crate::providers::AnalyzeMode::Wallet,
                request_id: context.uid,
                parent: None,
            },
        )
        .await;

        let outcome = match scan {
            Ok(outcome) => outcome,
            Err(ScanError::Validation(_)) => {
                return Err(AssayTransportError {
                    reason: TransportBlockReason::InvalidParams,
                    analyze_response: None,
                    rendered_summary: None,
                });
            }
            Err(_) => {
                return Err(AssayTransportError {
                    reason: TransportBlockReason::AnalysisError,
                    analyze_response: None,
                    rendered_summary: None,
                });
            }
        };
        let response = outcome.response;

        let allowlist = self.core.config.allowlist.clone().unwrap_or_default();
        let report = evaluate_allowlist(&allowlist, &response);
        let simulation_success = response
            .scan
            .simulation
            .as_ref()
            .map(|s| s.success)
            .unwrap_or(true);
        let decision = decide_risk_action(
            response.scan.recommendation,
            simulation_success,
            &self.policy,
            false,
        );
        let decision = apply_allowlist(decision, &report, &self.policy, false);

        if decision == Decision::Forward {
            return Ok(());
        }
        if let Some(on_risk) = &self.on_risk {
            on_risk(&response);
        }
        let rendered = render_summary(&response);
        Err(AssayTransportError {
            reason: if simulation_success {
                TransportBlockReason::Risky
            } else {
                TransportBlockReason::SimulationFailed
            },
            analyze_response: Some(response),
            rendered_summary: Some(rendered),
        })
    }

    fn gate_typed_data(&self, params: &Value) -> Result<(), AssayTransportError> {
        let typed = match params.get(1) {
            Some(Value::String(raw)) => {
                serde_json::from_str::<Value>(raw).map_err(|_| AssayTransportError {
                    reason: TransportBlockReason::InvalidParams,
                    analyze_response: None,
                    rendered_summary: None,
                })?
            }
            Some(value @ Value::Object(_)) => value.clone(),
            _ => {
                return Err(AssayTransportError {
                    reason: TransportBlockReason::InvalidParams,
                    analyze_response: None,
                    rendered_summary: None,
                });
            }
        };
        let analysis = analyze_typed_data(&typed);
        let decision = decide_risk_action(analysis.recommendation, true, &self.policy, false);
        if decision == Decision::Forward {
            return Ok(());
        }
        let mut rendered = format!(
            "typed data: {}\nrecommendation: {}\n",
            analysis.primary_type, analysis.recommendation
        );
        for finding in &analysis.findings {
            rendered.push_str(&format!("{}: {}\n", finding.code, finding.message));
        }
        Err(AssayTransportError {
            reason: TransportBlockReason::Risky,
            analyze_response: None,
            rendered_summary: Some(rendered),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoUpstream;

    #[async_trait]
    impl UpstreamTransport for EchoUpstream {
        type Error = std::convert::Infallible;

        async fn request(&self, method: &str, _params: Value) -> Result<Value, Self::Error> {
            Ok(json!({ "echo": method }))
        }
    }

    fn core() -> Arc<AssayCore> {
        let config: crate::config::AssayConfig = serde_json::from_str("{}").unwrap();
        Arc::new(AssayCore::new(config, false))
    }

    #[tokio::test]
    async fn non_interceptable_methods_pass_through() {
        let transport = AssayTransport::new(core(), EchoUpstream, Chain::Ethereum);
        let out = transport
            .request("eth_blockNumber", json!([]), RequestContext::default())
            .await
            .unwrap();
        assert_eq!(out["echo"], "eth_blockNumber");
    }

    #[tokio::test]
    async fn risky_typed_data_is_refused_with_summary() {
        let transport = AssayTransport::new(core(), EchoUpstream, Chain::Ethereum);
        let typed = json!({
            "types": {
                "Permit": [
                    { "name": "owner", "type": "address" },
                    { "name": "spender", "type": "address" },
                    { "name": "value", "type": "uint256" },
                    { "name": "deadline", "type": "uint256" }
                ]
            },
            "primaryType": "Permit",
            "domain": { "verifyingContract": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48" },
            "message": {
                "spender": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "value": "115792089237316195423570985008687907853269984665640564039457584007913129639935",
                "deadline": "99999999999"
            }
        });
        let err = transport
            .request(
                "eth_signTypedData_v4",
                json!(["0x1111111111111111111111111111111111111111", typed]),
                RequestContext::default(),
            )
            .await
            .unwrap_err();
        match err {
            TransportError::Blocked(blocked) => {
                assert_eq!(blocked.reason, TransportBlockReason::Risky);
                assert!(blocked.rendered_summary.unwrap().contains("PERMIT"));
            }
            TransportError::Upstream(_) => panic!("expected a block"),
        }
    }

    #[tokio::test]
    async fn malformed_send_params_are_invalid() {
        let transport = AssayTransport::new(core(), EchoUpstream, Chain::Ethereum);
        let err = transport
            .request("eth_sendTransaction", json!([{}]), RequestContext::default())
            .await
            .unwrap_err();
        match err {
            TransportError::Blocked(blocked) => {
                assert_eq!(blocked.reason, TransportBlockReason::InvalidParams);
            }
            TransportError::Upstream(_) => panic!("expected a block"),
        }
    }
}

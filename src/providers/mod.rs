//! Data-source adapters feeding the analyzer.
//!
//! Every adapter exposes a uniform request shape ([`ProviderRequestOptions`])
//! and produces exactly one [`ProviderStep`] per call when driven through the
//! timeout runner. Adapters surface network errors as errors on timed paths
//! so the runner can classify them; swallowing them there would misread a
//! transient outage as "unverified" or "no data".

use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod defillama;
pub mod etherscan;
pub mod goplus;
pub mod phish_list;
pub mod rpc;
pub mod sourcify;

pub use defillama::{DefillamaClient, ProtocolMatch};
pub use etherscan::{EtherscanClient, ExplorerInfo};
pub use goplus::{GoplusClient, TokenSecurity};
pub use phish_list::PhishListClient;
pub use rpc::{ProxyInfo, ProxyKind, RpcProbe};
pub use sourcify::{SourcifyClient, VerificationInfo};

/// Logical provider identifiers, in the stable order findings are assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderId {
    Rpc,
    Sourcify,
    Etherscan,
    EtherscanLabels,
    Proxy,
    Defillama,
    Goplus,
    SourcifyImpl,
    DefillamaImpl,
}

impl ProviderId {
    pub const ALL: [ProviderId; 9] = [
        ProviderId::Rpc,
        ProviderId::Sourcify,
        ProviderId::Etherscan,
        ProviderId::EtherscanLabels,
        ProviderId::Proxy,
        ProviderId::Defillama,
        ProviderId::Goplus,
        ProviderId::SourcifyImpl,
        ProviderId::DefillamaImpl,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProviderId::Rpc => "rpc",
            ProviderId::Sourcify => "sourcify",
            ProviderId::Etherscan => "etherscan",
            ProviderId::EtherscanLabels => "etherscanLabels",
            ProviderId::Proxy => "proxy",
            ProviderId::Defillama => "defillama",
            ProviderId::Goplus => "goplus",
            ProviderId::SourcifyImpl => "sourcifyImpl",
            ProviderId::DefillamaImpl => "defillamaImpl",
        }
    }
}

/// Enablement and deadline for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderBudget {
    pub enabled: bool,
    pub timeout: Duration,
}

impl ProviderBudget {
    fn on(millis: u64) -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(millis),
        }
    }

    fn off() -> Self {
        Self {
            enabled: false,
            timeout: Duration::ZERO,
        }
    }
}

/// Analyzer execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzeMode {
    #[default]
    Default,
    Wallet,
}

/// Per-provider budgets plus an optional total wall-clock cap.
#[derive(Debug, Clone)]
pub struct AnalyzePolicy {
    pub total_budget: Option<Duration>,
    pub providers: HashMap<ProviderId, ProviderBudget>,
    /// Wallet mode disables adapter caches so transient failures are never
    /// remembered across scans.
    pub cache: bool,
}

impl AnalyzePolicy {
    /// The relaxed default profile: generous deadlines, no total cap.
    pub fn default_mode() -> Self {
        let providers = HashMap::from([
            (ProviderId::Rpc, ProviderBudget::on(5_000)),
            (ProviderId::Sourcify, ProviderBudget::on(6_000)),
            (ProviderId::Etherscan, ProviderBudget::on(8_000)),
            (ProviderId::EtherscanLabels, ProviderBudget::on(8_000)),
            (ProviderId::Proxy, ProviderBudget::on(5_000)),
            (ProviderId::Defillama, ProviderBudget::on(6_000)),
            (ProviderId::Goplus, ProviderBudget::on(6_000)),
            (ProviderId::SourcifyImpl, ProviderBudget::on(6_000)),
            (ProviderId::DefillamaImpl, ProviderBudget::on(6_000)),
        ]);
        Self {
            total_budget: None,
            providers,
            cache: true,
        }
    }

    /// The pre-sign wallet profile: a tight total budget, fewer providers,
    /// caching off.
    pub fn wallet_mode() -> Self {
        let providers = HashMap::from([
            (ProviderId::Rpc, ProviderBudget::on(1_200)),
            (ProviderId::Sourcify, ProviderBudget::on(1_200)),
            (ProviderId::Etherscan, ProviderBudget::off()),
            (ProviderId::EtherscanLabels, ProviderBudget::on(800)),
            (ProviderId::Proxy, ProviderBudget::on(1_000)),
            (ProviderId::Defillama, ProviderBudget::on(800)),
            (ProviderId::Goplus, ProviderBudget::on(1_000)),
            (ProviderId::SourcifyImpl, ProviderBudget::on(1_000)),
            (ProviderId::DefillamaImpl, ProviderBudget::off()),
        ]);
        Self {
            total_budget: Some(Duration::from_millis(3_000)),
            providers,
            cache: false,
        }
    }

    pub fn for_mode(mode: AnalyzeMode) -> Self {
        match mode {
            AnalyzeMode::Default => Self::default_mode(),
            AnalyzeMode::Wallet => Self::wallet_mode(),
        }
    }

    pub fn provider(&self, id: ProviderId) -> ProviderBudget {
        self.providers
            .get(&id)
            .copied()
            .unwrap_or_else(ProviderBudget::off)
    }
}

/// Outcome of one provider call. Every call that was attempted maps to
/// exactly one of these.
#[derive(Debug, Clone)]
pub enum ProviderStep<T> {
    Skipped(String),
    Ok(T),
    Timeout,
    Error(Arc<ProviderError>),
}

impl<T> ProviderStep<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            ProviderStep::Ok(value) => Some(value),
            _ => None,
        }
    }
}

/// Options every adapter accepts.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequestOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    /// `false` bypasses all in-module memoization.
    pub cache: bool,
}

impl ProviderRequestOptions {
    pub fn cached() -> Self {
        Self {
            timeout: None,
            cancel: None,
            cache: true,
        }
    }

    /// Whether the caller installed a deadline; adapters propagate errors on
    /// such paths instead of degrading to "no data".
    pub fn timed(&self) -> bool {
        self.timeout.is_some()
    }
}

/// Errors raised by provider adapters.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Failed to decode provider response: {0}")]
    Decode(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Request aborted")]
    Aborted,
    #[error("No RPC URL configured for chain {0}")]
    NoRpcUrl(crate::chains::Chain),
}

/// Issue an HTTP request with a deadline and a parent-signal-aware abort.
///
/// The timeout timer is owned by the select below and dropped on every exit
/// path; a cancelled parent aborts the in-flight request rather than leaving
/// it running in the background.
pub async fn fetch_with_timeout(
    request: RequestBuilder,
    timeout: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<reqwest::Response, ProviderError> {
    let request = match timeout {
        Some(t) => request.timeout(t),
        None => request,
    };
    let send = request.send();
    match cancel {
        Some(token) => {
            tokio::select! {
                response = send => Ok(response?),
                _ = token.cancelled() => Err(ProviderError::Aborted),
            }
        }
        None => Ok(send.await?),
    }
}

/// Accept a 2xx response or map it to [`ProviderError::Status`].
pub fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ProviderError::Status(response.status().as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_mode_is_tighter_than_default() {
        let default_mode = AnalyzePolicy::default_mode();
        let wallet = AnalyzePolicy::wallet_mode();
        assert!(default_mode.total_budget.is_none());
        assert_eq!(wallet.total_budget, Some(Duration::from_millis(3_000)));
        assert!(default_mode.cache);
        assert!(!wallet.cache);
        assert!(default_mode.provider(ProviderId::Etherscan).enabled);
        assert!(!wallet.provider(ProviderId::Etherscan).enabled);
        for id in ProviderId::ALL {
            let d = default_mode.provider(id);
            let w = wallet.provider(id);
            if w.enabled {
                assert!(w.timeout <= d.timeout, "{id:?} must not loosen in wallet mode");
            }
        }
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_aborted() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let client = reqwest::Client::new();
        let request = client.get(server.uri());
        let err = fetch_with_timeout(request, Some(Duration::from_secs(60)), Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Aborted));
    }
}

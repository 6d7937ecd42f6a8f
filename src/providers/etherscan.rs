//! Explorer (Etherscan-compatible) adapter: verification status, contract
//! name, age and activity.

use alloy_primitives::Address;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use super::{ProviderError, ProviderRequestOptions, expect_success, fetch_with_timeout};
use crate::chains::{Chain, EvmAddress, hex_lower};

const DEFAULT_BASE: &str = "https://api.etherscan.io/v2/api";

/// Explorer-derived facts about a contract.
#[derive(Debug, Clone, Default)]
pub struct ExplorerInfo {
    pub verified: bool,
    pub name: Option<String>,
    pub source: Option<String>,
    pub age_days: Option<u64>,
    pub tx_count: Option<u64>,
    pub creator: Option<EvmAddress>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SourceCodeEntry {
    #[serde(default)]
    contract_name: String,
    #[serde(default)]
    source_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxListEntry {
    #[serde(default)]
    time_stamp: String,
    #[serde(default)]
    from: String,
}

/// Adapter for the multi-chain explorer API. Requires an API key per chain;
/// chains without a key are skipped by the analyzer policy.
pub struct EtherscanClient {
    http: reqwest::Client,
    base: Url,
}

impl EtherscanClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, Url::parse(DEFAULT_BASE).expect("default base URL is valid"))
    }

    pub fn with_base(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    /// Fetch source-code status, first-transaction timestamp and recent
    /// transaction count. On a timed path failures propagate; on the
    /// pre-budget path they degrade to `None`.
    pub async fn lookup(
        &self,
        chain: Chain,
        address: Address,
        api_key: &str,
        options: &ProviderRequestOptions,
    ) -> Result<Option<ExplorerInfo>, ProviderError> {
        match self.lookup_inner(chain, address, api_key, options).await {
            Ok(info) => Ok(Some(info)),
            Err(err) if options.timed() => Err(err),
            Err(err) => {
                tracing::debug!(%chain, error = %err, "explorer lookup degraded to no-data");
                Ok(None)
            }
        }
    }

    async fn lookup_inner(
        &self,
        chain: Chain,
        address: Address,
        api_key: &str,
        options: &ProviderRequestOptions,
    ) -> Result<ExplorerInfo, ProviderError> {
        let mut info = ExplorerInfo::default();

        let source: ApiEnvelope<Vec<SourceCodeEntry>> = self
            .query(
                chain,
                &[
                    ("module", "contract"),
                    ("action", "getsourcecode"),
                    ("address", &hex_lower(&address)),
                    ("apikey", api_key),
                ],
                options,
            )
            .await?;
        if let Some(entry) = source.result.as_ref().and_then(|r| r.first()) {
            info.verified = !entry.source_code.is_empty();
            if !entry.contract_name.is_empty() {
                info.name = Some(entry.contract_name.clone());
            }
            if info.verified {
                info.source = Some(entry.source_code.clone());
            }
        }

        let first_tx: ApiEnvelope<Vec<TxListEntry>> = self
            .query(
                chain,
                &[
                    ("module", "account"),
                    ("action", "txlist"),
                    ("address", &hex_lower(&address)),
                    ("startblock", "0"),
                    ("page", "1"),
                    ("offset", "1"),
                    ("sort", "asc"),
                    ("apikey", api_key),
                ],
                options,
            )
            .await?;
        if let Some(entry) = first_tx.result.as_ref().and_then(|r| r.first()) {
            if let Ok(created) = entry.time_stamp.parse::<u64>() {
                info.age_days = Some(age_days_since(created));
            }
            info.creator = entry.from.parse().ok();
        }

        let recent: ApiEnvelope<Vec<TxListEntry>> = self
            .query(
                chain,
                &[
                    ("module", "account"),
                    ("action", "txlist"),
                    ("address", &hex_lower(&address)),
                    ("page", "1"),
                    ("offset", "100"),
                    ("sort", "desc"),
                    ("apikey", api_key),
                ],
                options,
            )
            .await?;
        // Capped at 100: enough to separate low-activity contracts from the rest.
        info.tx_count = recent.result.map(|r| r.len() as u64);
        if first_tx.status != "1" && recent.status != "1" {
            tracing::debug!(%chain, "explorer returned no transaction data");
        }

        Ok(info)
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        chain: Chain,
        params: &[(&str, &str)],
        options: &ProviderRequestOptions,
    ) -> Result<T, ProviderError> {
        let chain_id = chain.chain_id().to_string();
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("chainid", &chain_id);
        for (k, v) in params {
            url.query_pairs_mut().append_pair(k, v);
        }
        let response =
            fetch_with_timeout(self.http.get(url), options.timeout, options.cancel.as_ref())
                .await?;
        let response = expect_success(response)?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

fn age_days_since(created_unix: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    now.saturating_sub(created_unix) / 86_400
}

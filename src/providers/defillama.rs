//! Protocol identification: a static table of well-known deployments plus
//! the global protocol list (1-hour memoization) as a network fallback.

use alloy_primitives::{Address, address};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

use super::{ProviderError, ProviderRequestOptions, expect_success, fetch_with_timeout};
use crate::chains::Chain;

const DEFAULT_BASE: &str = "https://api.llama.fi/protocols";
const LIST_TTL: Duration = Duration::from_secs(60 * 60);

/// A protocol attribution for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMatch {
    pub name: String,
    pub category: Option<String>,
}

static WELL_KNOWN: Lazy<HashMap<(Chain, Address), &'static str>> = Lazy::new(|| {
    use Chain::*;
    HashMap::from([
        (
            (Ethereum, address!("0x000000000022d473030f116ddee9f6b43ac78ba3")),
            "Permit2",
        ),
        (
            (Ethereum, address!("0x3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad")),
            "Uniswap",
        ),
        (
            (Ethereum, address!("0xe592427a0aece92de3edee1f18e0157c05861564")),
            "Uniswap",
        ),
        (
            (Ethereum, address!("0x7a250d5630b4cf539739df2c5dacb4c659f2488d")),
            "Uniswap",
        ),
        (
            (Ethereum, address!("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984")),
            "Uniswap",
        ),
        (
            (Ethereum, address!("0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2")),
            "Aave",
        ),
        (
            (Ethereum, address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")),
            "Circle USDC",
        ),
        (
            (Ethereum, address!("0xdac17f958d2ee523a2206206994597c13d831ec7")),
            "Tether USD",
        ),
        (
            (Base, address!("0x000000000022d473030f116ddee9f6b43ac78ba3")),
            "Permit2",
        ),
        (
            (Base, address!("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913")),
            "Circle USDC",
        ),
        (
            (Arbitrum, address!("0x000000000022d473030f116ddee9f6b43ac78ba3")),
            "Permit2",
        ),
        (
            (Optimism, address!("0x000000000022d473030f116ddee9f6b43ac78ba3")),
            "Permit2",
        ),
        (
            (Polygon, address!("0x000000000022d473030f116ddee9f6b43ac78ba3")),
            "Permit2",
        ),
    ])
});

#[derive(Debug, Clone, Deserialize)]
struct ProtocolEntry {
    name: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Protocol matcher. The static table needs no network; the list fetch is
/// memoized for an hour and last-writer-wins on refresh.
pub struct DefillamaClient {
    http: reqwest::Client,
    base: Url,
    list: Mutex<Option<(Instant, Arc<Vec<ProtocolEntry>>)>>,
}

impl DefillamaClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, Url::parse(DEFAULT_BASE).expect("default base URL is valid"))
    }

    pub fn with_base(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            list: Mutex::new(None),
        }
    }

    /// Attribute `address` to a protocol. `allow_network = false` restricts
    /// the lookup to the static table.
    pub async fn lookup(
        &self,
        chain: Chain,
        address: Address,
        allow_network: bool,
        options: &ProviderRequestOptions,
    ) -> Result<Option<ProtocolMatch>, ProviderError> {
        if let Some(name) = WELL_KNOWN.get(&(chain, address)) {
            return Ok(Some(ProtocolMatch {
                name: (*name).to_string(),
                category: None,
            }));
        }
        if !allow_network {
            return Ok(None);
        }
        let list = self.protocol_list(options).await?;
        Ok(match_in_list(&list, chain, address))
    }

    async fn protocol_list(
        &self,
        options: &ProviderRequestOptions,
    ) -> Result<Arc<Vec<ProtocolEntry>>, ProviderError> {
        let mut guard = self.list.lock().await;
        if options.cache {
            if let Some((fetched_at, list)) = guard.as_ref() {
                if fetched_at.elapsed() < LIST_TTL {
                    return Ok(Arc::clone(list));
                }
            }
        }
        let response = fetch_with_timeout(
            self.http.get(self.base.clone()),
            options.timeout,
            options.cancel.as_ref(),
        )
        .await?;
        let entries: Vec<ProtocolEntry> = expect_success(response)?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let list = Arc::new(entries);
        if options.cache {
            *guard = Some((Instant::now(), Arc::clone(&list)));
        }
        Ok(list)
    }
}

/// Protocol list addresses are optionally chain-prefixed (`base:0x…`); an
/// unprefixed address defaults to ethereum.
fn match_in_list(
    list: &[ProtocolEntry],
    chain: Chain,
    address: Address,
) -> Option<ProtocolMatch> {
    for entry in list {
        let Some(raw) = entry.address.as_deref() else {
            continue;
        };
        let (entry_chain, entry_address) = match raw.split_once(':') {
            Some((prefix, rest)) => (Chain::from_str(prefix).ok(), rest),
            None => (Some(Chain::Ethereum), raw),
        };
        if entry_chain != Some(chain) {
            continue;
        }
        if Address::from_str(entry_address.trim()) == Ok(address) {
            return Some(ProtocolMatch {
                name: entry.name.clone(),
                category: entry.category.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn static_table_needs_no_network() {
        let client = DefillamaClient::with_base(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/never").unwrap(),
        );
        let hit = client
            .lookup(
                Chain::Ethereum,
                address!("0x000000000022d473030f116ddee9f6b43ac78ba3"),
                false,
                &ProviderRequestOptions::cached(),
            )
            .await
            .unwrap();
        assert_eq!(hit.unwrap().name, "Permit2");
    }

    #[tokio::test]
    async fn offline_miss_returns_none_without_network() {
        let client = DefillamaClient::with_base(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/never").unwrap(),
        );
        let miss = client
            .lookup(
                Chain::Ethereum,
                Address::ZERO,
                false,
                &ProviderRequestOptions::cached(),
            )
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn list_match_honors_chain_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "BaseSwap", "address": "base:0x41653c7d61609d856f29355e404f310ec4142cfb", "category": "Dexes" },
                { "name": "MainnetThing", "address": "0x41653c7d61609d856f29355e404f310ec4142cfb" }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        let client = DefillamaClient::with_base(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
        );
        let addr: Address = "0x41653c7d61609d856f29355e404f310ec4142cfb"
            .parse()
            .unwrap();
        let options = ProviderRequestOptions::cached();

        let base_hit = client
            .lookup(Chain::Base, addr, true, &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(base_hit.name, "BaseSwap");
        assert_eq!(base_hit.category.as_deref(), Some("Dexes"));

        // Unprefixed entries default to ethereum; list is served from memo.
        let eth_hit = client
            .lookup(Chain::Ethereum, addr, true, &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eth_hit.name, "MainnetThing");

        let opt_miss = client
            .lookup(Chain::Optimism, addr, true, &options)
            .await
            .unwrap();
        assert!(opt_miss.is_none());
    }
}

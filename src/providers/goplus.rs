//! Token-security lookups (GoPlus-compatible API).

use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{ProviderError, ProviderRequestOptions, fetch_with_timeout};
use crate::chains::{Chain, hex_lower};
use crate::util::MemoMap;

const DEFAULT_BASE: &str = "https://api.gopluslabs.io/api/v1/token_security";
const MAX_ATTEMPTS: u32 = 3;

/// Token-level risk flags.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenSecurity {
    pub is_honeypot: bool,
    pub is_mintable: bool,
    pub selfdestruct: bool,
    pub owner_can_change_balance: bool,
    pub is_blacklisted: bool,
    pub buy_tax: f64,
    pub sell_tax: f64,
}

impl TokenSecurity {
    pub fn max_tax(&self) -> f64 {
        self.buy_tax.max(self.sell_tax)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    result: Option<Value>,
}

/// Adapter with retry/backoff on throttling and per-(chain, address)
/// promise memoization so concurrent scans share one network call.
pub struct GoplusClient {
    http: reqwest::Client,
    base: Url,
    cache: MemoMap<(Chain, Address), Option<TokenSecurity>, ProviderError>,
}

impl GoplusClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, Url::parse(DEFAULT_BASE).expect("default base URL is valid"))
    }

    pub fn with_base(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            cache: MemoMap::new(),
        }
    }

    pub async fn lookup(
        &self,
        chain: Chain,
        address: Address,
        options: &ProviderRequestOptions,
    ) -> Result<Option<TokenSecurity>, Arc<ProviderError>> {
        let http = self.http.clone();
        let base = self.base.clone();
        let timeout = options.timeout;
        let cancel = options.cancel.clone();
        self.cache
            .get_or_fetch((chain, address), !options.cache, move || async move {
                fetch_token_security(http, base, chain, address, timeout, cancel).await
            })
            .await
    }
}

async fn fetch_token_security(
    http: reqwest::Client,
    base: Url,
    chain: Chain,
    address: Address,
    timeout: Option<Duration>,
    cancel: Option<tokio_util::sync::CancellationToken>,
) -> Result<Option<TokenSecurity>, ProviderError> {
    let address_hex = hex_lower(&address);
    let mut url = base;
    url.path_segments_mut()
        .map_err(|_| ProviderError::Decode("base URL cannot be a base".to_string()))?
        .push(&chain.chain_id().to_string());
    url.query_pairs_mut()
        .append_pair("contract_addresses", &address_hex);

    let mut attempt = 0;
    loop {
        let response =
            fetch_with_timeout(http.get(url.clone()), timeout, cancel.as_ref()).await?;
        let status = response.status().as_u16();
        if status == 429 || status >= 500 {
            attempt += 1;
            if attempt >= MAX_ATTEMPTS {
                return Err(ProviderError::Status(status));
            }
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt + 1))).await;
            continue;
        }
        if status >= 400 {
            return Err(ProviderError::Status(status));
        }
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let Some(result) = body.result else {
            return Ok(None);
        };
        return Ok(result.get(&address_hex).map(parse_record));
    }
}

fn parse_record(record: &Value) -> TokenSecurity {
    TokenSecurity {
        is_honeypot: flag(record, "is_honeypot"),
        is_mintable: flag(record, "is_mintable"),
        selfdestruct: flag(record, "selfdestruct"),
        owner_can_change_balance: flag(record, "owner_change_balance"),
        is_blacklisted: flag(record, "is_blacklisted"),
        buy_tax: fraction(record, "buy_tax"),
        sell_tax: fraction(record, "sell_tax"),
    }
}

// The API reports booleans as "0"/"1" strings and taxes as decimal strings.
fn flag(record: &Value, key: &str) -> bool {
    match record.get(key) {
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

fn fraction(record: &Value, key: &str) -> f64 {
    match record.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

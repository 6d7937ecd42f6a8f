//! Contract verification lookups against a Sourcify-compatible service.

use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::{ProviderError, ProviderRequestOptions, expect_success, fetch_with_timeout};
use crate::chains::Chain;
use crate::util::MemoMap;

const DEFAULT_BASE: &str = "https://sourcify.dev/server";

/// What the verification service knows about a contract.
#[derive(Debug, Clone, Default)]
pub struct VerificationInfo {
    pub verified: bool,
    /// Whether verification status is known at all. A 404 is a definitive
    /// "not verified"; a network failure leaves this false upstream.
    pub verification_known: bool,
    pub name: Option<String>,
    pub abi: Option<Value>,
    pub source: Option<String>,
}

impl VerificationInfo {
    fn known_unverified() -> Self {
        Self {
            verified: false,
            verification_known: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<VerifiedFile>,
}

#[derive(Debug, Deserialize)]
struct VerifiedFile {
    name: String,
    #[serde(default)]
    path: String,
    content: String,
}

/// Sourcify adapter with per-(chain, address) promise memoization. Concurrent
/// lookups of the same contract share one request; failures evict so the
/// next scan retries.
pub struct SourcifyClient {
    http: reqwest::Client,
    base: Url,
    cache: MemoMap<(u64, Address), VerificationInfo, ProviderError>,
}

impl SourcifyClient {
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

    /// Look up verification data for `address` on `chain`.
    ///
    /// A 404 means "known unverified". Any other failure is re-thrown so the
    /// timeout runner classifies it; the caller must not read it as
    /// "unverified".
    pub async fn lookup(
        &self,
        chain: Chain,
        address: Address,
        options: &ProviderRequestOptions,
    ) -> Result<VerificationInfo, Arc<ProviderError>> {
        let key = (chain.verification_chain_id(), address);
        let http = self.http.clone();
        let base = self.base.clone();
        let timeout = options.timeout;
        let cancel = options.cancel.clone();
        self.cache
            .get_or_fetch(key, !options.cache, move || async move {
                fetch_verification(http, base, key.0, address, timeout, cancel).await
            })
            .await
    }
}

async fn fetch_verification(
    http: reqwest::Client,
    base: Url,
    chain_id: u64,
    address: Address,
    timeout: Option<std::time::Duration>,
    cancel: Option<tokio_util::sync::CancellationToken>,
) -> Result<VerificationInfo, ProviderError> {
    let url = base
        .join(&format!(
            "files/any/{chain_id}/{}",
            crate::chains::hex_lower(&address)
        ))
        .map_err(|e| ProviderError::Decode(e.to_string()))?;
    let response = fetch_with_timeout(http.get(url), timeout, cancel.as_ref()).await?;
    if response.status().as_u16() == 404 {
        return Ok(VerificationInfo::known_unverified());
    }
    let response = expect_success(response)?;
    let files: FilesResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))?;
    Ok(parse_files(files))
}

fn parse_files(files: FilesResponse) -> VerificationInfo {
    let mut info = VerificationInfo {
        verified: true,
        verification_known: true,
        ..VerificationInfo::default()
    };
    for file in &files.files {
        if file.name == "metadata.json" {
            if let Ok(metadata) = serde_json::from_str::<Value>(&file.content) {
                info.abi = metadata
                    .pointer("/output/abi")
                    .filter(|abi| abi.is_array())
                    .cloned();
                info.name = metadata
                    .pointer("/settings/compilationTarget")
                    .and_then(Value::as_object)
                    .and_then(|targets| targets.values().next())
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        } else if info.source.is_none()
            && file.name.ends_with(".sol")
            && !file.path.contains("node_modules")
        {
            info.source = Some(file.content.clone());
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn files_body() -> serde_json::Value {
        serde_json::json!({
            "status": "full",
            "files": [
                {
                    "name": "metadata.json",
                    "path": "contracts/full_match/1/0x/metadata.json",
                    "content": serde_json::json!({
                        "output": { "abi": [{ "type": "function", "name": "totalSupply", "inputs": [], "outputs": [] }] },
                        "settings": { "compilationTarget": { "contracts/Uni.sol": "Uni" } }
                    }).to_string()
                },
                {
                    "name": "Uni.sol",
                    "path": "contracts/full_match/1/0x/sources/Uni.sol",
                    "content": "contract Uni {}"
                }
            ]
        })
    }

    #[tokio::test]
    async fn verified_contract_parses_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/files/any/1/0x[0-9a-f]{40}$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = SourcifyClient::with_base(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
        );
        let address: Address = "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984"
            .parse()
            .unwrap();
        let options = ProviderRequestOptions::cached();

        let info = client
            .lookup(Chain::Ethereum, address, &options)
            .await
            .unwrap();
        assert!(info.verified);
        assert!(info.verification_known);
        assert_eq!(info.name.as_deref(), Some("Uni"));
        assert!(info.abi.is_some());
        assert_eq!(info.source.as_deref(), Some("contract Uni {}"));

        // Second lookup is served from the memo; the mock expects one call.
        let again = client
            .lookup(Chain::Ethereum, address, &options)
            .await
            .unwrap();
        assert!(again.verified);
    }

    #[tokio::test]
    async fn not_found_is_known_unverified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SourcifyClient::with_base(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
        );
        let address = Address::ZERO;
        let info = client
            .lookup(Chain::Ethereum, address, &ProviderRequestOptions::cached())
            .await
            .unwrap();
        assert!(!info.verified);
        assert!(info.verification_known);
    }

    #[tokio::test]
    async fn server_errors_propagate_and_do_not_poison() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SourcifyClient::with_base(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
        );
        let options = ProviderRequestOptions {
            timeout: Some(std::time::Duration::from_secs(2)),
            ..ProviderRequestOptions::cached()
        };
        let err = client
            .lookup(Chain::Ethereum, Address::ZERO, &options)
            .await
            .unwrap_err();
        assert!(matches!(*err, ProviderError::Status(500)));
    }
}

//! On-chain probes over plain JSON-RPC: contract detection and proxy layout.

use alloy_network::Ethereum;
use alloy_primitives::{Address, B256, Bytes, U256, b256};
use alloy_provider::{Provider, RootProvider};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use super::{ProviderError, ProviderRequestOptions};
use crate::chains::{Chain, EvmAddress};

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`
const EIP1967_IMPLEMENTATION_SLOT: B256 =
    b256!("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");
/// `bytes32(uint256(keccak256("eip1967.proxy.beacon")) - 1)`
const EIP1967_BEACON_SLOT: B256 =
    b256!("0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50");
/// ERC-1822 `keccak256("PROXIABLE")`
const UUPS_IMPLEMENTATION_SLOT: B256 =
    b256!("0xc5f16f0fcc639fa48a6947836d9850f504798523bf8c9a3a87d5876cf622bcf7");

const MINIMAL_PROXY_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
const MINIMAL_PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Proxy layout family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Eip1967,
    Uups,
    Beacon,
    Minimal,
    Unknown,
}

/// Result of the proxy probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    pub is_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_type: Option<ProxyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<EvmAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon: Option<EvmAddress>,
}

/// Read-only RPC access, one provider per chain, constructed lazily.
pub struct RpcProbe {
    urls: HashMap<Chain, Url>,
    providers: DashMap<Chain, Arc<RootProvider<Ethereum>>>,
}

impl RpcProbe {
    pub fn new(urls: HashMap<Chain, Url>) -> Self {
        Self {
            urls,
            providers: DashMap::new(),
        }
    }

    /// The provider for a chain. Errors when the chain has no URL at all,
    /// which only happens for chains deliberately stripped from the map
    /// (offline mode).
    pub fn provider(&self, chain: Chain) -> Result<Arc<RootProvider<Ethereum>>, ProviderError> {
        if let Some(existing) = self.providers.get(&chain) {
            return Ok(Arc::clone(&existing));
        }
        let url = self
            .urls
            .get(&chain)
            .cloned()
            .ok_or(ProviderError::NoRpcUrl(chain))?;
        let provider = Arc::new(RootProvider::<Ethereum>::new_http(url));
        self.providers.insert(chain, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn has_chain(&self, chain: Chain) -> bool {
        self.urls.contains_key(&chain)
    }

    /// `eth_getCode` probe: true iff deployed code is present.
    pub async fn is_contract(
        &self,
        chain: Chain,
        address: Address,
        _options: &ProviderRequestOptions,
    ) -> Result<bool, ProviderError> {
        let code = self.get_code(chain, address).await?;
        Ok(!code.is_empty())
    }

    pub async fn get_code(&self, chain: Chain, address: Address) -> Result<Bytes, ProviderError> {
        let provider = self.provider(chain)?;
        provider
            .get_code_at(address)
            .await
            .map_err(|e| ProviderError::Rpc(e.to_string()))
    }

    /// Probe the standard proxy storage slots and the minimal-proxy bytecode
    /// pattern; the first hit wins.
    pub async fn detect_proxy(
        &self,
        chain: Chain,
        address: Address,
        _options: &ProviderRequestOptions,
    ) -> Result<ProxyInfo, ProviderError> {
        let provider = self.provider(chain)?;

        let implementation = self.read_address_slot(&provider, address, EIP1967_IMPLEMENTATION_SLOT).await?;
        if let Some(implementation) = implementation {
            return Ok(ProxyInfo {
                is_proxy: true,
                proxy_type: Some(ProxyKind::Eip1967),
                implementation: Some(implementation.into()),
                beacon: None,
            });
        }

        let beacon = self.read_address_slot(&provider, address, EIP1967_BEACON_SLOT).await?;
        if let Some(beacon) = beacon {
            return Ok(ProxyInfo {
                is_proxy: true,
                proxy_type: Some(ProxyKind::Beacon),
                implementation: None,
                beacon: Some(beacon.into()),
            });
        }

        let uups = self.read_address_slot(&provider, address, UUPS_IMPLEMENTATION_SLOT).await?;
        if let Some(implementation) = uups {
            return Ok(ProxyInfo {
                is_proxy: true,
                proxy_type: Some(ProxyKind::Uups),
                implementation: Some(implementation.into()),
                beacon: None,
            });
        }

        let code = self.get_code(chain, address).await?;
        if let Some(implementation) = minimal_proxy_target(&code) {
            return Ok(ProxyInfo {
                is_proxy: true,
                proxy_type: Some(ProxyKind::Minimal),
                implementation: Some(implementation.into()),
                beacon: None,
            });
        }

        Ok(ProxyInfo::default())
    }

    async fn read_address_slot(
        &self,
        provider: &RootProvider<Ethereum>,
        address: Address,
        slot: B256,
    ) -> Result<Option<Address>, ProviderError> {
        let value: U256 = provider
            .get_storage_at(address, slot.into())
            .await
            .map_err(|e| ProviderError::Rpc(e.to_string()))?;
        if value.is_zero() {
            return Ok(None);
        }
        Ok(Some(Address::from_word(B256::from(value))))
    }
}

/// Extract the delegate target of an EIP-1167 minimal proxy, if the runtime
/// code matches the canonical pattern.
fn minimal_proxy_target(code: &[u8]) -> Option<Address> {
    if code.len() != 45 {
        return None;
    }
    if code[..10] != MINIMAL_PROXY_PREFIX || code[30..] != MINIMAL_PROXY_SUFFIX {
        return None;
    }
    Some(Address::from_slice(&code[10..30]))
}

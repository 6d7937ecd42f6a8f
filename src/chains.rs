//! Supported chains and their static metadata.
//!
//! Each [`Chain`] carries the constants the rest of the gate needs: numeric
//! chain id, a default public RPC endpoint, the explorer API base, the
//! verification-service chain id, the wrapped-native token, and the per-chain
//! set of well-known spenders used by the drainer heuristics.

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A chain supported by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
    Optimism,
    Polygon,
}

/// Static descriptor of a token the simulator always watches on a chain.
#[derive(Debug, Clone, Copy)]
pub struct WrappedNative {
    pub address: Address,
    pub symbol: &'static str,
    pub decimals: u8,
}

/// Canonical token-allowance router. Deployed at the same address on every
/// supported chain.
pub const PERMIT2: Address = address!("0x000000000022d473030f116ddee9f6b43ac78ba3");

const UNIVERSAL_ROUTER: Address = address!("0x3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad");
const ONEINCH_V5: Address = address!("0x1111111254eeb25477b68fb85ed929f73a960582");
const ZEROX_EXCHANGE_PROXY: Address = address!("0xdef1c0ded9bec7f1a1670819833240f027b25eff");
const SEAPORT_1_5: Address = address!("0x00000000000000adc04c56bf30ac9d3c0aaf14dc");

static SPENDERS_COMMON: &[Address] = &[
    PERMIT2,
    UNIVERSAL_ROUTER,
    ONEINCH_V5,
    ZEROX_EXCHANGE_PROXY,
    SEAPORT_1_5,
];

impl Chain {
    pub const ALL: [Chain; 5] = [
        Chain::Ethereum,
        Chain::Base,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Polygon,
    ];

    /// Numeric EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Base => 8453,
            Chain::Arbitrum => 42161,
            Chain::Optimism => 10,
            Chain::Polygon => 137,
        }
    }

    /// Resolve a chain from its numeric chain id.
    pub fn from_chain_id(id: u64) -> Option<Self> {
        Chain::ALL.into_iter().find(|c| c.chain_id() == id)
    }

    /// Public RPC endpoint used when no URL is configured.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://eth.llamarpc.com",
            Chain::Base => "https://mainnet.base.org",
            Chain::Arbitrum => "https://arb1.arbitrum.io/rpc",
            Chain::Optimism => "https://mainnet.optimism.io",
            Chain::Polygon => "https://polygon-rpc.com",
        }
    }

    /// Explorer web origin, used for human-facing reference links.
    pub fn explorer_base(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://etherscan.io",
            Chain::Base => "https://basescan.org",
            Chain::Arbitrum => "https://arbiscan.io",
            Chain::Optimism => "https://optimistic.etherscan.io",
            Chain::Polygon => "https://polygonscan.com",
        }
    }

    /// Chain id understood by the verification service. Matches the EIP-155
    /// id on every currently supported chain.
    pub fn verification_chain_id(&self) -> u64 {
        self.chain_id()
    }

    /// The wrapped-native token the simulator always includes in its
    /// balance-candidate set.
    pub fn wrapped_native(&self) -> WrappedNative {
        match self {
            Chain::Ethereum => WrappedNative {
                address: address!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                symbol: "WETH",
                decimals: 18,
            },
            Chain::Base => WrappedNative {
                address: address!("0x4200000000000000000000000000000000000006"),
                symbol: "WETH",
                decimals: 18,
            },
            Chain::Arbitrum => WrappedNative {
                address: address!("0x82af49447d8a07e3bd95bd0d56f35241523fbab1"),
                symbol: "WETH",
                decimals: 18,
            },
            Chain::Optimism => WrappedNative {
                address: address!("0x4200000000000000000000000000000000000006"),
                symbol: "WETH",
                decimals: 18,
            },
            Chain::Polygon => WrappedNative {
                address: address!("0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270"),
                symbol: "WPOL",
                decimals: 18,
            },
        }
    }

    /// Ticker of the native asset.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Polygon => "POL",
            _ => "ETH",
        }
    }

    /// Routers and allowance managers that are not treated as drainers when
    /// they receive broad approvals.
    pub fn known_spenders(&self) -> &'static [Address] {
        SPENDERS_COMMON
    }

    pub fn is_known_spender(&self, address: &Address) -> bool {
        self.known_spenders().contains(address)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Polygon => "polygon",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown chain: {0}")]
pub struct UnknownChain(pub String);

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" => Ok(Chain::Ethereum),
            "base" => Ok(Chain::Base),
            "arbitrum" => Ok(Chain::Arbitrum),
            "optimism" => Ok(Chain::Optimism),
            "polygon" => Ok(Chain::Polygon),
            other => Err(UnknownChain(other.to_string())),
        }
    }
}

/// Render an address as lowercase 40-hex with a `0x` prefix. The wire format
/// never uses EIP-55 checksumming.
pub fn hex_lower(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// An address in wire form: parsed leniently, always rendered lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvmAddress(pub Address);

impl EvmAddress {
    pub fn inner(&self) -> Address {
        self.0
    }
}

impl From<Address> for EvmAddress {
    fn from(value: Address) -> Self {
        Self(value)
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_lower(&self.0))
    }
}

impl FromStr for EvmAddress {
    type Err = alloy_primitives::hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s.trim()).map(Self)
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_round_trip() {
        for chain in Chain::ALL {
            assert_eq!(Chain::from_chain_id(chain.chain_id()), Some(chain));
        }
        assert_eq!(Chain::from_chain_id(5), None);
    }

    #[test]
    fn parses_chain_names() {
        assert_eq!("ethereum".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("Base".parse::<Chain>().unwrap(), Chain::Base);
        assert!("goerli".parse::<Chain>().is_err());
    }

    #[test]
    fn permit2_is_a_known_spender_everywhere() {
        for chain in Chain::ALL {
            assert!(chain.is_known_spender(&PERMIT2));
        }
    }

    #[test]
    fn addresses_render_lowercase() {
        let addr: EvmAddress = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
            .parse()
            .unwrap();
        assert_eq!(
            addr.to_string(),
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2\"");
    }
}

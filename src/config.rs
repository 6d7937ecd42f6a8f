//! Configuration for the assay gate.
//!
//! A single JSON file with camelCase keys:
//!
//! ```json
//! {
//!   "rpcUrls": { "ethereum": "$ETH_RPC_URL" },
//!   "etherscanKeys": { "ethereum": "KEY" },
//!   "simulation": { "enabled": true, "backend": "anvil", "rpcUrl": "http://127.0.0.1:8545" },
//!   "allowlist": { "spenders": ["0x000000000022d473030f116ddee9f6b43ac78ba3"] }
//! }
//! ```
//!
//! Discovery order: `ASSAY_CONFIG` env var, then `./assay.config.json`, then
//! `~/.config/assay/config.json`. A missing file yields the defaults.
//! String values may reference environment variables as `$VAR` or `${VAR}`;
//! they are resolved during deserialization.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::chains::{Chain, EvmAddress};

/// Environment variable overriding the cache root.
pub const ENV_CACHE_DIR: &str = "ASSAY_CACHE_DIR";
/// Environment variable pointing at an explicit config file.
pub const ENV_CONFIG: &str = "ASSAY_CONFIG";

const LOCAL_CONFIG: &str = "assay.config.json";

/// A value that may be given literally or as a `$VAR` / `${VAR}` environment
/// reference, resolved at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if let Some(inner) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(inner.to_string())
        } else if let Some(name) = s.strip_prefix('$') {
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        value
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Which simulation backend executes intercepted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationBackend {
    #[default]
    Anvil,
    Heuristic,
}

/// Settings for the forked-node simulation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default = "simulation_defaults::enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: SimulationBackend,
    /// JSON-RPC endpoint of the forking node. Defaults to the conventional
    /// local anvil endpoint when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<LiteralOrEnv<Url>>,
    /// Pin the fork to a block. Unset means the node's own head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_block: Option<u64>,
    /// Path to the fork node binary; informational, the gate never spawns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anvil_path: Option<PathBuf>,
}

mod simulation_defaults {
    pub fn enabled() -> bool {
        true
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: simulation_defaults::enabled(),
            backend: SimulationBackend::default(),
            rpc_url: None,
            fork_block: None,
            anvil_path: None,
        }
    }
}

/// Addresses the operator has pre-approved. When present, touched spenders
/// and targets outside these sets raise allowlist violations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<EvmAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spenders: Vec<EvmAddress>,
}

impl AllowlistConfig {
    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.spenders.is_empty()
    }
}

/// Root configuration object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssayConfig {
    #[serde(default)]
    pub rpc_urls: HashMap<Chain, LiteralOrEnv<Url>>,
    #[serde(default)]
    pub etherscan_keys: HashMap<Chain, LiteralOrEnv<String>>,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub allowlist: Option<AllowlistConfig>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl AssayConfig {
    /// Load configuration, resolving the file path as `explicit` >
    /// `$ASSAY_CONFIG` > `./assay.config.json` > `~/.config/assay/config.json`.
    /// Missing files at the discovery paths fall back to defaults; an
    /// explicitly named file that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Self::load_from_path(Path::new(&path));
        }
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load_from_path(local);
        }
        let user = user_config_path();
        if user.exists() {
            return Self::load_from_path(&user);
        }
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let config: AssayConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// RPC URL for a chain: configured value, else the chain's public default.
    pub fn rpc_url(&self, chain: Chain) -> Url {
        match self.rpc_urls.get(&chain) {
            Some(url) => (**url).clone(),
            None => Url::parse(chain.default_rpc_url()).expect("default RPC URLs are valid"),
        }
    }

    /// Whether a URL for this chain was configured explicitly (offline mode
    /// refuses to run against the public defaults).
    pub fn has_configured_rpc(&self, chain: Chain) -> bool {
        self.rpc_urls.contains_key(&chain)
    }

    pub fn etherscan_key(&self, chain: Chain) -> Option<&str> {
        self.etherscan_keys.get(&chain).map(|k| k.as_str())
    }
}

/// Cache root: `$ASSAY_CACHE_DIR`, else `~/.config/assay/cache`.
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
        return PathBuf::from(dir);
    }
    user_config_dir().join("cache")
}

fn user_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".config").join("assay")
}

fn user_config_path() -> PathBuf {
    user_config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"{
            "rpcUrls": { "ethereum": "https://example.invalid/rpc" },
            "etherscanKeys": { "base": "KEY123" },
            "simulation": { "enabled": false, "backend": "heuristic", "forkBlock": 123 },
            "allowlist": { "spenders": ["0x000000000022d473030f116ddee9f6b43ac78ba3"] }
        }"#;
        let config: AssayConfig = serde_json::from_str(raw).unwrap();
        assert!(config.has_configured_rpc(Chain::Ethereum));
        assert_eq!(config.etherscan_key(Chain::Base), Some("KEY123"));
        assert!(!config.simulation.enabled);
        assert_eq!(config.simulation.backend, SimulationBackend::Heuristic);
        assert_eq!(config.simulation.fork_block, Some(123));
        assert_eq!(config.allowlist.unwrap().spenders.len(), 1);
    }

    #[test]
    fn defaults_when_sections_missing() {
        let config: AssayConfig = serde_json::from_str("{}").unwrap();
        assert!(config.simulation.enabled);
        assert_eq!(config.simulation.backend, SimulationBackend::Anvil);
        assert!(config.allowlist.is_none());
        assert_eq!(
            config.rpc_url(Chain::Ethereum).as_str(),
            "https://eth.llamarpc.com/"
        );
        assert!(!config.has_configured_rpc(Chain::Ethereum));
    }

    #[test]
    fn env_reference_resolves() {
        // Safety: test-local variable name, no concurrent readers.
        unsafe { std::env::set_var("ASSAY_TEST_RPC", "https://node.invalid/") };
        let raw = r#"{ "rpcUrls": { "ethereum": "$ASSAY_TEST_RPC" } }"#;
        let config: AssayConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(
            config.rpc_url(Chain::Ethereum).as_str(),
            "https://node.invalid/"
        );
    }

    #[test]
    fn missing_env_reference_is_an_error() {
        let raw = r#"{ "rpcUrls": { "ethereum": "$ASSAY_TEST_RPC_DOES_NOT_EXIST" } }"#;
        assert!(serde_json::from_str::<AssayConfig>(raw).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = r#"{ "rpcUrl": "https://node.invalid/" }"#;
        assert!(serde_json::from_str::<AssayConfig>(raw).is_err());
    }
}

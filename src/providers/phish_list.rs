//! Phishing/hack label list with a 24-hour on-disk cache.
//!
//! The explorer's label export is two HTTP hops (an export-link JSON, then
//! the CSV itself), so the list is cached per chain id both in memory and on
//! disk. Cache states:
//!
//! - **warm**: in-memory set younger than the TTL, returned directly;
//! - **stale**: disk set older than the TTL, returned immediately while a
//!   background refresh with a compressed timeout replaces it on success;
//! - **cold**: no usable disk file, fetched inline.
//!
//! A torn or unparseable disk file is treated as cold, never as an empty
//! list, and transient fetch failures never replace a populated set.

use alloy_primitives::Address;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use super::{ProviderError, ProviderRequestOptions, expect_success, fetch_with_timeout};
use crate::chains::Chain;

const DEFAULT_BASE: &str = "https://api.etherscan.io/v2/labels/export";
const TTL: Duration = Duration::from_secs(24 * 60 * 60);
const REFRESH_TIMEOUT_MAX: Duration = Duration::from_secs(2);
const REFRESH_TIMEOUT_MIN: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize, Deserialize)]
struct DiskCache {
    fetched_at: u64,
    addresses: Vec<String>,
}

#[derive(Clone)]
struct MemEntry {
    fetched_at: SystemTime,
    addresses: Arc<HashSet<Address>>,
}

#[derive(Debug, Deserialize)]
struct ExportLink {
    url: String,
}

/// Phish/hack label lookups backed by the cached export.
pub struct PhishListClient {
    http: reqwest::Client,
    base: Url,
    cache_dir: PathBuf,
    mem: Arc<DashMap<u64, MemEntry>>,
}

impl PhishListClient {
    pub fn new(http: reqwest::Client, cache_dir: PathBuf) -> Self {
        Self::with_base(
            http,
            Url::parse(DEFAULT_BASE).expect("default base URL is valid"),
            cache_dir,
        )
    }

    pub fn with_base(http: reqwest::Client, base: Url, cache_dir: PathBuf) -> Self {
        Self {
            http,
            base,
            cache_dir,
            mem: Arc::new(DashMap::new()),
        }
    }

    /// Label for `address` if it appears on the chain's phish/hack list.
    pub async fn lookup(
        &self,
        chain: Chain,
        address: Address,
        options: &ProviderRequestOptions,
    ) -> Result<Option<String>, ProviderError> {
        let set = self.current_set(chain, options).await?;
        Ok(set
            .contains(&address)
            .then(|| "phishing/hack report".to_string()))
    }

    async fn current_set(
        &self,
        chain: Chain,
        options: &ProviderRequestOptions,
    ) -> Result<Arc<HashSet<Address>>, ProviderError> {
        let chain_id = chain.chain_id();

        if options.cache {
            if let Some(entry) = self.mem.get(&chain_id) {
                if entry.fetched_at.elapsed().unwrap_or(TTL) < TTL {
                    return Ok(Arc::clone(&entry.addresses));
                }
            }
        }

        if let Some((fetched_at, set)) = read_disk(&self.cache_path(chain_id)) {
            let set = Arc::new(set);
            let fresh = fetched_at.elapsed().unwrap_or(TTL) < TTL;
            if options.cache {
                self.mem.insert(
                    chain_id,
                    MemEntry {
                        fetched_at,
                        addresses: Arc::clone(&set),
                    },
                );
            }
            if !fresh {
                self.spawn_stale_refresh(chain_id, options);
            }
            return Ok(set);
        }

        // Cold: fetch inline.
        let set = fetch_list(
            self.http.clone(),
            self.base.clone(),
            chain_id,
            options.timeout,
            options.cancel.clone(),
        )
        .await?;
        let set = Arc::new(set);
        let now = SystemTime::now();
        write_disk(&self.cache_path(chain_id), now, &set);
        if options.cache {
            self.mem.insert(
                chain_id,
                MemEntry {
                    fetched_at: now,
                    addresses: Arc::clone(&set),
                },
            );
        }
        Ok(set)
    }

    fn spawn_stale_refresh(&self, chain_id: u64, options: &ProviderRequestOptions) {
        let http = self.http.clone();
        let base = self.base.clone();
        let path = self.cache_path(chain_id);
        let mem = Arc::clone(&self.mem);
        let timeout = options
            .timeout
            .unwrap_or(REFRESH_TIMEOUT_MAX)
            .clamp(REFRESH_TIMEOUT_MIN, REFRESH_TIMEOUT_MAX);
        tokio::spawn(async move {
            match fetch_list(http, base, chain_id, Some(timeout), None).await {
                Ok(set) => {
                    let set = Arc::new(set);
                    let now = SystemTime::now();
                    write_disk(&path, now, &set);
                    mem.insert(
                        chain_id,
                        MemEntry {
                            fetched_at: now,
                            addresses: set,
                        },
                    );
                }
                Err(err) => {
                    tracing::debug!(chain_id, error = %err, "stale phish-list refresh failed");
                }
            }
        });
    }

    fn cache_path(&self, chain_id: u64) -> PathBuf {
        self.cache_dir
            .join(format!("etherscan-phish-hack-{chain_id}.json"))
    }
}

async fn fetch_list(
    http: reqwest::Client,
    base: Url,
    chain_id: u64,
    timeout: Option<Duration>,
    cancel: Option<tokio_util::sync::CancellationToken>,
) -> Result<HashSet<Address>, ProviderError> {
    let mut link_url = base;
    link_url
        .query_pairs_mut()
        .append_pair("chainid", &chain_id.to_string())
        .append_pair("type", "phish-hack");
    let response = fetch_with_timeout(http.get(link_url), timeout, cancel.as_ref()).await?;
    let link: ExportLink = expect_success(response)?
        .json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))?;

    let response = fetch_with_timeout(http.get(&link.url), timeout, cancel.as_ref()).await?;
    let csv = expect_success(response)?
        .text()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))?;
    Ok(parse_csv(&csv))
}

fn parse_csv(csv: &str) -> HashSet<Address> {
    let mut set = HashSet::new();
    for line in csv.lines().skip(1) {
        let first = line.split(',').next().unwrap_or("").trim().trim_matches('"');
        if let Ok(address) = Address::from_str(first) {
            set.insert(address);
        }
    }
    set
}

fn read_disk(path: &Path) -> Option<(SystemTime, HashSet<Address>)> {
    let raw = std::fs::read_to_string(path).ok()?;
    let cache: DiskCache = serde_json::from_str(&raw).ok()?;
    let fetched_at = UNIX_EPOCH + Duration::from_secs(cache.fetched_at);
    let set = cache
        .addresses
        .iter()
        .filter_map(|a| Address::from_str(a).ok())
        .collect();
    Some((fetched_at, set))
}

fn write_disk(path: &Path, fetched_at: SystemTime, set: &HashSet<Address>) {
    let mut addresses: Vec<String> = set.iter().map(crate::chains::hex_lower).collect();
    addresses.sort();
    let cache = DiskCache {
        fetched_at: fetched_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs(),
        addresses,
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_vec(&cache) {
        Ok(bytes) => {
            if let Err(err) = std::fs::write(path, bytes) {
                tracing::debug!(path = %path.display(), error = %err, "phish-list cache write failed");
            }
        }
        Err(err) => tracing::debug!(error = %err, "phish-list cache encode failed"),
    }
}

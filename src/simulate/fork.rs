//! Fork-node access: the client contract the pipeline consumes, the shared
//! per-key instance with its task queue, and the instance registry.
//!
//! The gate never spawns the forking node itself; it connects to a running
//! one and treats its transport as a black box behind [`ForkClient`].

use alloy_network::Ethereum;
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::{Provider, RootProvider};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

use crate::chains::{Chain, hex_lower};

/// Errors from the fork transport or the node itself.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Fork RPC error: {0}")]
    Rpc(String),
    #[error("Fork node unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to decode fork response: {0}")]
    Decode(String),
    #[error("Timed out waiting for transaction receipt")]
    ReceiptTimeout,
}

/// Unsigned transaction submitted under impersonation.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// A read-only call frame, optionally pinned to a block.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub block: Option<u64>,
}

impl CallFrame {
    pub fn read(to: Address, data: Bytes, block: Option<u64>) -> Self {
        Self {
            from: None,
            to,
            data,
            value: U256::ZERO,
            block,
        }
    }
}

/// One receipt log, reduced to what the extractors need.
#[derive(Debug, Clone)]
pub struct SimLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Receipt fields the pipeline consumes.
#[derive(Debug, Clone)]
pub struct SimReceipt {
    pub status: bool,
    pub block_number: u64,
    pub gas_used: u128,
    pub effective_gas_price: u128,
    pub logs: Vec<SimLog>,
}

/// The fork node's test transport, as consumed by the pipeline.
#[async_trait]
pub trait ForkClient: Send + Sync {
    async fn snapshot(&self) -> Result<U256, SimError>;
    async fn revert(&self, id: U256) -> Result<bool, SimError>;
    async fn impersonate(&self, address: Address) -> Result<(), SimError>;
    async fn stop_impersonating(&self, address: Address) -> Result<(), SimError>;
    async fn set_balance(&self, address: Address, value: U256) -> Result<(), SimError>;
    async fn get_balance(&self, address: Address) -> Result<U256, SimError>;
    async fn get_code(&self, address: Address) -> Result<Bytes, SimError>;
    async fn send_unsigned(&self, tx: &UnsignedTx) -> Result<B256, SimError>;
    async fn wait_for_receipt(&self, hash: B256) -> Result<SimReceipt, SimError>;
    async fn call(&self, frame: &CallFrame) -> Result<Bytes, SimError>;
    async fn raw(&self, method: &str, params: Value) -> Result<Value, SimError>;
}

/// Production client speaking JSON-RPC to a running anvil-compatible node.
pub struct HttpForkClient {
    provider: RootProvider<Ethereum>,
    receipt_timeout: Duration,
}

impl HttpForkClient {
    pub fn new(url: Url) -> Self {
        Self {
            provider: RootProvider::<Ethereum>::new_http(url),
            receipt_timeout: Duration::from_secs(30),
        }
    }

    /// Cheap reachability probe used when an instance is first registered.
    pub async fn probe(&self) -> Result<u64, SimError> {
        let id: String = self
            .provider
            .raw_request("eth_chainId".into(), json!([]))
            .await
            .map_err(|e| SimError::Unavailable(e.to_string()))?;
        u64::from_str_radix(id.trim_start_matches("0x"), 16)
            .map_err(|e| SimError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ForkClient for HttpForkClient {
    async fn snapshot(&self) -> Result<U256, SimError> {
        let id: String = self
            .provider
            .raw_request("evm_snapshot".into(), json!([]))
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))?;
        U256::from_str_radix(id.trim_start_matches("0x"), 16)
            .map_err(|e| SimError::Decode(e.to_string()))
    }

    async fn revert(&self, id: U256) -> Result<bool, SimError> {
        self.provider
            .raw_request("evm_revert".into(), json!([format!("0x{id:x}")]))
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))
    }

    async fn impersonate(&self, address: Address) -> Result<(), SimError> {
        let _: Value = self
            .provider
            .raw_request("anvil_impersonateAccount".into(), json!([hex_lower(&address)]))
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))?;
        Ok(())
    }

    async fn stop_impersonating(&self, address: Address) -> Result<(), SimError> {
        let _: Value = self
            .provider
            .raw_request(
                "anvil_stopImpersonatingAccount".into(),
                json!([hex_lower(&address)]),
            )
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))?;
        Ok(())
    }

    async fn set_balance(&self, address: Address, value: U256) -> Result<(), SimError> {
        let _: Value = self
            .provider
            .raw_request(
                "anvil_setBalance".into(),
                json!([hex_lower(&address), format!("0x{value:x}")]),
            )
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))?;
        Ok(())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, SimError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, SimError> {
        self.provider
            .get_code_at(address)
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))
    }

    async fn send_unsigned(&self, tx: &UnsignedTx) -> Result<B256, SimError> {
        let hash: String = self
            .provider
            .raw_request(
                "eth_sendTransaction".into(),
                json!([{
                    "from": hex_lower(&tx.from),
                    "to": hex_lower(&tx.to),
                    "data": format!("{}", tx.data),
                    "value": format!("0x{:x}", tx.value),
                }]),
            )
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))?;
        hash.parse().map_err(|_| SimError::Decode(hash))
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<SimReceipt, SimError> {
        let started = Instant::now();
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| SimError::Rpc(e.to_string()))?;
            if let Some(receipt) = receipt {
                let logs = receipt
                    .inner
                    .logs()
                    .iter()
                    .map(|log| SimLog {
                        address: log.address(),
                        topics: log.topics().to_vec(),
                        data: log.data().data.clone(),
                    })
                    .collect();
                return Ok(SimReceipt {
                    status: receipt.status(),
                    block_number: receipt.block_number.unwrap_or_default(),
                    gas_used: receipt.gas_used as u128,
                    effective_gas_price: receipt.effective_gas_price,
                    logs,
                });
            }
            if started.elapsed() > self.receipt_timeout {
                return Err(SimError::ReceiptTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn call(&self, frame: &CallFrame) -> Result<Bytes, SimError> {
        let mut tx = serde_json::Map::new();
        if let Some(from) = frame.from {
            tx.insert("from".into(), json!(hex_lower(&from)));
        }
        tx.insert("to".into(), json!(hex_lower(&frame.to)));
        tx.insert("data".into(), json!(format!("{}", frame.data)));
        if !frame.value.is_zero() {
            tx.insert("value".into(), json!(format!("0x{:x}", frame.value)));
        }
        let block = match frame.block {
            Some(number) => json!(format!("0x{number:x}")),
            None => json!("latest"),
        };
        let out: String = self
            .provider
            .raw_request("eth_call".into(), json!([Value::Object(tx), block]))
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))?;
        out.parse().map_err(|_| SimError::Decode(out))
    }

    async fn raw(&self, method: &str, params: Value) -> Result<Value, SimError> {
        self.provider
            .raw_request(method.to_string().into(), params)
            .await
            .map_err(|e| SimError::Rpc(e.to_string()))
    }
}

/// Key identifying one fork instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForkKey {
    pub chain: Chain,
    pub fork_url: Url,
    pub fork_block: Option<u64>,
}

/// Outcome of a warm reset.
#[derive(Debug, Clone, Copy)]
pub struct ResetOutcome {
    pub used_anvil_reset: bool,
    pub elapsed: Duration,
}

/// One fork node shared by all scans on the same [`ForkKey`]. Scans
/// serialize through [`AnvilInstance::run_exclusive`] so snapshot/revert
/// pairs never interleave.
pub struct AnvilInstance {
    key: ForkKey,
    client: Arc<dyn ForkClient>,
    queue: Mutex<()>,
    baseline: Mutex<Option<U256>>,
}

impl AnvilInstance {
    pub fn new(key: ForkKey, client: Arc<dyn ForkClient>) -> Self {
        Self {
            key,
            client,
            queue: Mutex::new(()),
            baseline: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<dyn ForkClient> {
        &self.client
    }

    pub fn key(&self) -> &ForkKey {
        &self.key
    }

    /// Run `task` while holding the instance's task queue. Returns the task
    /// output together with how long the acquire waited.
    pub async fn run_exclusive<F, T>(&self, task: F) -> (T, Duration)
    where
        F: Future<Output = T>,
    {
        let waited = Instant::now();
        let guard = self.queue.lock().await;
        let wait = waited.elapsed();
        let out = task.await;
        drop(guard);
        (out, wait)
    }

    /// Warm reset: revert to the remembered baseline and re-snapshot. Falls
    /// back to `anvil_reset` when the revert is rejected (snapshot ids are
    /// consumed on some node versions).
    pub async fn reset_fork(&self) -> Result<ResetOutcome, SimError> {
        let started = Instant::now();
        let mut baseline = self.baseline.lock().await;
        let reverted = match *baseline {
            Some(id) => self.client.revert(id).await.unwrap_or(false),
            None => false,
        };
        if reverted {
            *baseline = Some(self.client.snapshot().await?);
            return Ok(ResetOutcome {
                used_anvil_reset: false,
                elapsed: started.elapsed(),
            });
        }
        self.client.raw("anvil_reset", json!([])).await?;
        *baseline = Some(self.client.snapshot().await?);
        Ok(ResetOutcome {
            used_anvil_reset: true,
            elapsed: started.elapsed(),
        })
    }

    /// Remember the given snapshot as the instance baseline.
    pub async fn set_baseline(&self, id: U256) {
        *self.baseline.lock().await = Some(id);
    }
}

/// Registry multiplexing fork instances by key. The first caller connects;
/// later callers share the instance. A failed connect evicts the key so the
/// next scan retries.
#[derive(Default)]
pub struct ForkRegistry {
    inner: DashMap<ForkKey, Arc<AnvilInstance>>,
    connect_lock: Mutex<()>,
}

impl ForkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_connect(&self, key: ForkKey) -> Result<Arc<AnvilInstance>, SimError> {
        if let Some(existing) = self.inner.get(&key) {
            return Ok(Arc::clone(&existing));
        }
        let _guard = self.connect_lock.lock().await;
        if let Some(existing) = self.inner.get(&key) {
            return Ok(Arc::clone(&existing));
        }
        let client = HttpForkClient::new(key.fork_url.clone());
        client.probe().await?;
        let instance = Arc::new(AnvilInstance::new(key.clone(), Arc::new(client)));
        self.inner.insert(key, Arc::clone(&instance));
        Ok(instance)
    }

    /// Insert a pre-built instance (tests use this to inject scripted clients).
    pub fn insert(&self, instance: Arc<AnvilInstance>) {
        self.inner.insert(instance.key.clone(), instance);
    }

    pub fn evict(&self, key: &ForkKey) {
        self.inner.remove(key);
    }
}

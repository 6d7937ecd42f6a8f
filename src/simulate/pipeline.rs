//! The simulation pipeline: execute the transaction on the fork once, read
//! balance and approval deltas around it, and put the fork back.
//!
//! Two profiles share the code path. **Full** brackets the run with
//! snapshot/revert. **Wallet-fast** leans on the instance's warm reset,
//! skips token-metadata lookups, and falls back to calldata-derived
//! approvals when the receipt offers no logs.

use alloy_primitives::{Address, I256, U256, address};
use alloy_sol_types::{SolCall, sol};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::fork::{AnvilInstance, CallFrame, ForkClient, SimReceipt, UnsignedTx};
use super::logs::{TransferEvent, parse_logs};
use super::{
    ApprovalChange, ApprovalScope, ApprovalStandard, AssetChange, AssetKind,
    BalanceSimulationResult, Confidence, Direction, Section,
};
use crate::calldata::intent::token_display;
use crate::calldata::{CalldataInput, DecodedCall, DecodedValue};
use crate::chains::Chain;

sol! {
    function balanceOf(address account) returns (uint256);
    function decimals() returns (uint8);
    function symbol() returns (string);
}

/// Funding given to the impersonated sender so gas never limits analysis.
fn gas_allowance() -> U256 {
    U256::from(10).pow(U256::from(22u64))
}

/// Stand-in sender when the request carries no `from`.
const FALLBACK_SENDER: Address = address!("0x1111111111111111111111111111111111111111");

/// Execution profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimProfile {
    Full,
    WalletFast,
}

/// One simulation request.
pub struct SimulationJob<'a> {
    pub chain: Chain,
    pub input: &'a CalldataInput,
    pub decoded: Option<&'a DecodedCall>,
    pub profile: SimProfile,
}

/// Simulate under the instance's task queue. Returns the result and how long
/// the job waited for the queue.
pub async fn simulate(
    instance: &AnvilInstance,
    job: SimulationJob<'_>,
) -> (BalanceSimulationResult, Duration) {
    let profile = job.profile;
    instance
        .run_exclusive(async {
            let mut result = run_pipeline(instance, job).await;
            if profile == SimProfile::WalletFast {
                if let Err(err) = instance.reset_fork().await {
                    result.notes.push(format!("warm fork reset failed: {err}"));
                }
            }
            result
        })
        .await
}

async fn run_pipeline(instance: &AnvilInstance, job: SimulationJob<'_>) -> BalanceSimulationResult {
    let client = instance.client().clone();
    let mut result = BalanceSimulationResult {
        success: false,
        revert_reason: None,
        gas_used: None,
        effective_gas_price: None,
        native_diff: None,
        balances: Section {
            changes: Vec::new(),
            confidence: Confidence::High,
        },
        approvals: Section {
            changes: Vec::new(),
            confidence: Confidence::High,
        },
        notes: Vec::new(),
    };

    let from = match job.input.from {
        Some(from) => from.0,
        None => {
            result
                .notes
                .push("no sender provided; simulated from a placeholder account".to_string());
            FALLBACK_SENDER
        }
    };
    let to = job.input.to.0;
    let value = job.input.value.unwrap_or(U256::ZERO);

    let sender_is_contract = match client.get_code(from).await {
        Ok(code) => !code.is_empty(),
        Err(_) => false,
    };

    let baseline = if job.profile == SimProfile::Full {
        match client.snapshot().await {
            Ok(id) => Some(id),
            Err(err) => {
                result.notes.push(format!(
                    "fork snapshot failed: {err} (is the fork node running? checked the configured \
                     rpcUrl; install Foundry and start `anvil --fork-url <chain rpc>` if not)"
                ));
                result.balances.confidence = Confidence::Low;
                result.approvals.confidence = Confidence::Low;
                return result;
            }
        }
    } else {
        None
    };

    run_body(
        &*client,
        &mut result,
        &job,
        from,
        to,
        value,
        sender_is_contract,
    )
    .await;

    // Cleanup runs on every path; its failures are notes, never errors.
    if let Some(id) = baseline {
        match client.revert(id).await {
            Ok(true) => {}
            Ok(false) => result.notes.push("fork revert was rejected".to_string()),
            Err(err) => result.notes.push(format!("fork revert failed: {err}")),
        }
    }
    if client.stop_impersonating(from).await.is_err() {
        // Ignored: impersonation is scoped to the fork anyway.
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn run_body(
    client: &dyn ForkClient,
    result: &mut BalanceSimulationResult,
    job: &SimulationJob<'_>,
    from: Address,
    to: Address,
    value: U256,
    sender_is_contract: bool,
) {
    if let Err(err) = client.impersonate(from).await {
        result
            .notes
            .push(format!("sender impersonation failed: {err}"));
        result.balances.confidence = Confidence::Low;
        result.approvals.confidence = Confidence::Low;
        return;
    }
    if let Err(err) = client.set_balance(from, gas_allowance()).await {
        result.notes.push(format!("gas funding failed: {err}"));
    }

    // Token candidates known before execution: the chain's wrapped-native
    // token, plus the target itself when the calldata is an ERC-20 call.
    let mut candidates: BTreeSet<Address> = BTreeSet::new();
    candidates.insert(job.chain.wrapped_native().address);
    if job
        .decoded
        .is_some_and(|d| d.standard.as_deref() == Some("erc20"))
    {
        candidates.insert(to);
    }

    let native_before = client.get_balance(from).await.ok();
    if native_before.is_none() {
        result
            .notes
            .push("pre-transaction native balance read failed".to_string());
        result.balances.confidence.lower_to(Confidence::Medium);
    }

    let mut pre: BTreeMap<Address, U256> = BTreeMap::new();
    for token in &candidates {
        match erc20_balance_of(client, *token, from, None).await {
            Some(balance) => {
                pre.insert(*token, balance);
            }
            None => {
                result.notes.push(format!(
                    "pre-transaction balance read failed for {}",
                    crate::chains::hex_lower(token)
                ));
                result.balances.confidence.lower_to(Confidence::Medium);
            }
        }
    }

    let tx = UnsignedTx {
        from,
        to,
        data: job.input.data.clone(),
        value,
    };
    let receipt = match client.send_unsigned(&tx).await {
        Ok(hash) => match client.wait_for_receipt(hash).await {
            Ok(receipt) => receipt,
            Err(err) => {
                result.notes.push(format!("receipt wait failed: {err}"));
                result.balances.confidence = Confidence::Low;
                result.approvals.confidence = Confidence::Low;
                return;
            }
        },
        Err(send_err) => {
            result.success = false;
            result.revert_reason = extract_revert_reason(client, &tx, None)
                .await
                .or_else(|| Some(send_err.to_string()));
            result.balances.confidence = Confidence::Low;
            result.approvals.confidence = Confidence::Low;
            wallet_fast_calldata_approval(result, job, from);
            return;
        }
    };

    result.gas_used = Some(receipt.gas_used);
    result.effective_gas_price = Some(receipt.effective_gas_price);

    if !receipt.status {
        result.success = false;
        result.revert_reason = extract_revert_reason(client, &tx, Some(&receipt)).await;
        result.balances.confidence = Confidence::Low;
        result.approvals.confidence = Confidence::Low;
        wallet_fast_calldata_approval(result, job, from);
        return;
    }
    result.success = true;

    let (transfers, approval_events) = parse_logs(&receipt.logs);

    // Union in ERC-20 tokens discovered from the logs; their pre-balances
    // are read one block before the simulated transaction, best effort.
    let mut discovered: BTreeSet<Address> = candidates.clone();
    for transfer in transfers.iter().filter(|t| t.kind == AssetKind::Erc20) {
        discovered.insert(transfer.token);
    }
    for approval in approval_events
        .iter()
        .filter(|a| matches!(a.standard, ApprovalStandard::Erc20 | ApprovalStandard::Permit2))
    {
        discovered.insert(approval.token);
    }
    let pre_block = receipt.block_number.saturating_sub(1);
    for token in &discovered {
        if pre.contains_key(token) {
            continue;
        }
        match erc20_balance_of(client, *token, from, Some(pre_block)).await {
            Some(balance) => {
                pre.insert(*token, balance);
            }
            None => {
                result.notes.push(format!(
                    "pre-block balance read failed for {}; its delta is omitted",
                    crate::chains::hex_lower(token)
                ));
                result.balances.confidence.lower_to(Confidence::Low);
            }
        }
    }

    // ERC-20 diffs from post-state reads.
    for token in &discovered {
        let Some(before) = pre.get(token).copied() else {
            continue;
        };
        let Some(after) = erc20_balance_of(client, *token, from, None).await else {
            result.notes.push(format!(
                "post-transaction balance read failed for {}",
                crate::chains::hex_lower(token)
            ));
            result.balances.confidence.lower_to(Confidence::Medium);
            continue;
        };
        if after == before {
            continue;
        }
        let (direction, amount) = if after > before {
            (Direction::In, after - before)
        } else {
            (Direction::Out, before - after)
        };
        let counterparty = erc20_counterparty(&transfers, *token, from, direction);
        result.balances.changes.push(AssetChange {
            asset_type: AssetKind::Erc20,
            address: Some((*token).into()),
            token_id: None,
            amount: Some(amount),
            direction,
            counterparty: counterparty.map(Into::into),
            symbol: None,
            decimals: None,
        });
    }

    // NFT movements come straight from the logs.
    for transfer in transfers
        .iter()
        .filter(|t| matches!(t.kind, AssetKind::Erc721 | AssetKind::Erc1155))
    {
        let direction = if transfer.from == from {
            Direction::Out
        } else if transfer.to == from {
            Direction::In
        } else {
            continue;
        };
        let counterparty = match direction {
            Direction::Out => transfer.to,
            Direction::In => transfer.from,
        };
        result.balances.changes.push(AssetChange {
            asset_type: transfer.kind,
            address: Some(transfer.token.into()),
            token_id: transfer.token_id,
            amount: transfer.amount,
            direction,
            counterparty: Some(counterparty.into()),
            symbol: None,
            decimals: None,
        });
    }

    // Native delta, gas-inclusive so sent value reads as negative even
    // though the sender also paid gas.
    if let (Some(before), Ok(after)) = (native_before, client.get_balance(from).await) {
        let gas_cost = U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price);
        let diff = signed_diff(after, before) + I256::try_from(gas_cost).unwrap_or(I256::ZERO);
        result.native_diff = Some(diff);
        if !diff.is_zero() {
            let (direction, magnitude) = if diff.is_negative() {
                (Direction::Out, diff.unsigned_abs())
            } else {
                (Direction::In, diff.unsigned_abs())
            };
            result.balances.changes.push(AssetChange {
                asset_type: AssetKind::Native,
                address: None,
                token_id: None,
                amount: Some(magnitude),
                direction,
                counterparty: Some(to.into()),
                symbol: Some(job.chain.native_symbol().to_string()),
                decimals: Some(18),
            });
        }
    }

    // Approvals, restricted to the simulated sender.
    for event in approval_events.iter().filter(|a| a.owner == from) {
        result.approvals.changes.push(ApprovalChange {
            standard: event.standard,
            token: event.token.into(),
            owner: event.owner.into(),
            spender: event.spender.into(),
            amount: event.amount,
            previous_amount: None,
            token_id: event.token_id,
            scope: event.scope,
            approved: event.approved,
            previous_approved: None,
            previous_spender: None,
            symbol: None,
            decimals: None,
        });
    }
    if result.approvals.changes.is_empty() && job.profile == SimProfile::WalletFast {
        wallet_fast_calldata_approval(result, job, from);
    }

    // Metadata enrichment; skipped wholesale in the wallet-fast profile.
    if job.profile == SimProfile::WalletFast {
        if !result.balances.changes.is_empty() || !result.approvals.changes.is_empty() {
            result
                .notes
                .push("token metadata lookups skipped (budget)".to_string());
        }
    } else {
        enrich_metadata(client, result, job.chain).await;
    }

    if sender_is_contract {
        let has_deltas =
            !result.balances.changes.is_empty() || !result.approvals.changes.is_empty();
        if has_deltas {
            // Wallet-fast keeps the computed confidence for a contract
            // sender with observable deltas; only null deltas, a failed
            // pre-block read, or a revert downgrade it there.
            if job.profile != SimProfile::WalletFast {
                result.balances.confidence.lower_to(Confidence::Medium);
                result.approvals.confidence.lower_to(Confidence::Medium);
            }
        } else {
            result.balances.confidence.lower_to(Confidence::Low);
            result.approvals.confidence.lower_to(Confidence::Low);
        }
        result
            .notes
            .push("sender is a contract; observed deltas may be incomplete".to_string());
    }
}

/// Wallet-fast fallback: when the logs gave us nothing, an ERC-20 `approve`
/// decoded from calldata still yields the approval change.
fn wallet_fast_calldata_approval(
    result: &mut BalanceSimulationResult,
    job: &SimulationJob<'_>,
    from: Address,
) {
    if job.profile != SimProfile::WalletFast {
        return;
    }
    let Some(decoded) = job.decoded else { return };
    if decoded.signature != "approve(address,uint256)" {
        return;
    }
    let spender = decoded.arg("spender").and_then(DecodedValue::as_address);
    let amount = decoded.arg("amount").and_then(DecodedValue::as_uint);
    if let (Some(spender), Some(amount)) = (spender, amount) {
        result.approvals.changes.push(ApprovalChange {
            standard: ApprovalStandard::Erc20,
            token: job.input.to,
            owner: from.into(),
            spender: spender.into(),
            amount: Some(amount),
            previous_amount: None,
            token_id: None,
            scope: Some(ApprovalScope::Token),
            approved: None,
            previous_approved: None,
            previous_spender: None,
            symbol: None,
            decimals: None,
        });
        result
            .notes
            .push("approval derived from calldata (no receipt logs available)".to_string());
    }
}

fn signed_diff(after: U256, before: U256) -> I256 {
    if after >= before {
        I256::try_from(after - before).unwrap_or(I256::MAX)
    } else {
        -I256::try_from(before - after).unwrap_or(I256::MAX)
    }
}

fn erc20_counterparty(
    transfers: &[TransferEvent],
    token: Address,
    owner: Address,
    direction: Direction,
) -> Option<Address> {
    transfers
        .iter()
        .filter(|t| t.kind == AssetKind::Erc20 && t.token == token)
        .find_map(|t| match direction {
            Direction::Out if t.from == owner => Some(t.to),
            Direction::In if t.to == owner => Some(t.from),
            _ => None,
        })
}

async fn erc20_balance_of(
    client: &dyn ForkClient,
    token: Address,
    owner: Address,
    block: Option<u64>,
) -> Option<U256> {
    let data = balanceOfCall { account: owner }.abi_encode();
    let frame = CallFrame::read(token, data.into(), block);
    let out = client.call(&frame).await.ok()?;
    balanceOfCall::abi_decode_returns(&out).ok()
}

/// Fill symbol/decimals for every ERC-20 touched by a change. The
/// string-returning `symbol()` is tried first, then the bytes32 legacy
/// shape, then we stop.
async fn enrich_metadata(
    client: &dyn ForkClient,
    result: &mut BalanceSimulationResult,
    chain: Chain,
) {
    let mut tokens: BTreeSet<Address> = BTreeSet::new();
    for change in &result.balances.changes {
        if change.asset_type == AssetKind::Erc20 {
            if let Some(address) = change.address {
                tokens.insert(address.0);
            }
        }
    }
    for approval in &result.approvals.changes {
        if matches!(approval.standard, ApprovalStandard::Erc20 | ApprovalStandard::Permit2) {
            tokens.insert(approval.token.0);
        }
    }

    let mut metadata: BTreeMap<Address, (Option<String>, Option<u8>)> = BTreeMap::new();
    for token in tokens {
        if let Some((symbol, decimals)) = token_display(chain, token) {
            metadata.insert(token, (Some(symbol.to_string()), Some(decimals)));
            continue;
        }
        let symbol = read_symbol(client, token).await;
        let decimals = read_decimals(client, token).await;
        if symbol.is_none() && decimals.is_none() {
            result.notes.push(format!(
                "token metadata unavailable for {}",
                crate::chains::hex_lower(&token)
            ));
        }
        metadata.insert(token, (symbol, decimals));
    }

    for change in &mut result.balances.changes {
        if change.asset_type != AssetKind::Erc20 {
            continue;
        }
        if let Some((symbol, decimals)) = change.address.and_then(|a| metadata.get(&a.0)) {
            change.symbol = symbol.clone();
            change.decimals = *decimals;
        }
    }
    for approval in &mut result.approvals.changes {
        if let Some((symbol, decimals)) = metadata.get(&approval.token.0) {
            approval.symbol = symbol.clone();
            approval.decimals = *decimals;
        }
    }
}

async fn read_symbol(client: &dyn ForkClient, token: Address) -> Option<String> {
    let data = symbolCall {}.abi_encode();
    let frame = CallFrame::read(token, data.into(), None);
    let out = client.call(&frame).await.ok()?;
    if let Ok(symbol) = symbolCall::abi_decode_returns(&out) {
        return Some(symbol);
    }
    // Legacy tokens return bytes32.
    if out.len() >= 32 {
        let trimmed: Vec<u8> = out[..32].iter().copied().take_while(|b| *b != 0).collect();
        if let Ok(symbol) = String::from_utf8(trimmed) {
            if !symbol.is_empty() {
                return Some(symbol);
            }
        }
    }
    None
}

async fn read_decimals(client: &dyn ForkClient, token: Address) -> Option<u8> {
    let data = decimalsCall {}.abi_encode();
    let frame = CallFrame::read(token, data.into(), None);
    let out = client.call(&frame).await.ok()?;
    decimalsCall::abi_decode_returns(&out).ok()
}

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Re-run the transaction as an `eth_call` to pull out a revert reason.
async fn extract_revert_reason(
    client: &dyn ForkClient,
    tx: &UnsignedTx,
    receipt: Option<&SimReceipt>,
) -> Option<String> {
    let frame = CallFrame {
        from: Some(tx.from),
        to: tx.to,
        data: tx.data.clone(),
        value: tx.value,
        block: receipt.map(|r| r.block_number),
    };
    match client.call(&frame).await {
        Ok(data) if data.is_empty() => Some("execution reverted".to_string()),
        Ok(data) => Some(decode_revert_payload(&data)),
        Err(err) => {
            let text = err.to_string();
            match find_hex_blob(&text) {
                Some(blob) => Some(decode_revert_payload(&blob)),
                None => Some(text),
            }
        }
    }
}

/// Decode `Error(string)` / `Panic(uint256)` payloads; anything else is
/// reported as a custom error selector.
pub fn decode_revert_payload(data: &[u8]) -> String {
    if data.len() >= 4 {
        let selector: [u8; 4] = data[..4].try_into().expect("length checked");
        if selector == ERROR_STRING_SELECTOR {
            if let Ok(reason) = alloy_dyn_abi::DynSolType::String.abi_decode_params(&data[4..]) {
                if let Some(reason) = reason.as_str() {
                    return reason.to_string();
                }
            }
        }
        if selector == PANIC_SELECTOR && data.len() >= 36 {
            let code = U256::from_be_slice(&data[4..36]);
            return format!("Panic(0x{code:x})");
        }
        return format!("Custom error 0x{}", hex::encode(selector));
    }
    "execution reverted".to_string()
}

fn find_hex_blob(text: &str) -> Option<Vec<u8>> {
    let start = text.find("0x")?;
    let hex_str: String = text[start + 2..]
        .chars()
        .take_while(char::is_ascii_hexdigit)
        .collect();
    if hex_str.len() < 8 || hex_str.len() % 2 != 0 {
        return None;
    }
    hex::decode(&hex_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{EvmAddress, PERMIT2};
    use crate::simulate::fork::{ForkKey, SimError, SimLog};
    use crate::simulate::logs;
    use alloy_primitives::{B256, Bytes};
    use alloy_sol_types::SolEvent;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use url::Url;

    const SENDER: Address = address!("0x1111111111111111111111111111111111111111");
    const BOB: Address = address!("0x2222222222222222222222222222222222222222");
    const USDC: Address = address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

    struct ScriptedClient {
        pre: HashMap<(Address, Address), U256>,
        post: HashMap<(Address, Address), U256>,
        native_pre: U256,
        native_post: U256,
        receipt: SimReceipt,
        revert_payload: Option<Bytes>,
        sender_code: Bytes,
        sent: AtomicBool,
    }

    impl ScriptedClient {
        fn token_balance(&self, token: Address, owner: Address, pre: bool) -> U256 {
            let map = if pre { &self.pre } else { &self.post };
            map.get(&(token, owner)).copied().unwrap_or(U256::ZERO)
        }
    }

    #[async_trait]
    impl ForkClient for ScriptedClient {
        async fn snapshot(&self) -> Result<U256, SimError> {
            Ok(U256::from(7u64))
        }
        async fn revert(&self, _id: U256) -> Result<bool, SimError> {
            Ok(true)
        }
        async fn impersonate(&self, _address: Address) -> Result<(), SimError> {
            Ok(())
        }
        async fn stop_impersonating(&self, _address: Address) -> Result<(), SimError> {
            Ok(())
        }
        async fn set_balance(&self, _address: Address, _value: U256) -> Result<(), SimError> {
            Ok(())
        }
        async fn get_balance(&self, _address: Address) -> Result<U256, SimError> {
            if self.sent.load(Ordering::SeqCst) {
                Ok(self.native_post)
            } else {
                Ok(self.native_pre)
            }
        }
        async fn get_code(&self, _address: Address) -> Result<Bytes, SimError> {
            Ok(self.sender_code.clone())
        }
        async fn send_unsigned(&self, _tx: &UnsignedTx) -> Result<B256, SimError> {
            self.sent.store(true, Ordering::SeqCst);
            Ok(B256::repeat_byte(0x42))
        }
        async fn wait_for_receipt(&self, _hash: B256) -> Result<SimReceipt, SimError> {
            Ok(self.receipt.clone())
        }
        async fn call(&self, frame: &CallFrame) -> Result<Bytes, SimError> {
            if frame.from.is_some() {
                // The revert-reason re-run.
                return Ok(self.revert_payload.clone().unwrap_or_default());
            }
            if frame.data.len() >= 4 && frame.data[..4] == [0x70, 0xa0, 0x82, 0x31] {
                let owner = Address::from_slice(&frame.data[16..36]);
                let pre = frame.block.is_some() || !self.sent.load(Ordering::SeqCst);
                let balance = self.token_balance(frame.to, owner, pre);
                return Ok(Bytes::copy_from_slice(&balance.to_be_bytes::<32>()));
            }
            Err(SimError::Rpc("unexpected call".to_string()))
        }
        async fn raw(&self, _method: &str, _params: Value) -> Result<Value, SimError> {
            Ok(Value::Null)
        }
    }

    fn erc20_transfer_log(token: Address, from: Address, to: Address, amount: u64) -> SimLog {
        SimLog {
            address: token,
            topics: vec![
                logs::Transfer::SIGNATURE_HASH,
                from.into_word(),
                to.into_word(),
            ],
            data: Bytes::copy_from_slice(&U256::from(amount).to_be_bytes::<32>()),
        }
    }

    fn erc20_approval_log(token: Address, owner: Address, spender: Address) -> SimLog {
        SimLog {
            address: token,
            topics: vec![
                logs::Approval::SIGNATURE_HASH,
                owner.into_word(),
                spender.into_word(),
            ],
            data: Bytes::copy_from_slice(&U256::MAX.to_be_bytes::<32>()),
        }
    }

    fn instance_with(client: ScriptedClient) -> AnvilInstance {
        AnvilInstance::new(
            ForkKey {
                chain: Chain::Ethereum,
                fork_url: Url::parse("http://127.0.0.1:8545").unwrap(),
                fork_block: None,
            },
            Arc::new(client),
        )
    }

    fn input(from: Address, to: Address) -> CalldataInput {
        CalldataInput {
            to: EvmAddress(to),
            from: Some(EvmAddress(from)),
            data: Bytes::copy_from_slice(&[0xa9, 0x05, 0x9c, 0xbb]),
            value: None,
            chain: Some(Chain::Ethereum),
            authorization_list: None,
        }
    }

    #[tokio::test]
    async fn happy_path_extracts_diffs_and_approvals() {
        let funded = gas_allowance();
        let gas_cost = U256::from(100_000u64);
        let client = ScriptedClient {
            pre: HashMap::from([((USDC, SENDER), U256::from(1_000u64))]),
            post: HashMap::from([((USDC, SENDER), U256::from(900u64))]),
            native_pre: funded,
            native_post: funded - gas_cost,
            receipt: SimReceipt {
                status: true,
                block_number: 100,
                gas_used: 50_000,
                effective_gas_price: 2,
                logs: vec![
                    erc20_transfer_log(USDC, SENDER, BOB, 100),
                    erc20_approval_log(USDC, SENDER, PERMIT2),
                ],
            },
            revert_payload: None,
            sender_code: Bytes::new(),
            sent: AtomicBool::new(false),
        };
        let instance = instance_with(client);
        let input = input(SENDER, USDC);
        let job = SimulationJob {
            chain: Chain::Ethereum,
            input: &input,
            decoded: None,
            profile: SimProfile::Full,
        };

        let (result, _wait) = simulate(&instance, job).await;
        assert!(result.success, "notes: {:?}", result.notes);
        assert_eq!(result.gas_used, Some(50_000));
        // Gas-inclusive: only gas was spent, so the native diff nets to zero.
        assert_eq!(result.native_diff, Some(I256::ZERO));

        let usdc_change = result
            .balances
            .changes
            .iter()
            .find(|c| c.address == Some(EvmAddress(USDC)))
            .expect("usdc delta present");
        assert_eq!(usdc_change.direction, Direction::Out);
        assert_eq!(usdc_change.amount, Some(U256::from(100u64)));
        assert_eq!(usdc_change.counterparty, Some(EvmAddress(BOB)));
        assert_eq!(usdc_change.symbol.as_deref(), Some("USDC"));
        assert_eq!(usdc_change.decimals, Some(6));

        assert_eq!(result.approvals.changes.len(), 1);
        let approval = &result.approvals.changes[0];
        assert_eq!(approval.spender, EvmAddress(PERMIT2));
        assert_eq!(approval.amount, Some(U256::MAX));

        assert_eq!(result.balances.confidence, Confidence::High);
        assert_eq!(result.approvals.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn reverted_transaction_reports_reason_and_low_confidence() {
        // Error("nope"): selector + offset + length + padded data.
        let mut payload = vec![0x08, 0xc3, 0x79, 0xa0];
        payload.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
        payload.extend_from_slice(&U256::from(4u64).to_be_bytes::<32>());
        let mut word = [0u8; 32];
        word[..4].copy_from_slice(b"nope");
        payload.extend_from_slice(&word);

        let client = ScriptedClient {
            pre: HashMap::new(),
            post: HashMap::new(),
            native_pre: U256::ZERO,
            native_post: U256::ZERO,
            receipt: SimReceipt {
                status: false,
                block_number: 100,
                gas_used: 21_000,
                effective_gas_price: 1,
                logs: Vec::new(),
            },
            revert_payload: Some(payload.into()),
            sender_code: Bytes::new(),
            sent: AtomicBool::new(false),
        };
        let instance = instance_with(client);
        let input = input(SENDER, USDC);
        let job = SimulationJob {
            chain: Chain::Ethereum,
            input: &input,
            decoded: None,
            profile: SimProfile::Full,
        };

        let (result, _wait) = simulate(&instance, job).await;
        assert!(!result.success);
        assert_eq!(result.revert_reason.as_deref(), Some("nope"));
        assert_eq!(result.balances.confidence, Confidence::Low);
        assert_eq!(result.approvals.confidence, Confidence::Low);
        assert!(result.was_attempted());
    }

    fn contract_sender_client() -> ScriptedClient {
        let funded = gas_allowance();
        ScriptedClient {
            pre: HashMap::from([((USDC, SENDER), U256::from(1_000u64))]),
            post: HashMap::from([((USDC, SENDER), U256::from(900u64))]),
            native_pre: funded,
            native_post: funded - U256::from(100_000u64),
            receipt: SimReceipt {
                status: true,
                block_number: 100,
                gas_used: 50_000,
                effective_gas_price: 2,
                logs: vec![
                    erc20_transfer_log(USDC, SENDER, BOB, 100),
                    erc20_approval_log(USDC, SENDER, PERMIT2),
                ],
            },
            revert_payload: None,
            sender_code: Bytes::copy_from_slice(&[0x60, 0x80, 0x60, 0x40]),
            sent: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn wallet_fast_contract_sender_with_deltas_keeps_confidence() {
        let instance = instance_with(contract_sender_client());
        let input = input(SENDER, USDC);
        let job = SimulationJob {
            chain: Chain::Ethereum,
            input: &input,
            decoded: None,
            profile: SimProfile::WalletFast,
        };

        let (result, _wait) = simulate(&instance, job).await;
        assert!(result.success, "notes: {:?}", result.notes);
        assert!(!result.balances.changes.is_empty());
        assert!(!result.approvals.changes.is_empty());
        // Observable deltas from a contract sender do not downgrade the
        // wallet-fast profile.
        assert_eq!(result.balances.confidence, Confidence::High);
        assert_eq!(result.approvals.confidence, Confidence::High);
        assert!(
            result
                .notes
                .iter()
                .any(|n| n.contains("sender is a contract"))
        );
    }

    #[tokio::test]
    async fn full_profile_contract_sender_with_deltas_is_medium() {
        let instance = instance_with(contract_sender_client());
        let input = input(SENDER, USDC);
        let job = SimulationJob {
            chain: Chain::Ethereum,
            input: &input,
            decoded: None,
            profile: SimProfile::Full,
        };

        let (result, _wait) = simulate(&instance, job).await;
        assert!(result.success, "notes: {:?}", result.notes);
        assert_eq!(result.balances.confidence, Confidence::Medium);
        assert_eq!(result.approvals.confidence, Confidence::Medium);
    }

    #[test]
    fn revert_payload_decoding() {
        let mut panic_payload = vec![0x4e, 0x48, 0x7b, 0x71];
        panic_payload.extend_from_slice(&U256::from(0x11u64).to_be_bytes::<32>());
        assert_eq!(decode_revert_payload(&panic_payload), "Panic(0x11)");
        assert_eq!(
            decode_revert_payload(&[0xde, 0xad, 0xbe, 0xef]),
            "Custom error 0xdeadbeef"
        );
        assert_eq!(decode_revert_payload(&[]), "execution reverted");
    }
}

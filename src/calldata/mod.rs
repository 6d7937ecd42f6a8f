//! Calldata decoding: selector → signature → structured arguments, plus the
//! findings and human-readable intent derived from them.
//!
//! Decoding tries three sources in order: the table of well-known standard
//! ABIs, the verified contract ABI when one is available, and finally the
//! offline selector database. Composite calls (multicall, Universal Router
//! `execute`, Safe `execTransaction`) decode their inner payloads
//! recursively.

use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt};
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, I256, U256};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

pub mod intent;
pub mod selectors;
pub mod typed_data;

use crate::chains::{Chain, EvmAddress, hex_lower};
use crate::findings::{Finding, Level, codes};
use selectors::{KnownFunction, lookup_known, lookup_local, name_of, params_of};

/// One EIP-7702 authorization tuple as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationEntry {
    pub address: EvmAddress,
    pub chain_id: u64,
    pub nonce: u64,
}

/// Normalized send-transaction input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalldataInput {
    pub to: EvmAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<EvmAddress>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "dec_or_hex_u256"
    )]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Chain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_list: Option<Vec<AuthorizationEntry>>,
}

impl CalldataInput {
    pub fn delegates(&self) -> Vec<EvmAddress> {
        self.authorization_list
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|a| a.address)
            .collect()
    }
}

/// `value` arrives as a decimal string, a `0x` quantity, or a JSON number;
/// it always leaves as a decimal string.
mod dec_or_hex_u256 {
    use super::*;
    use serde::Deserializer;

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let raw: Option<Value> = Option::deserialize(deserializer)?;
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                let s = n.to_string();
                U256::from_str_radix(&s, 10)
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
            Some(Value::String(s)) => parse_quantity(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            Some(other) => Err(serde::de::Error::custom(format!(
                "invalid quantity: {other}"
            ))),
        }
    }
}

/// Parse a decimal or `0x`-prefixed quantity string.
pub fn parse_quantity(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex_part.is_empty() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(hex_part, 16).map_err(|e| e.to_string())
    } else {
        U256::from_str_radix(s, 10).map_err(|e| e.to_string())
    }
}

/// Where a decode came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeSource {
    KnownAbi,
    ContractAbi,
    SignatureDb,
    LocalSelector,
}

/// A decoded argument value.
#[derive(Debug, Clone)]
pub enum DecodedValue {
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
    Bytes(Bytes),
    Str(String),
    Array(Vec<DecodedValue>),
    Struct(Vec<(String, DecodedValue)>),
    Call(Box<DecodedCall>),
}

impl DecodedValue {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            DecodedValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            DecodedValue::Uint(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            DecodedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn from_dyn(value: DynSolValue) -> Self {
        match value {
            DynSolValue::Address(a) => DecodedValue::Address(a),
            DynSolValue::Uint(u, _) => DecodedValue::Uint(u),
            DynSolValue::Int(i, _) => DecodedValue::Int(i),
            DynSolValue::Bool(b) => DecodedValue::Bool(b),
            DynSolValue::Bytes(b) => DecodedValue::Bytes(b.into()),
            DynSolValue::FixedBytes(word, size) => {
                DecodedValue::Bytes(Bytes::copy_from_slice(&word[..size]))
            }
            DynSolValue::String(s) => DecodedValue::Str(s),
            DynSolValue::Function(f) => DecodedValue::Bytes(Bytes::copy_from_slice(&f.0[..])),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                DecodedValue::Array(items.into_iter().map(Self::from_dyn).collect())
            }
            DynSolValue::Tuple(items) => DecodedValue::Struct(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (format!("field{i}"), Self::from_dyn(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for DecodedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DecodedValue::Address(a) => serializer.serialize_str(&hex_lower(a)),
            DecodedValue::Uint(u) => serializer.serialize_str(&u.to_string()),
            DecodedValue::Int(i) => serializer.serialize_str(&i.to_string()),
            DecodedValue::Bool(b) => serializer.serialize_bool(*b),
            DecodedValue::Bytes(b) => serializer.serialize_str(&format!("{b}")),
            DecodedValue::Str(s) => serializer.serialize_str(s),
            DecodedValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DecodedValue::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            DecodedValue::Call(call) => call.serialize(serializer),
        }
    }
}

/// A fully decoded call.
#[derive(Debug, Clone)]
pub struct DecodedCall {
    pub selector: [u8; 4],
    pub signature: String,
    pub function_name: String,
    pub args: Vec<(String, DecodedValue)>,
    pub standard: Option<String>,
    pub source: DecodeSource,
}

impl DecodedCall {
    pub fn arg(&self, name: &str) -> Option<&DecodedValue> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn selector_hex(&self) -> String {
        format!("0x{}", hex::encode(self.selector))
    }

    pub fn arg_names(&self) -> Vec<&str> {
        self.args.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl Serialize for DecodedCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("selector", &self.selector_hex())?;
        map.serialize_entry("signature", &self.signature)?;
        map.serialize_entry("functionName", &self.function_name)?;
        let args_object: serde_json::Map<String, Value> = self
            .args
            .iter()
            .map(|(n, v)| (n.clone(), serde_json::to_value(v).unwrap_or(Value::Null)))
            .collect();
        map.serialize_entry("args", &args_object)?;
        map.serialize_entry("argNames", &self.arg_names())?;
        if let Some(standard) = &self.standard {
            map.serialize_entry("standard", standard)?;
        }
        map.serialize_entry("source", &self.source)?;
        map.end()
    }
}

/// Findings, decode, and intent for one calldata payload.
#[derive(Debug, Default)]
pub struct CalldataAnalysis {
    pub findings: Vec<Finding>,
    pub decoded: Option<DecodedCall>,
    pub intent: Option<String>,
}

/// Decode `input.data` and derive findings and intent.
pub fn analyze_calldata(
    input: &CalldataInput,
    chain: Chain,
    contract_abi: Option<&Value>,
) -> CalldataAnalysis {
    let mut analysis = CalldataAnalysis::default();

    if input.data.is_empty() {
        analysis.findings.push(Finding::new(
            Level::Info,
            codes::CALLDATA_EMPTY,
            "Transaction carries no calldata",
        ));
    } else if input.data.len() < 4 {
        analysis.findings.push(Finding::new(
            Level::Info,
            codes::CALLDATA_UNKNOWN_SELECTOR,
            format!("Calldata too short to carry a selector: 0x{}", hex::encode(&input.data)),
        ));
    } else {
        let selector: [u8; 4] = input.data[..4].try_into().expect("length checked");
        let payload = &input.data[4..];
        match decode_with_sources(selector, payload, contract_abi, &mut analysis.findings) {
            Some(mut call) => {
                expand_composites(&mut call);
                analysis.findings.push(decoded_finding(&call));
                if let Some(finding) = unlimited_approval_finding(&call) {
                    analysis.findings.push(finding);
                }
                analysis.decoded = Some(call);
            }
            None => {
                analysis.findings.push(
                    Finding::new(
                        Level::Info,
                        codes::CALLDATA_UNKNOWN_SELECTOR,
                        format!("Unknown function selector 0x{}", hex::encode(selector)),
                    )
                    .with_details(serde_json::json!({
                        "selector": format!("0x{}", hex::encode(selector)),
                    })),
                );
            }
        }
    }

    if let Some(finding) = authorization_finding(input) {
        analysis.findings.push(finding);
    }

    analysis.intent = intent::build_intent(input, chain, analysis.decoded.as_ref());
    analysis
}

fn decoded_finding(call: &DecodedCall) -> Finding {
    Finding::new(
        Level::Info,
        codes::CALLDATA_DECODED,
        format!("Decoded call to {}", call.signature),
    )
    .with_details(serde_json::to_value(call).unwrap_or(Value::Null))
}

fn unlimited_approval_finding(call: &DecodedCall) -> Option<Finding> {
    if call.signature != "approve(address,uint256)" {
        return None;
    }
    let amount = call.arg("amount")?.as_uint()?;
    if amount != U256::MAX {
        return None;
    }
    let spender = call.arg("spender")?.as_address()?;
    Some(
        Finding::new(
            Level::Warning,
            codes::UNLIMITED_APPROVAL,
            format!("Unlimited token approval to {}", hex_lower(&spender)),
        )
        .with_details(serde_json::json!({
            "spender": hex_lower(&spender),
            "amount": amount.to_string(),
        })),
    )
}

fn authorization_finding(input: &CalldataInput) -> Option<Finding> {
    let list = input.authorization_list.as_deref()?;
    if list.is_empty() {
        return None;
    }
    let delegates: Vec<String> = list.iter().map(|a| a.address.to_string()).collect();
    Some(
        Finding::new(
            Level::Warning,
            codes::EIP7702_AUTHORIZATION,
            format!(
                "Transaction delegates sender account code via EIP-7702 ({} authorization{})",
                list.len(),
                if list.len() == 1 { "" } else { "s" }
            ),
        )
        .with_details(serde_json::json!({
            "delegateCount": list.len(),
            "delegates": delegates,
        })),
    )
}

fn decode_with_sources(
    selector: [u8; 4],
    payload: &[u8],
    contract_abi: Option<&Value>,
    findings: &mut Vec<Finding>,
) -> Option<DecodedCall> {
    if let Some(known) = lookup_known(selector) {
        if let Some(call) = decode_known(selector, payload, known) {
            return Some(call);
        }
    }
    if let Some(abi) = contract_abi {
        if let Some(call) = decode_with_abi(selector, payload, abi) {
            return Some(call);
        }
    }
    if let Some(candidates) = lookup_local(selector) {
        if candidates.len() > 1 {
            findings.push(
                Finding::new(
                    Level::Info,
                    codes::CALLDATA_SIGNATURES,
                    format!(
                        "Selector 0x{} matches {} known signatures",
                        hex::encode(selector),
                        candidates.len()
                    ),
                )
                .with_details(serde_json::json!({ "candidates": candidates })),
            );
        }
        for signature in candidates {
            if let Some(call) = decode_signature(selector, payload, signature, DecodeSource::LocalSelector)
            {
                return Some(call);
            }
        }
    }
    None
}

fn decode_known(selector: [u8; 4], payload: &[u8], known: &KnownFunction) -> Option<DecodedCall> {
    let mut call = decode_signature(selector, payload, known.signature, DecodeSource::KnownAbi)?;
    for (i, (name, _)) in call.args.iter_mut().enumerate() {
        if let Some(display) = known.arg_names.get(i) {
            *name = (*display).to_string();
        }
    }
    call.standard = known.standard.map(str::to_string);
    Some(call)
}

fn decode_signature(
    selector: [u8; 4],
    payload: &[u8],
    signature: &str,
    source: DecodeSource,
) -> Option<DecodedCall> {
    let params = params_of(signature);
    let ty: DynSolType = params.parse().ok()?;
    let decoded = ty.abi_decode_params(payload).ok()?;
    let values = match decoded {
        DynSolValue::Tuple(items) => items,
        single => vec![single],
    };
    let args = values
        .into_iter()
        .enumerate()
        .map(|(i, v)| (format!("arg{i}"), DecodedValue::from_dyn(v)))
        .collect();
    Some(DecodedCall {
        selector,
        signature: signature.to_string(),
        function_name: name_of(signature).to_string(),
        args,
        standard: None,
        source,
    })
}

fn decode_with_abi(selector: [u8; 4], payload: &[u8], abi: &Value) -> Option<DecodedCall> {
    let abi: JsonAbi = serde_json::from_value(abi.clone()).ok()?;
    for function in abi.functions() {
        if function.selector() != selector {
            continue;
        }
        let values = function.abi_decode_input(payload).ok()?;
        let args = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let name = function
                    .inputs
                    .get(i)
                    .map(|p| p.name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("arg{i}"));
                (name, DecodedValue::from_dyn(v))
            })
            .collect();
        return Some(DecodedCall {
            selector,
            signature: function.signature(),
            function_name: function.name.clone(),
            args,
            standard: None,
            source: DecodeSource::ContractAbi,
        });
    }
    None
}

/// Recursively decode the payloads of composite calls.
fn expand_composites(call: &mut DecodedCall) {
    match call.standard.as_deref() {
        Some("multicall") => {
            let inner: Option<Vec<DecodedValue>> = call.arg("data").and_then(|v| match v {
                DecodedValue::Array(items) => Some(
                    items
                        .iter()
                        .map(|item| match item.as_bytes().and_then(|b| decode_inner(b)) {
                            Some(inner_call) => DecodedValue::Call(Box::new(inner_call)),
                            None => item.clone(),
                        })
                        .collect(),
                ),
                _ => None,
            });
            if let Some(inner) = inner {
                call.args.push(("innerCalls".to_string(), DecodedValue::Array(inner)));
            }
        }
        Some("safe") => {
            let inner = call
                .arg("data")
                .and_then(DecodedValue::as_bytes)
                .and_then(|b| decode_inner(b));
            if let Some(inner) = inner {
                call.args
                    .push(("innerCall".to_string(), DecodedValue::Call(Box::new(inner))));
            }
        }
        Some("universal-router") => {
            let names = call
                .arg("commands")
                .and_then(DecodedValue::as_bytes)
                .map(|commands| {
                    commands
                        .iter()
                        .map(|b| universal_router_command(*b))
                        .collect::<Vec<_>>()
                });
            if let Some(names) = names {
                call.args.push((
                    "commandNames".to_string(),
                    DecodedValue::Array(names.into_iter().map(DecodedValue::Str).collect()),
                ));
            }
        }
        _ => {}
    }
}

fn decode_inner(data: &[u8]) -> Option<DecodedCall> {
    if data.len() < 4 {
        return None;
    }
    let selector: [u8; 4] = data[..4].try_into().ok()?;
    let payload = &data[4..];
    if let Some(known) = lookup_known(selector) {
        if let Some(mut call) = decode_known(selector, payload, known) {
            expand_composites(&mut call);
            return Some(call);
        }
    }
    let candidates = lookup_local(selector)?;
    candidates
        .iter()
        .find_map(|sig| decode_signature(selector, payload, sig, DecodeSource::LocalSelector))
}

/// Universal Router command names; the high bit is the allow-revert flag.
fn universal_router_command(byte: u8) -> String {
    let name = match byte & 0x3f {
        0x00 => "V3_SWAP_EXACT_IN",
        0x01 => "V3_SWAP_EXACT_OUT",
        0x02 => "PERMIT2_TRANSFER_FROM",
        0x03 => "PERMIT2_PERMIT_BATCH",
        0x04 => "SWEEP",
        0x05 => "TRANSFER",
        0x06 => "PAY_PORTION",
        0x08 => "V2_SWAP_EXACT_IN",
        0x09 => "V2_SWAP_EXACT_OUT",
        0x0a => "PERMIT2_PERMIT",
        0x0b => "WRAP_ETH",
        0x0c => "UNWRAP_WETH",
        0x0d => "PERMIT2_TRANSFER_FROM_BATCH",
        0x0e => "BALANCE_CHECK_ERC20",
        0x10 => "V4_SWAP",
        0x11 => "V3_POSITION_MANAGER_PERMIT",
        0x12 => "V3_POSITION_MANAGER_CALL",
        0x13 => "V4_INITIALIZE_POOL",
        0x14 => "V4_POSITION_MANAGER_CALL",
        0x21 => "EXECUTE_SUB_PLAN",
        _ => return format!("COMMAND_0x{byte:02x}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use alloy_sol_types::{SolCall, sol};

    sol! {
        function approve(address spender, uint256 amount) returns (bool);
        function transfer(address to, uint256 amount) returns (bool);
        function setApprovalForAll(address operator, bool approved);
    }

    fn input(to: &str, data: Vec<u8>) -> CalldataInput {
        CalldataInput {
            to: to.parse().unwrap(),
            from: None,
            data: data.into(),
            value: None,
            chain: None,
            authorization_list: None,
        }
    }

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const PERMIT2: &str = "0x000000000022d473030f116ddee9f6b43ac78ba3";

    #[test]
    fn decodes_unlimited_approve_and_flags_it() {
        let data = approveCall {
            spender: PERMIT2.parse().unwrap(),
            amount: U256::MAX,
        }
        .abi_encode();
        let analysis = analyze_calldata(&input(USDC, data), Chain::Ethereum, None);

        let decoded = analysis.decoded.as_ref().unwrap();
        assert_eq!(decoded.function_name, "approve");
        assert_eq!(decoded.source, DecodeSource::KnownAbi);
        assert_eq!(decoded.standard.as_deref(), Some("erc20"));
        assert_eq!(
            decoded.arg("spender").unwrap().as_address(),
            Some(PERMIT2.parse().unwrap())
        );
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::UNLIMITED_APPROVAL && f.level == Level::Warning)
        );
        assert!(analysis.findings.iter().any(|f| f.code == codes::CALLDATA_DECODED));
        let intent = analysis.intent.unwrap();
        assert!(intent.contains("UNLIMITED"), "intent was: {intent}");
        assert!(intent.contains("USDC"), "intent was: {intent}");
    }

    #[test]
    fn bounded_approve_is_not_flagged() {
        let data = approveCall {
            spender: PERMIT2.parse().unwrap(),
            amount: U256::from(1_000_000u64),
        }
        .abi_encode();
        let analysis = analyze_calldata(&input(USDC, data), Chain::Ethereum, None);
        assert!(
            !analysis
                .findings
                .iter()
                .any(|f| f.code == codes::UNLIMITED_APPROVAL)
        );
    }

    #[test]
    fn empty_calldata_is_an_eth_send() {
        let mut base = input(USDC, Vec::new());
        base.value = Some(U256::from(10).pow(U256::from(18)));
        let analysis = analyze_calldata(&base, Chain::Ethereum, None);
        assert!(analysis.findings.iter().any(|f| f.code == codes::CALLDATA_EMPTY));
        let intent = analysis.intent.unwrap();
        assert!(intent.starts_with("Send 1 ETH"), "intent was: {intent}");
    }

    #[test]
    fn unknown_selector_is_reported() {
        let analysis = analyze_calldata(
            &input(USDC, vec![0xde, 0xad, 0xbe, 0xef, 0x00]),
            Chain::Ethereum,
            None,
        );
        assert!(analysis.decoded.is_none());
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::CALLDATA_UNKNOWN_SELECTOR)
        );
    }

    #[test]
    fn contract_abi_wins_over_selector_db() {
        let abi = serde_json::json!([{
            "type": "function",
            "name": "rescueFunds",
            "stateMutability": "nonpayable",
            "inputs": [
                { "name": "token", "type": "address" },
                { "name": "amount", "type": "uint256" }
            ],
            "outputs": []
        }]);
        let selector = selectors::selector_of("rescueFunds(address,uint256)");
        let mut data = selector.to_vec();
        data.extend_from_slice(
            &approveCall {
                spender: USDC.parse().unwrap(),
                amount: U256::from(5u64),
            }
            .abi_encode()[4..],
        );
        let analysis = analyze_calldata(&input(USDC, data), Chain::Ethereum, Some(&abi));
        let decoded = analysis.decoded.unwrap();
        assert_eq!(decoded.function_name, "rescueFunds");
        assert_eq!(decoded.source, DecodeSource::ContractAbi);
        assert_eq!(decoded.arg("amount").unwrap().as_uint(), Some(U256::from(5u64)));
    }

    #[test]
    fn selector_collisions_surface_all_candidates() {
        let selector = selectors::selector_of("balanceOf(address)");
        let mut data = selector.to_vec();
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address!("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984").as_slice());
        data.extend_from_slice(&word);
        let analysis = analyze_calldata(&input(USDC, data), Chain::Ethereum, None);
        assert!(
            analysis
                .findings
                .iter()
                .any(|f| f.code == codes::CALLDATA_SIGNATURES)
        );
        let decoded = analysis.decoded.unwrap();
        assert_eq!(decoded.source, DecodeSource::LocalSelector);
        assert_eq!(decoded.function_name, "balanceOf");
    }

    #[test]
    fn authorization_list_raises_a_warning_and_intent() {
        let mut base = input(USDC, Vec::new());
        base.authorization_list = Some(vec![AuthorizationEntry {
            address: "0x1234000000000000000000000000000000005678".parse().unwrap(),
            chain_id: 1,
            nonce: 7,
        }]);
        let analysis = analyze_calldata(&base, Chain::Ethereum, None);
        let finding = analysis
            .findings
            .iter()
            .find(|f| f.code == codes::EIP7702_AUTHORIZATION)
            .unwrap();
        assert_eq!(finding.level, Level::Warning);
        assert_eq!(
            finding.details.as_ref().unwrap()["delegateCount"],
            serde_json::json!(1)
        );
        let intent = analysis.intent.unwrap();
        assert!(
            intent.contains("Delegate sender EOA to 0x1234…5678 via EIP-7702"),
            "intent was: {intent}"
        );
    }

    #[test]
    fn decoded_call_serializes_camel_case() {
        let data = transferCall {
            to: PERMIT2.parse().unwrap(),
            amount: U256::from(42u64),
        }
        .abi_encode();
        let analysis = analyze_calldata(&input(USDC, data), Chain::Ethereum, None);
        let json = serde_json::to_value(analysis.decoded.unwrap()).unwrap();
        assert_eq!(json["functionName"], "transfer");
        assert_eq!(json["args"]["amount"], "42");
        assert_eq!(json["source"], "known-abi");
        assert_eq!(json["selector"], "0xa9059cbb");
    }
}

//! Human-readable one-line intents for decoded calls.

use alloy_primitives::{Address, U256, address};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::{CalldataInput, DecodedCall, DecodedValue};
use crate::chains::{Chain, hex_lower};

/// Display metadata for tokens whose symbols are worth hardcoding.
static KNOWN_TOKENS: Lazy<HashMap<(Chain, Address), (&'static str, u8)>> = Lazy::new(|| {
    use Chain::*;
    HashMap::from([
        (
            (Ethereum, address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")),
            ("USDC", 6u8),
        ),
        (
            (Ethereum, address!("0xdac17f958d2ee523a2206206994597c13d831ec7")),
            ("USDT", 6),
        ),
        (
            (Ethereum, address!("0x6b175474e89094c44da98b954eedeac495271d0f")),
            ("DAI", 18),
        ),
        (
            (Ethereum, address!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")),
            ("WETH", 18),
        ),
        (
            (Ethereum, address!("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984")),
            ("UNI", 18),
        ),
        (
            (Base, address!("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913")),
            ("USDC", 6),
        ),
        (
            (Base, address!("0x4200000000000000000000000000000000000006")),
            ("WETH", 18),
        ),
        (
            (Arbitrum, address!("0xaf88d065e77c8cc2239327c5edb3a432268e5831")),
            ("USDC", 6),
        ),
        (
            (Optimism, address!("0x0b2c639c533813f4aa9d7837caf62653d097ff85")),
            ("USDC", 6),
        ),
        (
            (Polygon, address!("0x3c499c542cef5e3811e1192ce70d8cc03d5c3359")),
            ("USDC", 6),
        ),
    ])
});

const PERMIT2_MAX: &str = "1461501637330902918203684832716283019655932542975"; // 2^160 - 1
const DEFAULT_DISPLAY_DIGITS: usize = 4;

pub fn token_display(chain: Chain, token: Address) -> Option<(&'static str, u8)> {
    KNOWN_TOKENS.get(&(chain, token)).copied()
}

/// `0x1234…5678`: enough to recognize, short enough to read.
pub fn short_address(address: &Address) -> String {
    let full = hex_lower(address);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

/// Whether an amount is the conventional "unlimited" sentinel for its width.
pub fn is_unlimited(amount: U256, permit2_width: bool) -> bool {
    if amount == U256::MAX {
        return true;
    }
    permit2_width && amount.to_string() == PERMIT2_MAX
}

/// Format a base-unit amount with `decimals`, half-even rounded to at most
/// [`DEFAULT_DISPLAY_DIGITS`] fraction digits.
pub fn format_token_amount(amount: U256, decimals: u8, max_fraction_digits: usize) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let base = U256::from(10).pow(U256::from(decimals as u64));
    let mut integer = amount / base;
    let fraction = amount % base;

    let digits = if usize::from(decimals) <= max_fraction_digits {
        let mut s = format!("{fraction:0>width$}", width = decimals as usize);
        while s.ends_with('0') {
            s.pop();
        }
        s
    } else {
        let dropped = u64::from(decimals) - max_fraction_digits as u64;
        let scale = U256::from(10).pow(U256::from(dropped));
        let mut kept = fraction / scale;
        let remainder = fraction % scale;
        let half = scale / U256::from(2);
        let round_up = remainder > half
            || (remainder == half && kept.bit(0));
        if round_up {
            kept += U256::from(1);
        }
        let cap = U256::from(10).pow(U256::from(max_fraction_digits as u64));
        if kept == cap {
            integer += U256::from(1);
            kept = U256::ZERO;
        }
        let mut s = format!("{kept:0>width$}", width = max_fraction_digits);
        while s.ends_with('0') {
            s.pop();
        }
        s
    };

    if digits.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{digits}")
    }
}

fn amount_text(amount: U256, symbol_decimals: Option<(&str, u8)>, permit2_width: bool) -> String {
    if is_unlimited(amount, permit2_width) {
        return "UNLIMITED".to_string();
    }
    match symbol_decimals {
        Some((_, decimals)) => format_token_amount(amount, decimals, DEFAULT_DISPLAY_DIGITS),
        None => amount.to_string(),
    }
}

/// Build the one-line intent for an input, preferring the EIP-7702
/// delegation over whatever the calldata itself does.
pub fn build_intent(
    input: &CalldataInput,
    chain: Chain,
    decoded: Option<&DecodedCall>,
) -> Option<String> {
    let delegates = input.delegates();
    if !delegates.is_empty() {
        let targets: Vec<String> = delegates
            .iter()
            .map(|d| short_address(&d.0))
            .collect();
        return Some(format!(
            "Delegate sender EOA to {} via EIP-7702",
            targets.join(", ")
        ));
    }

    match decoded {
        Some(call) => Some(describe_call(call, chain, input)),
        None => {
            if input.data.is_empty() {
                let value = input.value.unwrap_or(U256::ZERO);
                if value.is_zero() {
                    None
                } else {
                    Some(format!(
                        "Send {} {} to {}",
                        format_token_amount(value, 18, DEFAULT_DISPLAY_DIGITS),
                        chain.native_symbol(),
                        short_address(&input.to.0)
                    ))
                }
            } else {
                Some(format!("Call {}", short_address(&input.to.0)))
            }
        }
    }
}

fn token_symbol(chain: Chain, token: Address) -> String {
    token_display(chain, token)
        .map(|(symbol, _)| symbol.to_string())
        .unwrap_or_else(|| short_address(&token))
}

fn describe_call(call: &DecodedCall, chain: Chain, input: &CalldataInput) -> String {
    let target = input.to.0;
    match (call.standard.as_deref(), call.function_name.as_str()) {
        (Some("erc20"), "approve") => {
            let spender = call.arg("spender").and_then(DecodedValue::as_address);
            let amount = call.arg("amount").and_then(DecodedValue::as_uint);
            match (spender, amount) {
                (Some(spender), Some(amount)) => {
                    let display = token_display(chain, target);
                    let symbol = display
                        .map(|(s, _)| s.to_string())
                        .unwrap_or_else(|| "tokens".to_string());
                    format!(
                        "Approve {} to spend {} {}",
                        short_address(&spender),
                        amount_text(amount, display.map(|(s, d)| (s, d)), false),
                        symbol
                    )
                }
                _ => generic_call(call, &target),
            }
        }
        (Some("erc20"), "transfer") => {
            let to = call.arg("to").and_then(DecodedValue::as_address);
            let amount = call.arg("amount").and_then(DecodedValue::as_uint);
            match (to, amount) {
                (Some(to), Some(amount)) => {
                    let display = token_display(chain, target);
                    format!(
                        "Transfer {} {} to {}",
                        amount_text(amount, display, false),
                        token_symbol(chain, target),
                        short_address(&to)
                    )
                }
                _ => generic_call(call, &target),
            }
        }
        (Some("erc20"), "transferFrom") => {
            let from = call.arg("from").and_then(DecodedValue::as_address);
            let to = call.arg("to").and_then(DecodedValue::as_address);
            match (from, to) {
                (Some(from), Some(to)) => format!(
                    "Transfer {} from {} to {}",
                    token_symbol(chain, target),
                    short_address(&from),
                    short_address(&to)
                ),
                _ => generic_call(call, &target),
            }
        }
        (Some("erc721") | Some("erc1155"), "setApprovalForAll") => {
            let operator = call.arg("operator").and_then(DecodedValue::as_address);
            let approved = matches!(call.arg("approved"), Some(DecodedValue::Bool(true)));
            match operator {
                Some(operator) if approved => format!(
                    "Grant {} operator access to ALL tokens of {}",
                    short_address(&operator),
                    short_address(&target)
                ),
                Some(operator) => format!(
                    "Revoke operator access of {} on {}",
                    short_address(&operator),
                    short_address(&target)
                ),
                None => generic_call(call, &target),
            }
        }
        (Some("permit2"), "approve") => {
            let token = call.arg("token").and_then(DecodedValue::as_address);
            let spender = call.arg("spender").and_then(DecodedValue::as_address);
            let amount = call.arg("amount").and_then(DecodedValue::as_uint);
            match (token, spender, amount) {
                (Some(token), Some(spender), Some(amount)) => {
                    let display = token_display(chain, token);
                    format!(
                        "Permit2: approve {} to spend {} {}",
                        short_address(&spender),
                        amount_text(amount, display, true),
                        token_symbol(chain, token)
                    )
                }
                _ => generic_call(call, &target),
            }
        }
        (Some("eip2612"), "permit") => {
            let spender = call.arg("spender").and_then(DecodedValue::as_address);
            match spender {
                Some(spender) => format!(
                    "Permit {} to spend {}",
                    short_address(&spender),
                    token_symbol(chain, target)
                ),
                None => generic_call(call, &target),
            }
        }
        (Some("uups"), "upgradeTo") | (Some("uups"), "upgradeToAndCall") => {
            match call.arg("newImplementation").and_then(DecodedValue::as_address) {
                Some(implementation) => format!(
                    "Upgrade proxy {} to implementation {}",
                    short_address(&target),
                    short_address(&implementation)
                ),
                None => generic_call(call, &target),
            }
        }
        (Some("safe"), "execTransaction") => {
            let inner = call.arg("innerCall").and_then(|v| match v {
                DecodedValue::Call(inner) => Some(inner_summary(inner, chain, call)),
                _ => None,
            });
            match inner {
                Some(inner) => format!("Safe exec → {inner}"),
                None => format!("Safe exec on {}", short_address(&target)),
            }
        }
        (Some("universal-router"), "execute") => {
            let names: Vec<String> = call
                .arg("commandNames")
                .map(|v| match v {
                    DecodedValue::Array(items) => items
                        .iter()
                        .filter_map(|i| match i {
                            DecodedValue::Str(s) => Some(s.clone()),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                })
                .unwrap_or_default();
            if names.is_empty() {
                "Uniswap Universal Router execution".to_string()
            } else {
                format!("Uniswap Universal Router: {}", names.join(" → "))
            }
        }
        (Some("multicall"), _) => {
            let count = call
                .arg("innerCalls")
                .map(|v| match v {
                    DecodedValue::Array(items) => items.len(),
                    _ => 0,
                })
                .unwrap_or(0);
            format!("Multicall with {count} inner calls")
        }
        (Some("aave"), "supply") => {
            let asset = call.arg("asset").and_then(DecodedValue::as_address);
            let amount = call.arg("amount").and_then(DecodedValue::as_uint);
            match (asset, amount) {
                (Some(asset), Some(amount)) => {
                    let display = token_display(chain, asset);
                    format!(
                        "Supply {} {} to Aave",
                        amount_text(amount, display, false),
                        token_symbol(chain, asset)
                    )
                }
                _ => generic_call(call, &target),
            }
        }
        (Some("aave"), "flashLoan") | (Some("aave"), "flashLoanSimple") => {
            "Aave flash loan".to_string()
        }
        (Some("weth"), "deposit") => {
            let value = input.value.unwrap_or(U256::ZERO);
            format!(
                "Wrap {} {}",
                format_token_amount(value, 18, DEFAULT_DISPLAY_DIGITS),
                chain.native_symbol()
            )
        }
        (Some("weth"), "withdraw") => {
            let amount = call
                .arg("amount")
                .and_then(DecodedValue::as_uint)
                .unwrap_or(U256::ZERO);
            format!(
                "Unwrap {} {}",
                format_token_amount(amount, 18, DEFAULT_DISPLAY_DIGITS),
                chain.wrapped_native().symbol
            )
        }
        (Some("cctp"), "depositForBurn") => {
            match call.arg("destinationDomain").and_then(DecodedValue::as_uint) {
                Some(domain) => format!("Bridge via CCTP to domain {domain}"),
                None => "Bridge via CCTP".to_string(),
            }
        }
        (Some("entrypoint-v06") | Some("entrypoint-v07"), "handleOps") => {
            "Submit ERC-4337 user operations".to_string()
        }
        _ => generic_call(call, &target),
    }
}

/// Compact `symbol fn(args)` rendering for an inner call of a wrapper.
fn inner_summary(inner: &DecodedCall, chain: Chain, outer: &DecodedCall) -> String {
    let inner_target = outer
        .arg("to")
        .and_then(DecodedValue::as_address);
    let prefix = inner_target
        .map(|t| token_symbol(chain, t))
        .unwrap_or_default();
    let rendered_args: Vec<String> = inner
        .args
        .iter()
        .filter(|(name, _)| name != "innerCall" && name != "innerCalls")
        .map(|(_, value)| match value {
            DecodedValue::Address(a) => short_address(a),
            DecodedValue::Uint(u) if is_unlimited(*u, false) => "UNLIMITED".to_string(),
            DecodedValue::Uint(u) => u.to_string(),
            DecodedValue::Bool(b) => b.to_string(),
            _ => "…".to_string(),
        })
        .collect();
    let body = format!("{}({})", inner.function_name, rendered_args.join(", "));
    if prefix.is_empty() {
        body
    } else {
        format!("{prefix} {body}")
    }
}

fn generic_call(call: &DecodedCall, target: &Address) -> String {
    format!("Call {} on {}", call.function_name, short_address(target))
}

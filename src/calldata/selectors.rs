//! Function-selector tables: well-known standard ABIs and the offline
//! selector database fallback.

use alloy_primitives::keccak256;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A function known from a standard ABI, with display names for arguments.
#[derive(Debug, Clone, Copy)]
pub struct KnownFunction {
    pub signature: &'static str,
    pub name: &'static str,
    pub arg_names: &'static [&'static str],
    pub standard: Option<&'static str>,
}

/// 4-byte selector of a canonical signature string.
pub fn selector_of(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

macro_rules! known {
    ($sig:expr, $name:expr, [$($arg:expr),*], $standard:expr) => {
        KnownFunction {
            signature: $sig,
            name: $name,
            arg_names: &[$($arg),*],
            standard: $standard,
        }
    };
}

static KNOWN_FUNCTIONS: Lazy<HashMap<[u8; 4], KnownFunction>> = Lazy::new(|| {
    let functions = [
        // ERC-20
        known!("transfer(address,uint256)", "transfer", ["to", "amount"], Some("erc20")),
        known!("approve(address,uint256)", "approve", ["spender", "amount"], Some("erc20")),
        known!(
            "transferFrom(address,address,uint256)",
            "transferFrom",
            ["from", "to", "amount"],
            Some("erc20")
        ),
        known!(
            "increaseAllowance(address,uint256)",
            "increaseAllowance",
            ["spender", "addedValue"],
            Some("erc20")
        ),
        // ERC-721 / ERC-1155
        known!(
            "setApprovalForAll(address,bool)",
            "setApprovalForAll",
            ["operator", "approved"],
            Some("erc721")
        ),
        known!(
            "safeTransferFrom(address,address,uint256)",
            "safeTransferFrom",
            ["from", "to", "tokenId"],
            Some("erc721")
        ),
        known!(
            "safeTransferFrom(address,address,uint256,bytes)",
            "safeTransferFrom",
            ["from", "to", "tokenId", "data"],
            Some("erc721")
        ),
        known!(
            "safeTransferFrom(address,address,uint256,uint256,bytes)",
            "safeTransferFrom",
            ["from", "to", "id", "amount", "data"],
            Some("erc1155")
        ),
        known!(
            "safeBatchTransferFrom(address,address,uint256[],uint256[],bytes)",
            "safeBatchTransferFrom",
            ["from", "to", "ids", "amounts", "data"],
            Some("erc1155")
        ),
        // Wrapped native
        known!("deposit()", "deposit", [], Some("weth")),
        known!("withdraw(uint256)", "withdraw", ["amount"], Some("weth")),
        // Permit2
        known!(
            "approve(address,address,uint160,uint48)",
            "approve",
            ["token", "spender", "amount", "expiration"],
            Some("permit2")
        ),
        known!(
            "permit(address,((address,uint160,uint48,uint48),address,uint256),bytes)",
            "permit",
            ["owner", "permitSingle", "signature"],
            Some("permit2")
        ),
        known!(
            "permit(address,((address,uint160,uint48,uint48)[],address,uint256),bytes)",
            "permit",
            ["owner", "permitBatch", "signature"],
            Some("permit2")
        ),
        known!(
            "transferFrom(address,address,uint160,address)",
            "transferFrom",
            ["from", "to", "amount", "token"],
            Some("permit2")
        ),
        // EIP-2612
        known!(
            "permit(address,address,uint256,uint256,uint8,bytes32,bytes32)",
            "permit",
            ["owner", "spender", "value", "deadline", "v", "r", "s"],
            Some("eip2612")
        ),
        // Proxy upgrades
        known!("upgradeTo(address)", "upgradeTo", ["newImplementation"], Some("uups")),
        known!(
            "upgradeToAndCall(address,bytes)",
            "upgradeToAndCall",
            ["newImplementation", "data"],
            Some("uups")
        ),
        known!(
            "upgrade(address,address)",
            "upgrade",
            ["proxy", "implementation"],
            Some("proxy-admin")
        ),
        known!(
            "upgradeAndCall(address,address,bytes)",
            "upgradeAndCall",
            ["proxy", "implementation", "data"],
            Some("proxy-admin")
        ),
        // Safe
        known!(
            "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
            "execTransaction",
            [
                "to",
                "value",
                "data",
                "operation",
                "safeTxGas",
                "baseGas",
                "gasPrice",
                "gasToken",
                "refundReceiver",
                "signatures"
            ],
            Some("safe")
        ),
        // Uniswap Universal Router
        known!(
            "execute(bytes,bytes[],uint256)",
            "execute",
            ["commands", "inputs", "deadline"],
            Some("universal-router")
        ),
        known!(
            "execute(bytes,bytes[])",
            "execute",
            ["commands", "inputs"],
            Some("universal-router")
        ),
        // Multicall variants
        known!("multicall(bytes[])", "multicall", ["data"], Some("multicall")),
        known!(
            "multicall(uint256,bytes[])",
            "multicall",
            ["deadline", "data"],
            Some("multicall")
        ),
        // 1inch v5
        known!(
            "swap(address,(address,address,address,address,uint256,uint256,uint256),bytes,bytes)",
            "swap",
            ["executor", "desc", "permit", "data"],
            Some("1inch")
        ),
        // Seaport basic order
        known!(
            "fulfillBasicOrder((address,uint256,uint256,address,address,address,uint256,uint256,uint8,uint256,uint256,bytes32,uint256,bytes32,bytes32,uint256,(uint256,address)[],bytes))",
            "fulfillBasicOrder",
            ["parameters"],
            Some("seaport")
        ),
        // CCTP
        known!(
            "depositForBurn(uint256,uint32,bytes32,address)",
            "depositForBurn",
            ["amount", "destinationDomain", "mintRecipient", "burnToken"],
            Some("cctp")
        ),
        // ERC-4337 entry points
        known!(
            "handleOps((address,uint256,bytes,bytes,uint256,uint256,uint256,uint256,uint256,bytes,bytes)[],address)",
            "handleOps",
            ["ops", "beneficiary"],
            Some("entrypoint-v06")
        ),
        known!(
            "handleOps((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)[],address)",
            "handleOps",
            ["ops", "beneficiary"],
            Some("entrypoint-v07")
        ),
        // Aave v3
        known!(
            "supply(address,uint256,address,uint16)",
            "supply",
            ["asset", "amount", "onBehalfOf", "referralCode"],
            Some("aave")
        ),
        known!(
            "withdraw(address,uint256,address)",
            "withdraw",
            ["asset", "amount", "to"],
            Some("aave")
        ),
        known!(
            "flashLoan(address,address[],uint256[],uint256[],address,bytes,uint16)",
            "flashLoan",
            [
                "receiver",
                "assets",
                "amounts",
                "interestRateModes",
                "onBehalfOf",
                "params",
                "referralCode"
            ],
            Some("aave")
        ),
        known!(
            "flashLoanSimple(address,address,uint256,bytes,uint16)",
            "flashLoanSimple",
            ["receiver", "asset", "amount", "params", "referralCode"],
            Some("aave")
        ),
    ];
    functions
        .into_iter()
        .map(|f| (selector_of(f.signature), f))
        .collect()
});

/// Offline signature-database subset. Values may hold several candidate
/// signatures for one selector; all candidates are surfaced to the caller.
static LOCAL_SELECTORS: Lazy<HashMap<[u8; 4], Vec<&'static str>>> = Lazy::new(|| {
    let entries: [&[&'static str]; 14] = [
        &["mint(address,uint256)"],
        &["burn(uint256)"],
        &["stake(uint256)"],
        &["unstake(uint256)"],
        &["claim()"],
        &["deposit(uint256)"],
        &["redeem(uint256)"],
        &["approveAndCall(address,uint256,bytes)"],
        &["swapExactETHForTokens(uint256,address[],address,uint256)"],
        &["swapExactTokensForTokens(uint256,uint256,address[],address,uint256)"],
        &["swapExactTokensForETH(uint256,uint256,address[],address,uint256)"],
        &["delegate(address)"],
        &["exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))"],
        // The 4byte directory has real collisions; all candidates are kept.
        &[
            "balanceOf(address)",
            "branch_passphrase_public(uint256,bytes8)",
            "passphrase_calculate_transfer(uint64,address)",
        ],
    ];
    entries
        .into_iter()
        .map(|sigs| (selector_of(sigs[0]), sigs.to_vec()))
        .collect()
});

pub fn lookup_known(selector: [u8; 4]) -> Option<&'static KnownFunction> {
    KNOWN_FUNCTIONS.get(&selector)
}

pub fn lookup_local(selector: [u8; 4]) -> Option<&'static [&'static str]> {
    LOCAL_SELECTORS.get(&selector).map(Vec::as_slice)
}

/// Extract the parenthesized parameter list of a signature string, e.g.
/// `approve(address,uint256)` → `(address,uint256)`.
pub fn params_of(signature: &str) -> &str {
    match signature.find('(') {
        Some(open) => &signature[open..],
        None => "()",
    }
}

/// Function name part of a signature string.
pub fn name_of(signature: &str) -> &str {
    match signature.find('(') {
        Some(open) => &signature[..open],
        None => signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_selectors_match_the_wire() {
        assert_eq!(selector_of("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector_of("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(
            selector_of("transferFrom(address,address,uint256)"),
            [0x23, 0xb8, 0x72, 0xdd]
        );
        assert_eq!(selector_of("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn known_table_resolves_approve() {
        let f = lookup_known(selector_of("approve(address,uint256)")).unwrap();
        assert_eq!(f.name, "approve");
        assert_eq!(f.arg_names, &["spender", "amount"]);
        assert_eq!(f.standard, Some("erc20"));
    }

    #[test]
    fn local_db_keeps_all_collision_candidates() {
        let candidates = lookup_local(selector_of("balanceOf(address)")).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], "balanceOf(address)");
    }

    #[test]
    fn signature_splitting() {
        assert_eq!(params_of("approve(address,uint256)"), "(address,uint256)");
        assert_eq!(name_of("approve(address,uint256)"), "approve");
        assert_eq!(params_of("deposit()"), "()");
    }
}

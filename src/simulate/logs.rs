//! Strict per-event receipt-log parsers. Unknown logs are ignored, never
//! errors.
//!
//! ERC-20 and ERC-721 share the `Transfer(address,address,uint256)` topic;
//! they are told apart by topic count (the 721 `tokenId` is indexed). The
//! same applies to `Approval`. Permit2's `Approval` has its own signature
//! and is recognized by topic hash.

use alloy_primitives::{Address, B256, LogData, U256};
use alloy_sol_types::{SolEvent, sol};

use super::fork::SimLog;
use super::{ApprovalScope, ApprovalStandard, AssetKind};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
    event ApprovalForAll(address indexed owner, address indexed operator, bool approved);
    event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
    event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
}

/// keccak of Permit2's `Approval(address,address,address,uint160,uint48)`.
/// Declared by hand because its name collides with the ERC-20 event above.
fn permit2_approval_topic() -> B256 {
    alloy_primitives::keccak256(b"Approval(address,address,address,uint160,uint48)")
}

/// A token movement extracted from one log.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub token: Address,
    pub kind: AssetKind,
    pub from: Address,
    pub to: Address,
    pub amount: Option<U256>,
    pub token_id: Option<U256>,
}

/// An allowance mutation extracted from one log.
#[derive(Debug, Clone)]
pub struct ApprovalEvent {
    pub standard: ApprovalStandard,
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: Option<U256>,
    pub token_id: Option<U256>,
    pub scope: Option<ApprovalScope>,
    pub approved: Option<bool>,
    pub expiration: Option<u64>,
}

/// Walk receipt logs and extract `(transfers, approvals)`.
pub fn parse_logs(logs: &[SimLog]) -> (Vec<TransferEvent>, Vec<ApprovalEvent>) {
    let mut transfers = Vec::new();
    let mut approvals = Vec::new();
    let permit2_topic = permit2_approval_topic();

    for log in logs {
        let Some(&topic0) = log.topics.first() else {
            continue;
        };
        if topic0 == Transfer::SIGNATURE_HASH {
            parse_transfer(log, &mut transfers);
        } else if topic0 == Approval::SIGNATURE_HASH {
            parse_approval(log, &mut approvals);
        } else if topic0 == ApprovalForAll::SIGNATURE_HASH {
            if let Ok(event) = ApprovalForAll::decode_log_data(&log_data(log)) {
                approvals.push(ApprovalEvent {
                    standard: ApprovalStandard::Erc721,
                    token: log.address,
                    owner: event.owner,
                    spender: event.operator,
                    amount: None,
                    token_id: None,
                    scope: Some(ApprovalScope::All),
                    approved: Some(event.approved),
                    expiration: None,
                });
            }
        } else if topic0 == TransferSingle::SIGNATURE_HASH {
            if let Ok(event) = TransferSingle::decode_log_data(&log_data(log)) {
                transfers.push(TransferEvent {
                    token: log.address,
                    kind: AssetKind::Erc1155,
                    from: event.from,
                    to: event.to,
                    amount: Some(event.value),
                    token_id: Some(event.id),
                });
            }
        } else if topic0 == TransferBatch::SIGNATURE_HASH {
            if let Ok(event) = TransferBatch::decode_log_data(&log_data(log)) {
                for (id, value) in event.ids.iter().zip(event.values.iter()) {
                    transfers.push(TransferEvent {
                        token: log.address,
                        kind: AssetKind::Erc1155,
                        from: event.from,
                        to: event.to,
                        amount: Some(*value),
                        token_id: Some(*id),
                    });
                }
            }
        } else if topic0 == permit2_topic {
            parse_permit2_approval(log, &mut approvals);
        }
    }

    (transfers, approvals)
}

fn log_data(log: &SimLog) -> LogData {
    LogData::new_unchecked(log.topics.clone(), log.data.clone())
}

fn topic_address(topic: &B256) -> Address {
    Address::from_word(*topic)
}

fn parse_transfer(log: &SimLog, transfers: &mut Vec<TransferEvent>) {
    match log.topics.len() {
        // ERC-20: value lives in the data section.
        3 if log.data.len() >= 32 => transfers.push(TransferEvent {
            token: log.address,
            kind: AssetKind::Erc20,
            from: topic_address(&log.topics[1]),
            to: topic_address(&log.topics[2]),
            amount: Some(U256::from_be_slice(&log.data[..32])),
            token_id: None,
        }),
        // ERC-721: tokenId is the third indexed topic.
        4 => transfers.push(TransferEvent {
            token: log.address,
            kind: AssetKind::Erc721,
            from: topic_address(&log.topics[1]),
            to: topic_address(&log.topics[2]),
            amount: None,
            token_id: Some(log.topics[3].into()),
        }),
        _ => {}
    }
}

fn parse_approval(log: &SimLog, approvals: &mut Vec<ApprovalEvent>) {
    match log.topics.len() {
        3 if log.data.len() >= 32 => approvals.push(ApprovalEvent {
            standard: ApprovalStandard::Erc20,
            token: log.address,
            owner: topic_address(&log.topics[1]),
            spender: topic_address(&log.topics[2]),
            amount: Some(U256::from_be_slice(&log.data[..32])),
            token_id: None,
            scope: Some(ApprovalScope::Token),
            approved: None,
            expiration: None,
        }),
        4 => {
            let spender = topic_address(&log.topics[2]);
            approvals.push(ApprovalEvent {
                standard: ApprovalStandard::Erc721,
                token: log.address,
                owner: topic_address(&log.topics[1]),
                spender,
                amount: None,
                token_id: Some(log.topics[3].into()),
                scope: Some(ApprovalScope::Token),
                approved: Some(spender != Address::ZERO),
                expiration: None,
            });
        }
        _ => {}
    }
}

fn parse_permit2_approval(log: &SimLog, approvals: &mut Vec<ApprovalEvent>) {
    if log.topics.len() != 4 || log.data.len() < 64 {
        return;
    }
    let amount = U256::from_be_slice(&log.data[..32]);
    let expiration = U256::from_be_slice(&log.data[32..64]);
    approvals.push(ApprovalEvent {
        standard: ApprovalStandard::Permit2,
        token: topic_address(&log.topics[2]),
        owner: topic_address(&log.topics[1]),
        spender: topic_address(&log.topics[3]),
        amount: Some(amount),
        token_id: None,
        scope: Some(ApprovalScope::Token),
        approved: None,
        expiration: u64::try_from(expiration).ok(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, address};

    fn word_address(address: Address) -> B256 {
        address.into_word()
    }

    fn uint_word(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    const TOKEN: Address = address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    const ALICE: Address = address!("0x1111111111111111111111111111111111111111");
    const BOB: Address = address!("0x2222222222222222222222222222222222222222");

    #[test]
    fn erc20_transfer_by_topic_count() {
        let log = SimLog {
            address: TOKEN,
            topics: vec![
                Transfer::SIGNATURE_HASH,
                word_address(ALICE),
                word_address(BOB),
            ],
            data: Bytes::copy_from_slice(&uint_word(500)),
        };
        let (transfers, approvals) = parse_logs(&[log]);
        assert!(approvals.is_empty());
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].kind, AssetKind::Erc20);
        assert_eq!(transfers[0].from, ALICE);
        assert_eq!(transfers[0].to, BOB);
        assert_eq!(transfers[0].amount, Some(U256::from(500u64)));
        assert_eq!(transfers[0].token_id, None);
    }

    #[test]
    fn erc721_transfer_by_topic_count() {
        let log = SimLog {
            address: TOKEN,
            topics: vec![
                Transfer::SIGNATURE_HASH,
                word_address(ALICE),
                word_address(BOB),
                B256::from(U256::from(42u64)),
            ],
            data: Bytes::new(),
        };
        let (transfers, _) = parse_logs(&[log]);
        assert_eq!(transfers[0].kind, AssetKind::Erc721);
        assert_eq!(transfers[0].token_id, Some(U256::from(42u64)));
        assert_eq!(transfers[0].amount, None);
    }

    #[test]
    fn erc20_approval_and_approval_for_all() {
        let approval = SimLog {
            address: TOKEN,
            topics: vec![
                Approval::SIGNATURE_HASH,
                word_address(ALICE),
                word_address(BOB),
            ],
            data: Bytes::copy_from_slice(&U256::MAX.to_be_bytes::<32>()),
        };
        let mut all_data = [0u8; 32];
        all_data[31] = 1;
        let approval_for_all = SimLog {
            address: TOKEN,
            topics: vec![
                ApprovalForAll::SIGNATURE_HASH,
                word_address(ALICE),
                word_address(BOB),
            ],
            data: Bytes::copy_from_slice(&all_data),
        };
        let (_, approvals) = parse_logs(&[approval, approval_for_all]);
        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[0].standard, ApprovalStandard::Erc20);
        assert_eq!(approvals[0].amount, Some(U256::MAX));
        assert_eq!(approvals[1].scope, Some(ApprovalScope::All));
        assert_eq!(approvals[1].approved, Some(true));
        assert_eq!(approvals[1].spender, BOB);
    }

    #[test]
    fn erc1155_single_and_batch() {
        let mut single_data = Vec::new();
        single_data.extend_from_slice(&uint_word(7));
        single_data.extend_from_slice(&uint_word(3));
        let single = SimLog {
            address: TOKEN,
            topics: vec![
                TransferSingle::SIGNATURE_HASH,
                word_address(ALICE),
                word_address(ALICE),
                word_address(BOB),
            ],
            data: single_data.into(),
        };

        // (uint256[] ids, uint256[] values) = two offset words, then each
        // array as length + elements.
        let mut batch_data = Vec::new();
        batch_data.extend_from_slice(&uint_word(64));
        batch_data.extend_from_slice(&uint_word(160));
        batch_data.extend_from_slice(&uint_word(2));
        batch_data.extend_from_slice(&uint_word(1));
        batch_data.extend_from_slice(&uint_word(2));
        batch_data.extend_from_slice(&uint_word(2));
        batch_data.extend_from_slice(&uint_word(10));
        batch_data.extend_from_slice(&uint_word(20));
        let batch = SimLog {
            address: TOKEN,
            topics: vec![
                TransferBatch::SIGNATURE_HASH,
                word_address(ALICE),
                word_address(ALICE),
                word_address(BOB),
            ],
            data: batch_data.into(),
        };

        let (transfers, _) = parse_logs(&[single, batch]);
        assert_eq!(transfers.len(), 3);
        assert_eq!(transfers[0].token_id, Some(U256::from(7u64)));
        assert_eq!(transfers[0].amount, Some(U256::from(3u64)));
        assert_eq!(transfers[1].token_id, Some(U256::from(1u64)));
        assert_eq!(transfers[1].amount, Some(U256::from(10u64)));
        assert_eq!(transfers[2].token_id, Some(U256::from(2u64)));
        assert_eq!(transfers[2].amount, Some(U256::from(20u64)));
    }

    #[test]
    fn permit2_approval_has_its_own_signature() {
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from_str_radix("ffffffffffffffffffffffffffffffffffffffff", 16).unwrap().to_be_bytes::<32>());
        data.extend_from_slice(&uint_word(1_999_999));
        let log = SimLog {
            address: address!("0x000000000022d473030f116ddee9f6b43ac78ba3"),
            topics: vec![
                permit2_approval_topic(),
                word_address(ALICE),
                word_address(TOKEN),
                word_address(BOB),
            ],
            data: data.into(),
        };
        let (_, approvals) = parse_logs(&[log]);
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].standard, ApprovalStandard::Permit2);
        assert_eq!(approvals[0].token, TOKEN);
        assert_eq!(approvals[0].spender, BOB);
        assert_eq!(approvals[0].expiration, Some(1_999_999));
    }

    #[test]
    fn unknown_logs_are_ignored() {
        let junk = SimLog {
            address: TOKEN,
            topics: vec![B256::repeat_byte(0xab)],
            data: Bytes::copy_from_slice(&[1, 2, 3]),
        };
        let (transfers, approvals) = parse_logs(&[junk]);
        assert!(transfers.is_empty());
        assert!(approvals.is_empty());
    }
}

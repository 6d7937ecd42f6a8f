//! Signed-envelope decoding for `eth_sendRawTransaction`.
//!
//! Supports legacy (type 0), EIP-2930 (1), EIP-1559 (2) and EIP-7702 (4)
//! envelopes; the sender is recovered from the signature and type-4
//! authorization lists are surfaced on the normalized input.

use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::{Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;

use crate::calldata::{AuthorizationEntry, CalldataInput};
use crate::chains::Chain;

#[derive(Debug, thiserror::Error)]
pub enum RawTxError {
    #[error("Raw transaction is not valid hex")]
    InvalidHex,
    #[error("Failed to decode transaction envelope: {0}")]
    Envelope(String),
    #[error("Failed to recover sender: {0}")]
    Recovery(String),
    #[error("Contract-creation transactions carry no target to scan")]
    ContractCreation,
}

/// Decode a signed raw transaction into the normalized scan input.
pub fn decode_raw_transaction(raw: &str) -> Result<CalldataInput, RawTxError> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x")).map_err(|_| RawTxError::InvalidHex)?;
    let envelope = TxEnvelope::decode_2718(&mut bytes.as_slice())
        .map_err(|e| RawTxError::Envelope(e.to_string()))?;

    let from = envelope
        .recover_signer()
        .map_err(|e| RawTxError::Recovery(e.to_string()))?;
    let to = envelope.to().ok_or(RawTxError::ContractCreation)?;

    let authorization_list = envelope.authorization_list().map(|list| {
        list.iter()
            .map(|auth| AuthorizationEntry {
                address: auth.address.into(),
                chain_id: u64::try_from(auth.chain_id).unwrap_or_default(),
                nonce: auth.nonce,
            })
            .collect::<Vec<_>>()
    });

    Ok(CalldataInput {
        to: to.into(),
        from: Some(from.into()),
        data: envelope.input().clone(),
        value: Some(envelope.value()),
        chain: envelope.chain_id().and_then(Chain::from_chain_id),
        authorization_list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_raw_transaction("0xzznothex"),
            Err(RawTxError::InvalidHex)
        ));
        assert!(matches!(
            decode_raw_transaction("0x00"),
            Err(RawTxError::Envelope(_))
        ));
        assert!(matches!(
            decode_raw_transaction(""),
            Err(RawTxError::Envelope(_))
        ));
    }
}

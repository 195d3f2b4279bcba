//! Assembly of the signed `claimYield()` transaction.
//!
//! The claim is a plain legacy (pre-EIP-1559) call with a fixed gas
//! limit; the caller supplies nonce and gas price and owns the
//! price-doubling retry when the node reports the fee as too low.

use alloy::consensus::{SignableTransaction, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256, keccak256};
use alloy::signers::local::PrivateKeySigner;

use super::error::ChainError;

pub const CLAIM_YIELD_GAS_LIMIT: u64 = 300_000;

/// 4-byte selector of `claimYield()`.
pub fn claim_yield_selector() -> [u8; 4] {
    let hash = keccak256(b"claimYield()");
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Build and sign the yield-claim call, returning the raw bytes for
/// `eth_sendRawTransaction`.
pub fn build_claim_yield_tx(
    signer: &PrivateKeySigner,
    contract: Address,
    chain_id: u64,
    nonce: u64,
    gas_price: u128,
) -> Result<Vec<u8>, ChainError> {
    let mut tx = TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price,
        gas_limit: CLAIM_YIELD_GAS_LIMIT,
        to: TxKind::Call(contract),
        value: U256::ZERO,
        input: Bytes::copy_from_slice(&claim_yield_selector()),
    };

    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| ChainError::Sign(e.to_string()))?;

    Ok(tx.into_signed(signature).encoded_2718())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_claim_yield_selector_matches_deployed_contract() {
        // keccak256("claimYield()")[..4], as advertised by the exchange ABI
        assert_eq!(claim_yield_selector(), [0x40, 0x6c, 0xf2, 0x29]);
    }

    #[test]
    fn test_build_claim_yield_tx_is_deterministic() {
        let signer = PrivateKeySigner::from_str(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let contract = Address::from_str("0x0e4a0e095ddb34158d705c3094c9fefd7da40bf6").unwrap();

        let a = build_claim_yield_tx(&signer, contract, 81457, 7, 1_000_000_000).unwrap();
        let b = build_claim_yield_tx(&signer, contract, 81457, 7, 1_000_000_000).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());

        // a different gas price must change the payload
        let c = build_claim_yield_tx(&signer, contract, 81457, 7, 2_000_000_000).unwrap();
        assert_ne!(a, c);
    }
}

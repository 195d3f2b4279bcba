//! Wire types for the JSON-RPC node interface.

use alloy::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

/// Hex-quantity (de)serialization for `u64` fields ("0x10" <-> 16).
///
/// Deserialization accepts `null` as zero: nodes report a null block
/// number for logs from pending blocks, and the scan loop skips those.
pub mod quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(0),
            Some(s) => u64::from_str_radix(s.trim_start_matches("0x"), 16)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// A single contract event log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(with = "quantity", default)]
    pub block_number: u64,
    pub transaction_hash: B256,
    #[serde(with = "quantity", default)]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

/// Filter argument for `eth_getLogs`: a closed block range, a set of
/// contract addresses and an OR-list of topic0 hashes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(with = "quantity")]
    pub from_block: u64,
    #[serde(with = "quantity")]
    pub to_block: u64,
    pub address: Vec<Address>,
    pub topics: Vec<Vec<B256>>,
}

impl LogFilter {
    pub fn new(from_block: u64, to_block: u64, addresses: &[Address], topic0: &[B256]) -> Self {
        Self {
            from_block,
            to_block,
            address: addresses.to_vec(),
            topics: vec![topic0.to_vec()],
        }
    }
}

/// The slice of `eth_getTransactionByHash` the engine cares about:
/// existence, and whether the transaction has been mined yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub hash: B256,
    /// Zero while the transaction is still pending.
    #[serde(with = "quantity", default)]
    pub block_number: u64,
}

/// Render a 32-byte hash the way the ledger stores transaction hashes.
pub fn hash_to_hex(hash: &B256) -> String {
    format!("0x{}", hex::encode(hash))
}

//! Contract event identification and decoding.
//!
//! Topic hashes are derived at startup from the event signatures of the
//! deployed exchange, pool-deposit and vault contracts. The exchange and
//! the pool proxy both emit an event named `Deposit`, but with different
//! signatures (the proxy adds an indexed pool id), so their topic hashes
//! differ and the decoder tells them apart by emitting contract.

use alloy::primitives::{Address, B256, U256, keccak256};
use thiserror::Error;

use crate::chain::LogEntry;

/// `Deposit(uint256 indexed id, address indexed trader, uint256 amount)`
pub const EXCHANGE_DEPOSIT_SIG: &str = "Deposit(uint256,address,uint256)";
/// `Deposit(uint256 indexed id, address indexed trader, uint256 amount, uint256 indexed poolId)`
pub const POOL_DEPOSIT_SIG: &str = "Deposit(uint256,address,uint256,uint256)";
/// `Stake(uint256 indexed id, address indexed trader, uint256 amount)`
pub const VAULT_STAKE_SIG: &str = "Stake(uint256,address,uint256)";
/// `WithdrawalReceipt(uint256 indexed id, address indexed trader, uint256 amount)`
pub const WITHDRAWAL_RECEIPT_SIG: &str = "WithdrawalReceipt(uint256,address,uint256)";
/// `ClaimedYield(uint256 amount)`
pub const CLAIMED_YIELD_SIG: &str = "ClaimedYield(uint256)";

/// Topic0 hash of an event signature.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// The topic0 hashes of every event family a handler consumes.
#[derive(Debug, Clone)]
pub struct EventTopics {
    pub exchange_deposit: B256,
    pub pool_deposit: B256,
    pub vault_stake: B256,
    pub withdrawal_receipt: B256,
    pub claimed_yield: B256,
}

impl EventTopics {
    pub fn derive() -> Self {
        Self {
            exchange_deposit: event_topic(EXCHANGE_DEPOSIT_SIG),
            pool_deposit: event_topic(POOL_DEPOSIT_SIG),
            vault_stake: event_topic(VAULT_STAKE_SIG),
            withdrawal_receipt: event_topic(WITHDRAWAL_RECEIPT_SIG),
            claimed_yield: event_topic(CLAIMED_YIELD_SIG),
        }
    }
}

/// Which configured contract a log came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Exchange,
    DepositProxy,
    Vault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Deposit {
        id: U256,
        trader: Address,
        amount: U256,
        /// Present only for pool-proxy deposits; zero means individual.
        pool_id: Option<U256>,
    },
    Stake {
        id: U256,
        staker: Address,
        amount: U256,
    },
    WithdrawalReceipt {
        id: U256,
    },
    ClaimedYield {
        amount: U256,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log is missing topic {0}")]
    MissingTopic(usize),

    #[error("unexpected topic {0} for {1:?} contract")]
    UnexpectedTopic(B256, ContractKind),

    #[error("event data shorter than one word: {0} bytes")]
    ShortData(usize),
}

fn indexed(log: &LogEntry, index: usize) -> Result<U256, DecodeError> {
    log.topics
        .get(index)
        .map(|t| U256::from_be_slice(t.as_slice()))
        .ok_or(DecodeError::MissingTopic(index))
}

fn indexed_address(log: &LogEntry, index: usize) -> Result<Address, DecodeError> {
    log.topics
        .get(index)
        .map(|t| Address::from_word(*t))
        .ok_or(DecodeError::MissingTopic(index))
}

fn data_word(log: &LogEntry) -> Result<U256, DecodeError> {
    if log.data.len() < 32 {
        return Err(DecodeError::ShortData(log.data.len()));
    }
    Ok(U256::from_be_slice(&log.data[..32]))
}

/// Decode a filtered log into a settlement event, resolving the payload
/// layout from the emitting contract kind.
pub fn decode_event(
    topics: &EventTopics,
    kind: ContractKind,
    log: &LogEntry,
) -> Result<DecodedEvent, DecodeError> {
    let topic0 = *log.topics.first().ok_or(DecodeError::MissingTopic(0))?;

    match kind {
        ContractKind::Exchange if topic0 == topics.exchange_deposit => Ok(DecodedEvent::Deposit {
            id: indexed(log, 1)?,
            trader: indexed_address(log, 2)?,
            amount: data_word(log)?,
            pool_id: None,
        }),
        ContractKind::Exchange if topic0 == topics.withdrawal_receipt => {
            Ok(DecodedEvent::WithdrawalReceipt {
                id: indexed(log, 1)?,
            })
        }
        ContractKind::Exchange if topic0 == topics.claimed_yield => Ok(DecodedEvent::ClaimedYield {
            amount: data_word(log)?,
        }),
        ContractKind::DepositProxy if topic0 == topics.pool_deposit => Ok(DecodedEvent::Deposit {
            id: indexed(log, 1)?,
            trader: indexed_address(log, 2)?,
            amount: data_word(log)?,
            pool_id: Some(indexed(log, 3)?),
        }),
        ContractKind::Vault if topic0 == topics.vault_stake => Ok(DecodedEvent::Stake {
            id: indexed(log, 1)?,
            staker: indexed_address(log, 2)?,
            amount: data_word(log)?,
        }),
        _ => Err(DecodeError::UnexpectedTopic(topic0, kind)),
    }
}

/// Deduplication id for a `ClaimedYield` event: keccak256 over the
/// transaction hash, the log index and the chain id, each appended as
/// minimal big-endian bytes. The full 256-bit hash is kept as the id;
/// truncating it to 64 bits would be a collision source at volume.
pub fn yield_event_id(tx_hash: B256, log_index: u64, chain_id: u64) -> B256 {
    let mut buf = Vec::with_capacity(48);
    buf.extend_from_slice(tx_hash.as_slice());
    buf.extend_from_slice(&min_be_bytes(log_index));
    buf.extend_from_slice(&min_be_bytes(chain_id));
    keccak256(&buf)
}

/// Big-endian bytes of `value` with leading zeros stripped (empty for 0).
fn min_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

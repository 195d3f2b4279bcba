use async_trait::async_trait;

use alloy::primitives::{Address, B256};

use super::error::ChainError;
use super::types::{LogEntry, LogFilter, TxRecord};

/// Node operations the settlement core depends on.
///
/// The trait is intentionally narrow: everything the block-range scanner,
/// the dropped-transaction reconciler and the yield claimer need, and
/// nothing else. Production uses [`super::EthRpcClient`]; tests script a
/// [`super::MockChainClient`].
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Establish the connection lazily. A no-op when already connected.
    async fn connect(&self) -> Result<(), ChainError>;

    /// Tear down and re-establish the connection. Used by the single
    /// retry the scan loop performs after a failed log query.
    async fn reconnect(&self) -> Result<(), ChainError>;

    /// Current chain head block number.
    async fn latest_block_number(&self) -> Result<u64, ChainError>;

    /// Contract event logs matching `filter`, in log order.
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError>;

    /// Look a transaction up by hash. `Ok(None)` means the node
    /// definitively does not know the transaction (dropped or replaced);
    /// transport or node failures must surface as `Err` so callers never
    /// cancel ledger operations on uncertain information.
    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxRecord>, ChainError>;

    /// Next nonce for `address`, including pending transactions.
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Node-suggested gas price in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Submit a raw signed transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;
}

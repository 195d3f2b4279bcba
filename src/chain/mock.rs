//! Scripted chain client for tests.
//!
//! State is mutated up-front by the test (head, logs, known transactions,
//! injected failures) and inspected afterwards (filter calls, submitted
//! raw transactions). Failure injection is counted so a test can make
//! exactly the first N calls fail and the rest succeed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256, keccak256};

use super::client::ChainClient;
use super::error::{ChainError, GAS_TOO_LOW};
use super::types::{LogEntry, LogFilter, TxRecord};

type FilterHook = Box<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Default)]
struct MockState {
    head: u64,
    logs: Vec<LogEntry>,
    transactions: HashMap<B256, TxRecord>,
    gas_price: u128,
    nonce: u64,
    fail_connects: u32,
    fail_filters: u32,
    fail_tx_lookup: bool,
    gas_too_low_rejections: u32,
    sent_raw: Vec<Vec<u8>>,
    filter_calls: Vec<(u64, u64)>,
    filter_hook: Option<FilterHook>,
}

pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MockChainClient {
    pub fn new(head: u64) -> Self {
        Self {
            state: Mutex::new(MockState {
                head,
                gas_price: 1_000_000_000,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock chain state lock")
    }

    pub fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    pub fn add_log(&self, log: LogEntry) {
        self.lock().logs.push(log);
    }

    pub fn add_transaction(&self, hash: B256, block_number: u64) {
        self.lock()
            .transactions
            .insert(hash, TxRecord { hash, block_number });
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// Make the next `count` log queries fail with a transport error.
    pub fn fail_next_filters(&self, count: u32) {
        self.lock().fail_filters = count;
    }

    /// Make every transaction lookup fail (simulated node outage).
    pub fn set_fail_tx_lookup(&self, fail: bool) {
        self.lock().fail_tx_lookup = fail;
    }

    pub fn set_gas_price(&self, price: u128) {
        self.lock().gas_price = price;
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.lock().nonce = nonce;
    }

    /// Reject the next `count` submissions as underpriced.
    pub fn set_gas_too_low_rejections(&self, count: u32) {
        self.lock().gas_too_low_rejections = count;
    }

    /// Observe every log query (fires before failure injection); used to
    /// flip external state between sub-ranges of a multi-range scan.
    pub fn set_filter_hook(&self, hook: impl Fn(u64, u64) + Send + Sync + 'static) {
        self.lock().filter_hook = Some(Box::new(hook));
    }

    pub fn filter_calls(&self) -> Vec<(u64, u64)> {
        self.lock().filter_calls.clone()
    }

    pub fn sent_raw_count(&self) -> usize {
        self.lock().sent_raw.len()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn connect(&self) -> Result<(), ChainError> {
        let mut state = self.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ChainError::Connect("injected connect failure".to_string()));
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ChainError> {
        self.connect().await
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.lock().head)
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError> {
        let mut state = self.lock();
        if let Some(hook) = &state.filter_hook {
            hook(filter.from_block, filter.to_block);
        }
        state.filter_calls.push((filter.from_block, filter.to_block));
        if state.fail_filters > 0 {
            state.fail_filters -= 1;
            return Err(ChainError::Transport(
                "injected filter failure".to_string(),
            ));
        }

        let topic0 = filter.topics.first().cloned().unwrap_or_default();
        let logs = state
            .logs
            .iter()
            .filter(|log| {
                // pending logs carry no block number and match any range
                let in_range = log.block_number == 0
                    || (log.block_number >= filter.from_block
                        && log.block_number <= filter.to_block);
                in_range
                    && filter.address.contains(&log.address)
                    && log
                        .topics
                        .first()
                        .is_some_and(|t| topic0.is_empty() || topic0.contains(t))
            })
            .cloned()
            .collect();
        Ok(logs)
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxRecord>, ChainError> {
        let state = self.lock();
        if state.fail_tx_lookup {
            return Err(ChainError::Transport(
                "injected lookup failure".to_string(),
            ));
        }
        Ok(state.transactions.get(&hash).cloned())
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64, ChainError> {
        Ok(self.lock().nonce)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.lock().gas_price)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        let mut state = self.lock();
        if state.gas_too_low_rejections > 0 {
            state.gas_too_low_rejections -= 1;
            return Err(ChainError::Rpc {
                code: -32000,
                message: GAS_TOO_LOW.to_string(),
            });
        }
        state.sent_raw.push(raw.to_vec());
        Ok(keccak256(raw))
    }
}

//! Settlement reconciliation engine.
//!
//! Keeps the exchange's off-chain ledger (profile balances, stakes,
//! withdrawals) consistent with on-chain state recorded by one or more
//! Ethereum-compatible exchange contracts, across multiple chains
//! configured simultaneously.
//!
//! # Modules
//!
//! - [`chain`] - JSON-RPC chain client behind the [`ChainClient`] trait
//! - [`ledger`] - Ledger gateway trait plus the in-memory implementation
//! - [`settlement`] - Block-range scanning, event dispatch, orchestration
//! - [`money`] - Raw token units <-> decimal amount conversions
//! - [`config`] - Service configuration (YAML)
//! - [`logging`] - tracing subscriber setup

pub mod chain;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod settlement;

// Convenient re-exports at crate root
pub use chain::{ChainClient, ChainError, EthRpcClient, LogEntry, LogFilter, MockChainClient};
pub use ledger::{
    BalanceOp, ContractMap, Deposit, InMemoryLedger, LedgerApi, LedgerError, OpStatus, Profile,
    ProfileCache, ProfileType, Stake, WithdrawalTxInfo, Yield,
};
pub use settlement::{
    EthereumHandler, HandlerConfig, SettlementError, SettlementService, SettlementShared,
};

//! Settlement Module
//!
//! The reconciliation core: per-contract block-range scanning with a
//! confirmation safety margin, exactly-once translation of contract event
//! logs into ledger mutations, durable checkpointing, reconciliation of
//! pending operations whose transaction vanished from the chain, and the
//! exchange-wide withdrawal circuit breaker.
//!
//! [`SettlementService`] owns one [`EthereumHandler`] per configured
//! contract/chain pair and runs three independent timer loops per
//! handler (deposits/stakes, withdrawals, yield).

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod service;

// Re-exports for convenience
pub use config::HandlerConfig;
pub use error::SettlementError;
pub use events::{ContractKind, DecodedEvent, EventTopics, event_topic, yield_event_id};
pub use handler::EthereumHandler;
pub use service::{SettlementService, SettlementShared};

/// Checkpoint event-family names. Each family advances its own cursor per
/// (contract, chain).
pub const DEPOSIT_AND_STAKING_EVENT: &str = "deposit_and_staking";
pub const WITHDRAW_AND_UNSTAKE_EVENT: &str = "withdraw_and_unstake";
pub const PROCESS_YIELD_EVENT: &str = "process_yield";

/// Hard cap on a single scan window, bounding the cost of one log query.
pub const MAX_BLOCK_SPAN: u64 = 1999;

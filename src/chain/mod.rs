//! Chain Client Module
//!
//! A small Ethereum JSON-RPC client behind the [`ChainClient`] trait.
//! The settlement core only needs a handful of node operations: the
//! current head, log filtering over a block range, transaction lookup by
//! hash, and the plumbing for submitting the signed yield-claim call.
//!
//! [`EthRpcClient`] talks to a real node over HTTP; [`MockChainClient`]
//! is the scripted stand-in used by unit and integration tests.

pub mod client;
pub mod error;
pub mod mock;
pub mod rpc;
pub mod tx;
pub mod types;

// Re-exports for convenience
pub use client::ChainClient;
pub use error::{ChainError, GAS_TOO_LOW};
pub use mock::MockChainClient;
pub use rpc::EthRpcClient;
pub use tx::{CLAIM_YIELD_GAS_LIMIT, build_claim_yield_tx, claim_yield_selector};
pub use types::{LogEntry, LogFilter, TxRecord, hash_to_hex};

//! Ledger Gateway Module
//!
//! The settlement core never touches persistent state directly: every
//! checkpoint read, pending-operation query and ledger mutation goes
//! through the [`LedgerApi`] capability trait. Production wires the real
//! ledger backend behind it; [`InMemoryLedger`] is the deterministic
//! in-process implementation used by tests and local runs.

pub mod api;
pub mod memory;
pub mod models;

// Re-exports for convenience
pub use api::{LedgerApi, LedgerError};
pub use memory::InMemoryLedger;
pub use models::{
    BalanceOp, ContractMap, Deposit, OpStatus, Profile, ProfileCache, ProfileType, Stake,
    WithdrawalTxInfo, Yield, normalize_wallet, wallet_from_address,
};

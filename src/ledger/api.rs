use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::models::{
    BalanceOp, ContractMap, Deposit, Profile, ProfileCache, Stake, WithdrawalTxInfo, Yield,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Capability interface to the exchange ledger.
///
/// This is the only way the settlement core touches persistent state.
/// Implementations must be internally concurrency-safe: the core calls
/// into the gateway from several independent tasks and never assumes
/// exclusive access.
///
/// Mutations must be idempotent on the operation id: replaying a block
/// range re-submits the same `d_*`/`s_*`/`y_*`/`w_*` ids and must not
/// double-apply.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    // --- withdrawal circuit breaker -------------------------------------

    async fn withdrawals_suspended(&self) -> Result<bool, LedgerError>;

    /// Persist the suspension flag. Only an external operator action
    /// clears it; the engine never does.
    async fn suspend_withdrawals(&self) -> Result<(), LedgerError>;

    /// Rolling 24-hour withdrawal volume across the whole exchange.
    async fn rolling_24h_withdrawals(&self) -> Result<Decimal, LedgerError>;

    // --- contract registry ----------------------------------------------

    async fn add_contract_map(
        &self,
        contract_address: &str,
        chain_id: u64,
        exchange_id: &str,
    ) -> Result<ContractMap, LedgerError>;

    // --- scan checkpoints -----------------------------------------------

    /// Last fully-processed block for (contract, chain, event family), or
    /// `None` when no range has been committed yet.
    async fn last_processed_block(
        &self,
        contract: &str,
        chain_id: u64,
        event_type: &str,
    ) -> Result<Option<u64>, LedgerError>;

    async fn set_last_processed_block(
        &self,
        block: u64,
        contract: &str,
        chain_id: u64,
        event_type: &str,
    ) -> Result<(), LedgerError>;

    // --- pending operations ---------------------------------------------

    async fn pending_deposits(
        &self,
        exchange_id: &str,
        chain_id: u64,
    ) -> Result<Vec<BalanceOp>, LedgerError>;

    async fn pending_stakes(
        &self,
        exchange_id: &str,
        chain_id: u64,
    ) -> Result<Vec<BalanceOp>, LedgerError>;

    async fn pending_withdrawals(
        &self,
        exchange_id: &str,
        chain_id: u64,
    ) -> Result<Vec<BalanceOp>, LedgerError>;

    /// Mark a pending deposit/stake canceled after its originating
    /// transaction vanished from the chain. Returns whether the operation
    /// was still pending.
    async fn pending_deposit_canceled(&self, ops_id: &str) -> Result<bool, LedgerError>;

    /// Tell pending withdrawals the block at which they become eligible
    /// to complete.
    async fn update_pending_withdrawals(
        &self,
        current_block: u64,
        future_block: u64,
        contract: &str,
    ) -> Result<(), LedgerError>;

    // --- profiles and caches --------------------------------------------

    /// Resolve a profile by canonical wallet string within an exchange.
    /// `None` means the wallet is unknown to the ledger.
    async fn profile_by_wallet(
        &self,
        wallet: &str,
        exchange_id: &str,
    ) -> Result<Option<Profile>, LedgerError>;

    async fn invalidate_cache(&self, profile_id: u64) -> Result<ProfileCache, LedgerError>;

    async fn invalidate_cache_and_notify(
        &self,
        profile_id: u64,
    ) -> Result<ProfileCache, LedgerError>;

    // --- ledger mutations -----------------------------------------------

    async fn process_deposit(
        &self,
        profile_id: u64,
        deposit: Deposit,
        pooled: bool,
    ) -> Result<(), LedgerError>;

    /// Route a deposit whose wallet has no profile into the holding
    /// bucket for manual reconciliation.
    async fn process_deposit_unknown(&self, deposit: Deposit) -> Result<(), LedgerError>;

    async fn process_stake(
        &self,
        staker_profile_id: u64,
        stake: Stake,
        from_balance: bool,
        exchange_id: &str,
    ) -> Result<BalanceOp, LedgerError>;

    async fn process_yield(&self, yield_event: Yield) -> Result<(), LedgerError>;

    /// Mark a whole batch of withdrawals completed. All-or-nothing: a
    /// failure must leave every withdrawal in the batch untouched so the
    /// caller can safely retry the range.
    async fn completed_withdrawals(&self, ids: &[WithdrawalTxInfo]) -> Result<(), LedgerError>;
}

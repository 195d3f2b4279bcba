//! Deterministic in-memory ledger gateway.
//!
//! Implements [`LedgerApi`] over plain maps and vectors behind one async
//! lock. Used as the test double for the settlement core and as the
//! gateway for self-contained local runs. Failure injection flags let
//! tests simulate a gateway outage at specific call sites.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};

use super::api::{LedgerApi, LedgerError};
use super::models::{
    BalanceOp, ContractMap, Deposit, OpStatus, Profile, ProfileCache, Stake, WithdrawalTxInfo,
    Yield, normalize_wallet,
};

type CheckpointKey = (String, u64, String);

#[derive(Default)]
pub struct LedgerState {
    pub checkpoints: HashMap<CheckpointKey, u64>,
    pub profiles: HashMap<(String, String), Profile>,
    pub caches: HashMap<u64, ProfileCache>,
    pub cache_invalidations: Vec<u64>,
    pub cache_notifications: Vec<u64>,

    pub deposits: Vec<(u64, Deposit, bool)>,
    pub unknown_deposits: Vec<Deposit>,
    pub stakes: Vec<(u64, Stake)>,
    pub yields: Vec<Yield>,
    applied_ids: HashSet<String>,

    pub pending_deposits: Vec<BalanceOp>,
    pub pending_stakes: Vec<BalanceOp>,
    pub pending_withdrawals: Vec<BalanceOp>,
    pub canceled_ops: Vec<String>,
    pub completed_withdrawals: Vec<WithdrawalTxInfo>,
    pub withdrawal_windows: Vec<(u64, u64, String)>,

    pub contract_maps: Vec<ContractMap>,
    pub suspended: bool,
    pub rolling_24h: Decimal,

    // failure injection
    pub fail_completed_withdrawals: bool,
    pub fail_suspended_reads: bool,
}

pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Direct access to the underlying state for test setup/assertions.
    pub async fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().await
    }

    pub async fn insert_profile(&self, profile: Profile) {
        let mut state = self.state.lock().await;
        let key = (
            normalize_wallet(&profile.wallet),
            profile.exchange_id.clone(),
        );
        state.caches.entry(profile.profile_id).or_insert(ProfileCache {
            profile_id: profile.profile_id,
            account_equity: Decimal::ZERO,
        });
        state.profiles.insert(key, profile);
    }

    pub async fn set_account_equity(&self, profile_id: u64, equity: Decimal) {
        self.state.lock().await.caches.insert(
            profile_id,
            ProfileCache {
                profile_id,
                account_equity: equity,
            },
        );
    }

    pub async fn set_rolling_24h(&self, volume: Decimal) {
        self.state.lock().await.rolling_24h = volume;
    }

    pub async fn push_pending_deposit(&self, op: BalanceOp) {
        self.state.lock().await.pending_deposits.push(op);
    }

    pub async fn push_pending_stake(&self, op: BalanceOp) {
        self.state.lock().await.pending_stakes.push(op);
    }

    pub async fn push_pending_withdrawal(&self, op: BalanceOp) {
        self.state.lock().await.pending_withdrawals.push(op);
    }

    pub async fn set_fail_completed_withdrawals(&self, fail: bool) {
        self.state.lock().await.fail_completed_withdrawals = fail;
    }

    pub async fn set_fail_suspended_reads(&self, fail: bool) {
        self.state.lock().await.fail_suspended_reads = fail;
    }
}

#[async_trait]
impl LedgerApi for InMemoryLedger {
    async fn withdrawals_suspended(&self) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        if state.fail_suspended_reads {
            return Err(LedgerError::Unavailable("injected read failure".to_string()));
        }
        Ok(state.suspended)
    }

    async fn suspend_withdrawals(&self) -> Result<(), LedgerError> {
        self.state.lock().await.suspended = true;
        Ok(())
    }

    async fn rolling_24h_withdrawals(&self) -> Result<Decimal, LedgerError> {
        Ok(self.state.lock().await.rolling_24h)
    }

    async fn add_contract_map(
        &self,
        contract_address: &str,
        chain_id: u64,
        exchange_id: &str,
    ) -> Result<ContractMap, LedgerError> {
        let map = ContractMap {
            contract_address: contract_address.to_lowercase(),
            chain_id,
            exchange_id: exchange_id.to_lowercase(),
        };
        let mut state = self.state.lock().await;
        if !state.contract_maps.contains(&map) {
            state.contract_maps.push(map.clone());
        }
        Ok(map)
    }

    async fn last_processed_block(
        &self,
        contract: &str,
        chain_id: u64,
        event_type: &str,
    ) -> Result<Option<u64>, LedgerError> {
        let key = (contract.to_lowercase(), chain_id, event_type.to_string());
        Ok(self.state.lock().await.checkpoints.get(&key).copied())
    }

    async fn set_last_processed_block(
        &self,
        block: u64,
        contract: &str,
        chain_id: u64,
        event_type: &str,
    ) -> Result<(), LedgerError> {
        let key = (contract.to_lowercase(), chain_id, event_type.to_string());
        self.state.lock().await.checkpoints.insert(key, block);
        Ok(())
    }

    async fn pending_deposits(
        &self,
        exchange_id: &str,
        chain_id: u64,
    ) -> Result<Vec<BalanceOp>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pending_deposits
            .iter()
            .filter(|op| op.exchange_id == exchange_id && op.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn pending_stakes(
        &self,
        exchange_id: &str,
        chain_id: u64,
    ) -> Result<Vec<BalanceOp>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pending_stakes
            .iter()
            .filter(|op| op.exchange_id == exchange_id && op.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn pending_withdrawals(
        &self,
        exchange_id: &str,
        chain_id: u64,
    ) -> Result<Vec<BalanceOp>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pending_withdrawals
            .iter()
            .filter(|op| op.exchange_id == exchange_id && op.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn pending_deposit_canceled(&self, ops_id: &str) -> Result<bool, LedgerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut found = false;
        for op in state
            .pending_deposits
            .iter_mut()
            .chain(state.pending_stakes.iter_mut())
        {
            if op.ops_id == ops_id && op.status == OpStatus::Pending {
                op.status = OpStatus::Canceled;
                found = true;
            }
        }
        if found {
            state.canceled_ops.push(ops_id.to_string());
        }
        Ok(found)
    }

    async fn update_pending_withdrawals(
        &self,
        current_block: u64,
        future_block: u64,
        contract: &str,
    ) -> Result<(), LedgerError> {
        self.state
            .lock()
            .await
            .withdrawal_windows
            .push((current_block, future_block, contract.to_lowercase()));
        Ok(())
    }

    async fn profile_by_wallet(
        &self,
        wallet: &str,
        exchange_id: &str,
    ) -> Result<Option<Profile>, LedgerError> {
        let key = (normalize_wallet(wallet), exchange_id.to_string());
        Ok(self.state.lock().await.profiles.get(&key).cloned())
    }

    async fn invalidate_cache(&self, profile_id: u64) -> Result<ProfileCache, LedgerError> {
        let mut state = self.state.lock().await;
        state.cache_invalidations.push(profile_id);
        Ok(state
            .caches
            .get(&profile_id)
            .cloned()
            .unwrap_or(ProfileCache {
                profile_id,
                account_equity: Decimal::ZERO,
            }))
    }

    async fn invalidate_cache_and_notify(
        &self,
        profile_id: u64,
    ) -> Result<ProfileCache, LedgerError> {
        let mut state = self.state.lock().await;
        state.cache_invalidations.push(profile_id);
        state.cache_notifications.push(profile_id);
        Ok(state
            .caches
            .get(&profile_id)
            .cloned()
            .unwrap_or(ProfileCache {
                profile_id,
                account_equity: Decimal::ZERO,
            }))
    }

    async fn process_deposit(
        &self,
        profile_id: u64,
        deposit: Deposit,
        pooled: bool,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.applied_ids.insert(deposit.id.clone()) {
            state.deposits.push((profile_id, deposit, pooled));
        }
        Ok(())
    }

    async fn process_deposit_unknown(&self, deposit: Deposit) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.applied_ids.insert(deposit.id.clone()) {
            state.unknown_deposits.push(deposit);
        }
        Ok(())
    }

    async fn process_stake(
        &self,
        staker_profile_id: u64,
        stake: Stake,
        _from_balance: bool,
        exchange_id: &str,
    ) -> Result<BalanceOp, LedgerError> {
        let mut state = self.state.lock().await;
        let op = BalanceOp {
            ops_id: stake.id.clone(),
            status: OpStatus::Processing,
            tx_hash: stake.tx.clone(),
            wallet: stake.vault_wallet.clone(),
            amount: stake.amount,
            timestamp_us: 0,
            exchange_id: exchange_id.to_string(),
            chain_id: 0,
        };
        if state.applied_ids.insert(stake.id.clone()) {
            state.stakes.push((staker_profile_id, stake));
        }
        Ok(op)
    }

    async fn process_yield(&self, yield_event: Yield) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.applied_ids.insert(yield_event.id.clone()) {
            state.yields.push(yield_event);
        }
        Ok(())
    }

    async fn completed_withdrawals(&self, ids: &[WithdrawalTxInfo]) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.fail_completed_withdrawals {
            return Err(LedgerError::Unavailable(
                "injected batch failure".to_string(),
            ));
        }
        for info in ids {
            if !state.completed_withdrawals.contains(info) {
                state.completed_withdrawals.push(info.clone());
            }
        }
        Ok(())
    }
}

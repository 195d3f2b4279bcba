//! Per-contract block-range scanner and event fan-out.
//!
//! One [`EthereumHandler`] owns the cursor logic for a single exchange
//! contract on a single chain: it advances from the last checkpoint to
//! the confirmed head in bounded windows, decodes every relevant event
//! log, dispatches it to the matching ledger mutation, reconciles pending
//! operations whose transaction vanished from the chain, and submits the
//! yield-claim transaction when configured.
//!
//! A failure local to one log never aborts the surrounding batch; a
//! failure that would make a checkpoint commit unsafe (log query failure,
//! withdrawal batch commit failure) abandons the whole range with the
//! checkpoint untouched, so the next tick retries it.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;

use crate::chain::{
    ChainClient, ChainError, LogEntry, LogFilter, build_claim_yield_tx, hash_to_hex,
};
use crate::ledger::{
    Deposit, LedgerApi, ProfileType, Stake, WithdrawalTxInfo, Yield, wallet_from_address,
};
use crate::money;

use super::config::HandlerConfig;
use super::error::SettlementError;
use super::events::{ContractKind, DecodedEvent, EventTopics, decode_event, yield_event_id};
use super::service::SettlementShared;
use super::{
    DEPOSIT_AND_STAKING_EVENT, MAX_BLOCK_SPAN, PROCESS_YIELD_EVENT, WITHDRAW_AND_UNSTAKE_EVENT,
};

const CLAIM_YIELD_MAX_ATTEMPTS: u32 = 5;

/// Parse a 20-byte hex address, with or without the `0x` prefix.
fn parse_address(raw: &str) -> Result<Address, SettlementError> {
    let stripped = raw.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|e| SettlementError::Config(format!("bad address {raw:?}: {e}")))?;
    if bytes.len() != 20 {
        return Err(SettlementError::Config(format!(
            "bad address length {raw:?}"
        )));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_tx_hash(raw: &str) -> Option<B256> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).ok()?;
    (bytes.len() == 32).then(|| B256::from_slice(&bytes))
}

fn is_older_than(timestamp_us: i64, interval: Duration) -> bool {
    let age_us = Utc::now().timestamp_micros().saturating_sub(timestamp_us);
    age_us > interval.as_micros() as i64
}

/// Whether the dispatch loop keeps consuming the current batch.
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Strategy object for one event family.
///
/// `on_event` runs per decoded log, in log order; accumulated state lives
/// in the implementing struct. `commit` runs once after the batch and
/// decides whether the range may be checkpointed; the default succeeds
/// unless the batch ended early.
#[async_trait]
pub(crate) trait EventProcessor: Send {
    async fn on_event(
        &mut self,
        handler: &EthereumHandler,
        log: &LogEntry,
        event: &DecodedEvent,
    ) -> Flow;

    async fn commit(&mut self, _handler: &EthereumHandler, ended_early: bool) -> bool {
        !ended_early
    }
}

pub struct EthereumHandler {
    exchange_address: Address,
    deposit_address: Address,
    vaults: Vec<Address>,
    /// Canonical lowercase contract string used for ledger keys.
    exchange_contract: String,
    decimals: u32,
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn LedgerApi>,
    shared: Arc<SettlementShared>,
    topics: EventTopics,
    signer: Option<PrivateKeySigner>,
    withdrawal_block_delay: u64,
    default_from_block: u64,
    block_confirmations: u64,
    cancel_interval: Duration,
    exchange_id: String,
    chain_id: u64,
}

impl EthereumHandler {
    pub fn new(
        config: &HandlerConfig,
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn LedgerApi>,
        shared: Arc<SettlementShared>,
    ) -> Result<Self, SettlementError> {
        let exchange_address = parse_address(&config.exchange_address)?;
        let deposit_address = parse_address(&config.deposit_address)?;
        let vaults = config
            .vaults
            .iter()
            .map(|v| parse_address(v))
            .collect::<Result<Vec<_>, _>>()?;

        let signer = if config.process_yield && !config.claimer_pk.is_empty() {
            let signer = PrivateKeySigner::from_str(config.claimer_pk.trim())
                .map_err(|e| SettlementError::ClaimerKey(e.to_string()))?;
            Some(signer)
        } else {
            warn!(
                "yield claiming inactive for exchange_id={} chain_id={} process_yield={}",
                config.exchange_id, config.chain_id, config.process_yield
            );
            None
        };

        info!(
            "created ethereum handler, exchange address: {}, pool deposit address: {}, \
             vaults: {}, withdrawal block delay: {}, default from block: {}, \
             block confirmations: {}, cancel interval: {}s, process yield: {}",
            config.exchange_address,
            config.deposit_address,
            vaults.len(),
            config.withdrawal_block_delay,
            config.default_from_block,
            config.confirmation_blocks,
            config.cancel_interval,
            config.process_yield
        );

        Ok(Self {
            exchange_address,
            deposit_address,
            vaults,
            exchange_contract: wallet_from_address(&exchange_address),
            decimals: config.decimals,
            chain,
            ledger,
            shared,
            topics: EventTopics::derive(),
            signer,
            withdrawal_block_delay: config.withdrawal_block_delay,
            default_from_block: config.default_from_block,
            block_confirmations: config.confirmation_blocks,
            cancel_interval: Duration::from_secs(config.cancel_interval),
            exchange_id: config.exchange_id.clone(),
            chain_id: config.chain_id,
        })
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn exchange_contract(&self) -> &str {
        &self.exchange_contract
    }

    pub fn claims_yield(&self) -> bool {
        self.signer.is_some()
    }

    // --- connectivity and checkpoint hygiene ----------------------------

    /// Lazily dial the chain client, and when an event family is given,
    /// re-validate (and self-heal) its stored checkpoint before scanning.
    async fn ensure_connected(&self, event: Option<&str>) -> bool {
        if let Err(e) = self.chain.connect().await {
            error!(
                "exchange_id={} chain_id={} error connecting to chain provider: {e}",
                self.exchange_id, self.chain_id
            );
            return false;
        }
        match event {
            Some(event) => self.check_last_processed_block(event).await.is_ok(),
            None => true,
        }
    }

    async fn check_last_processed_block(&self, event: &str) -> Result<(), SettlementError> {
        let current = self.chain.latest_block_number().await?;
        let last = match self
            .ledger
            .last_processed_block(&self.exchange_contract, self.chain_id, event)
            .await
        {
            Ok(last) => last,
            Err(e) => {
                error!(
                    "exchange_id={} chain_id={} error reading last processed block: {e}",
                    self.exchange_id, self.chain_id
                );
                self.reset_last_processed_block(event).await?;
                Some(self.default_from_block)
            }
        };

        if let Some(last) = last
            && (last > current || last < self.default_from_block)
        {
            warn!(
                "exchange_id={} chain_id={} stored checkpoint {last} outside [{}, {current}], resetting",
                self.exchange_id, self.chain_id, self.default_from_block
            );
            self.reset_last_processed_block(event).await?;
        }

        debug!(
            "exchange_id={} chain_id={} checkpoint check ok, current block: {current}, last: {last:?}, default: {}",
            self.exchange_id, self.chain_id, self.default_from_block
        );
        Ok(())
    }

    async fn reset_last_processed_block(&self, event: &str) -> Result<(), SettlementError> {
        self.ledger
            .set_last_processed_block(
                self.default_from_block,
                &self.exchange_contract,
                self.chain_id,
                event,
            )
            .await
            .map_err(|e| {
                error!(
                    "exchange_id={} chain_id={} error resetting last processed block: {e}",
                    self.exchange_id, self.chain_id
                );
                SettlementError::from(e)
            })?;
        info!(
            "exchange_id={} chain_id={} reset last processed block to {}",
            self.exchange_id, self.chain_id, self.default_from_block
        );
        Ok(())
    }

    /// Next scan window: `(checkpoint + 1, head - confirmations)`, capped
    /// at [`MAX_BLOCK_SPAN`] blocks. A `from > to` result means there is
    /// nothing to do this tick.
    async fn block_window(&self, last: Option<u64>) -> Result<(u64, u64), ChainError> {
        let from = match last {
            Some(block) => block + 1,
            None => self.default_from_block,
        };
        let head = self.chain.latest_block_number().await?;
        let to = head
            .saturating_sub(self.block_confirmations)
            .min(from.saturating_add(MAX_BLOCK_SPAN));
        Ok((from, to))
    }

    // --- scan loops -----------------------------------------------------

    /// One deposit/stake tick: drain all confirmed ranges, then reconcile
    /// dropped transactions.
    pub async fn process_deposits_and_staking(&self) {
        if !self.ensure_connected(Some(DEPOSIT_AND_STAKING_EVENT)).await {
            return;
        }

        loop {
            let last = match self
                .ledger
                .last_processed_block(&self.exchange_contract, self.chain_id, DEPOSIT_AND_STAKING_EVENT)
                .await
            {
                Ok(last) => last,
                Err(e) => {
                    error!("error reading last processed deposit block: {e}");
                    return;
                }
            };
            let (from, to) = match self.block_window(last).await {
                Ok(window) => window,
                Err(e) => {
                    error!("error reading block numbers: {e}");
                    return;
                }
            };
            if from > to {
                break;
            }

            info!(
                "exchange_id={} chain_id={} processing deposits in block range {from} to {to}",
                self.exchange_id, self.chain_id
            );
            if !self.process_deposit_events(from, to).await {
                error!("process_deposit_events failed");
                return;
            }
            if !self.process_stake_events(from, to).await {
                error!("process_stake_events failed");
                return;
            }
            if let Err(e) = self
                .ledger
                .set_last_processed_block(
                    to,
                    &self.exchange_contract,
                    self.chain_id,
                    DEPOSIT_AND_STAKING_EVENT,
                )
                .await
            {
                error!("error setting last processed deposit block: {e}");
                return;
            }
        }

        self.process_dropped_deposits_and_stakes().await;
    }

    /// One withdrawal-completion tick. The suspension flag is re-checked
    /// before every sub-range and again before every checkpoint commit,
    /// so suspension can interrupt a multi-range scan mid-flight without
    /// un-committing finished work.
    pub async fn complete_withdrawals_and_unstakes(&self) {
        if !self.ensure_connected(Some(WITHDRAW_AND_UNSTAKE_EVENT)).await {
            return;
        }

        while !self.shared.suspended() {
            let last = match self
                .ledger
                .last_processed_block(&self.exchange_contract, self.chain_id, WITHDRAW_AND_UNSTAKE_EVENT)
                .await
            {
                Ok(last) => last,
                Err(e) => {
                    error!("error reading last processed withdrawal block: {e}");
                    return;
                }
            };
            let (from, to) = match self.block_window(last).await {
                Ok(window) => window,
                Err(e) => {
                    error!("error reading block numbers: {e}");
                    return;
                }
            };
            if from > to {
                break;
            }

            info!(
                "exchange_id={} chain_id={} processing withdrawals in block range {from} to {to}",
                self.exchange_id, self.chain_id
            );
            if !self.process_withdrawal_receipt_events(from, to).await {
                error!("process_withdrawal_receipt_events failed");
                return;
            }
            if self.shared.suspended() {
                return;
            }
            if let Err(e) = self
                .ledger
                .set_last_processed_block(
                    to,
                    &self.exchange_contract,
                    self.chain_id,
                    WITHDRAW_AND_UNSTAKE_EVENT,
                )
                .await
            {
                error!("error setting last processed withdrawal block: {e}");
                return;
            }
        }
    }

    /// One yield-distribution tick: drain confirmed `ClaimedYield` ranges.
    pub async fn distribute_yield(&self) {
        if !self.ensure_connected(Some(PROCESS_YIELD_EVENT)).await {
            return;
        }

        loop {
            let last = match self
                .ledger
                .last_processed_block(&self.exchange_contract, self.chain_id, PROCESS_YIELD_EVENT)
                .await
            {
                Ok(last) => last,
                Err(e) => {
                    error!("error reading last processed yield block: {e}");
                    return;
                }
            };
            let (from, to) = match self.block_window(last).await {
                Ok(window) => window,
                Err(e) => {
                    error!("error reading block numbers: {e}");
                    return;
                }
            };
            if from > to {
                break;
            }

            info!(
                "exchange_id={} chain_id={} processing yield in block range {from} to {to}",
                self.exchange_id, self.chain_id
            );
            if !self.process_yield_events(from, to).await {
                error!("process_yield_events failed");
                return;
            }
            if let Err(e) = self
                .ledger
                .set_last_processed_block(
                    to,
                    &self.exchange_contract,
                    self.chain_id,
                    PROCESS_YIELD_EVENT,
                )
                .await
            {
                error!("error setting last processed yield block: {e}");
                return;
            }
        }
    }

    // --- event families over the shared dispatch loop -------------------

    pub(crate) async fn process_deposit_events(&self, from: u64, to: u64) -> bool {
        let addresses = [self.exchange_address, self.deposit_address];
        let topics = [self.topics.exchange_deposit, self.topics.pool_deposit];
        self.process_events(from, to, &addresses, &topics, &mut DepositEvents)
            .await
    }

    pub(crate) async fn process_stake_events(&self, from: u64, to: u64) -> bool {
        if self.vaults.is_empty() {
            return true;
        }
        let topics = [self.topics.vault_stake];
        self.process_events(from, to, &self.vaults, &topics, &mut StakeEvents)
            .await
    }

    pub(crate) async fn process_yield_events(&self, from: u64, to: u64) -> bool {
        let addresses = [self.exchange_address];
        let topics = [self.topics.claimed_yield];
        self.process_events(from, to, &addresses, &topics, &mut YieldEvents)
            .await
    }

    pub(crate) async fn process_withdrawal_receipt_events(&self, from: u64, to: u64) -> bool {
        let addresses = [self.exchange_address];
        let topics = [self.topics.withdrawal_receipt];
        let mut receipts = WithdrawalReceipts {
            ids: Vec::with_capacity(100),
        };
        self.process_events(from, to, &addresses, &topics, &mut receipts)
            .await
    }

    /// The generic dispatch loop shared by all event families: query logs
    /// for the range, decode each in order, hand them to the processor,
    /// then let the processor decide whether the range may commit.
    async fn process_events(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
        topic0: &[B256],
        processor: &mut dyn EventProcessor,
    ) -> bool {
        let filter = LogFilter::new(from, to, addresses, topic0);
        let logs = match self.filter_logs_with_retry(&filter).await {
            Ok(logs) => logs,
            Err(_) => return false,
        };

        info!(
            "exchange_id={} chain_id={} processing events, found {}",
            self.exchange_id,
            self.chain_id,
            logs.len()
        );

        let mut ended_early = false;
        for log in &logs {
            // chain-reorg artifact
            if log.removed {
                warn!("skipping removed log at block {}", log.block_number);
                continue;
            }
            // unconfirmed block
            if log.block_number == 0 {
                warn!(
                    "skipping log from pending block, tx {}",
                    hash_to_hex(&log.transaction_hash)
                );
                continue;
            }
            let Some(kind) = self.contract_kind(log.address) else {
                error!("unexpected event address: {}", log.address);
                continue;
            };
            let event = match decode_event(&self.topics, kind, log) {
                Ok(event) => event,
                Err(e) => {
                    error!("error decoding event log: {e}");
                    continue;
                }
            };
            match processor.on_event(self, log, &event).await {
                Flow::Continue => {}
                Flow::Stop => {
                    ended_early = true;
                    break;
                }
            }
        }

        processor.commit(self, ended_early).await
    }

    fn contract_kind(&self, address: Address) -> Option<ContractKind> {
        if address == self.exchange_address {
            Some(ContractKind::Exchange)
        } else if address == self.deposit_address {
            Some(ContractKind::DepositProxy)
        } else if self.vaults.contains(&address) {
            Some(ContractKind::Vault)
        } else {
            None
        }
    }

    /// Log query with a single reconnect-and-retry. A second failure
    /// abandons the batch; the same range is retried next tick.
    async fn filter_logs_with_retry(
        &self,
        filter: &LogFilter,
    ) -> Result<Vec<LogEntry>, ChainError> {
        match self.chain.filter_logs(filter).await {
            Ok(logs) => Ok(logs),
            Err(first) => {
                error!("error filtering event logs: {first}, re-dialing for one retry");
                if let Err(e) = self.chain.reconnect().await {
                    error!("error re-dialing chain provider: {e}");
                    return Err(e);
                }
                self.chain.filter_logs(filter).await.map_err(|e| {
                    error!("error filtering event logs on second attempt: {e}");
                    e
                })
            }
        }
    }

    // --- dropped-transaction reconciliation -----------------------------

    /// Cancel pending deposits/stakes whose transaction no longer exists
    /// on-chain. Only a definitive not-found cancels; any lookup error
    /// aborts the pass so nothing is canceled on uncertain information.
    pub async fn process_dropped_deposits_and_stakes(&self) {
        let mut pending = match self
            .ledger
            .pending_deposits(&self.exchange_id, self.chain_id)
            .await
        {
            Ok(ops) => ops,
            Err(e) => {
                error!("error retrieving pending deposits: {e}");
                return;
            }
        };
        match self
            .ledger
            .pending_stakes(&self.exchange_id, self.chain_id)
            .await
        {
            Ok(ops) => pending.extend(ops),
            Err(e) => {
                error!("error retrieving pending stakes: {e}");
                return;
            }
        }
        if !self.ensure_connected(Some(DEPOSIT_AND_STAKING_EVENT)).await {
            return;
        }

        for op in pending {
            if !is_older_than(op.timestamp_us, self.cancel_interval) {
                continue;
            }
            let Some(tx_hash) = parse_tx_hash(&op.tx_hash) else {
                error!("pending op {} has malformed tx hash {:?}", op.ops_id, op.tx_hash);
                continue;
            };
            match self.chain.transaction_by_hash(tx_hash).await {
                Ok(None) => {
                    info!(
                        "canceling pending op {} whose tx {} was dropped",
                        op.ops_id, op.tx_hash
                    );
                    if let Err(e) = self.ledger.pending_deposit_canceled(&op.ops_id).await {
                        error!("error canceling pending op {}: {e}", op.ops_id);
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    error!(
                        "error retrieving transaction {} by hash: {e}",
                        op.tx_hash
                    );
                    return;
                }
            }
        }
    }

    // --- pending withdrawal block-delay advance -------------------------

    /// Tell the ledger the block at which pending withdrawals become
    /// eligible to complete: `head + withdrawal_block_delay`.
    pub async fn update_pending_withdrawals(&self) {
        if !self.ensure_connected(Some(WITHDRAW_AND_UNSTAKE_EVENT)).await {
            return;
        }
        let current = match self.chain.latest_block_number().await {
            Ok(block) => block,
            Err(e) => {
                error!("error reading current block number: {e}");
                return;
            }
        };
        let future_block = current + self.withdrawal_block_delay;
        info!(
            "exchange_id={} current_block={current} future_block={future_block} delay={}",
            self.exchange_id, self.withdrawal_block_delay
        );
        if let Err(e) = self
            .ledger
            .update_pending_withdrawals(current, future_block, &self.exchange_contract)
            .await
        {
            error!("error updating pending withdrawals: {e}");
        }
    }

    // --- yield claim ----------------------------------------------------

    /// Submit the signed `claimYield()` call, doubling the gas price on
    /// an underpriced rejection, bounded to five attempts.
    pub async fn claim_yield(&self) -> Result<(), SettlementError> {
        if !self.ensure_connected(None).await {
            return Err(SettlementError::Chain(ChainError::NotConnected));
        }
        let Some(signer) = &self.signer else {
            return Err(SettlementError::ClaimYieldDisabled);
        };

        let nonce = self.chain.pending_nonce(signer.address()).await?;
        let mut gas_price = self.chain.gas_price().await?;
        let mut attempt = 1;
        loop {
            let raw = build_claim_yield_tx(
                signer,
                self.exchange_address,
                self.chain_id,
                nonce,
                gas_price,
            )?;
            match self.chain.send_raw_transaction(&raw).await {
                Ok(tx_hash) => {
                    info!("claim yield tx hash {}", hash_to_hex(&tx_hash));
                    return Ok(());
                }
                Err(e) if e.is_gas_too_low() && attempt < CLAIM_YIELD_MAX_ATTEMPTS => {
                    attempt += 1;
                    gas_price *= 2;
                    info!("gas price too low, doubled to {gas_price} (attempt {attempt})");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// --- event family processors --------------------------------------------

struct DepositEvents;

#[async_trait]
impl EventProcessor for DepositEvents {
    async fn on_event(
        &mut self,
        eh: &EthereumHandler,
        log: &LogEntry,
        event: &DecodedEvent,
    ) -> Flow {
        let DecodedEvent::Deposit {
            id,
            trader,
            amount,
            pool_id,
        } = event
        else {
            warn!("deposit processor got unexpected event kind");
            return Flow::Continue;
        };

        // a single pool transfer covers several user deposits; the proxy
        // encodes a zero pool id for individual ones
        let from_pool = log.address == eh.deposit_address;
        let pooled = pool_id.is_some_and(|p| !p.is_zero());
        // exchange Deposit events crediting the proxy itself are noise
        if *trader == eh.deposit_address && !from_pool {
            return Flow::Continue;
        }

        let wallet = wallet_from_address(trader);
        let amount = match money::token_units_to_decimal(*amount, eh.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                error!("bad deposit amount for wallet {wallet}: {e}");
                return Flow::Continue;
            }
        };
        if amount <= Decimal::ZERO {
            error!("wrong deposit amount {amount} found for wallet {wallet}");
            return Flow::Continue;
        }

        let deposit = Deposit {
            id: format!("d_{id}"),
            wallet: wallet.clone(),
            amount,
            tx: hash_to_hex(&log.transaction_hash),
            exchange_id: eh.exchange_id.clone(),
            chain_id: eh.chain_id,
            exchange_address: eh.exchange_contract.clone(),
        };
        let deposit_id = deposit.id.clone();
        debug!("deposit decoded: wallet={wallet} id={deposit_id} amount={amount}");

        match eh.ledger.profile_by_wallet(&wallet, &eh.exchange_id).await {
            Ok(Some(profile)) => {
                info!(
                    "processing deposit {deposit_id} for {}: {amount}, pooled {pooled}",
                    profile.wallet
                );
                if let Err(e) = eh
                    .ledger
                    .process_deposit(profile.profile_id, deposit, pooled)
                    .await
                {
                    error!("error processing deposit {deposit_id} for wallet {wallet}: {e}");
                }
                let _ = eh
                    .ledger
                    .invalidate_cache_and_notify(profile.profile_id)
                    .await;
            }
            Ok(None) => {
                info!("processing deposit {deposit_id} for unknown wallet {wallet}: {amount}");
                if let Err(e) = eh.ledger.process_deposit_unknown(deposit).await {
                    error!(
                        "error processing unknown deposit {deposit_id} for wallet {wallet}: {e}"
                    );
                }
            }
            Err(e) => error!("error resolving profile for wallet {wallet}: {e}"),
        }
        Flow::Continue
    }
}

struct StakeEvents;

#[async_trait]
impl EventProcessor for StakeEvents {
    async fn on_event(
        &mut self,
        eh: &EthereumHandler,
        log: &LogEntry,
        event: &DecodedEvent,
    ) -> Flow {
        let DecodedEvent::Stake { id, staker, amount } = event else {
            warn!("stake processor got unexpected event kind");
            return Flow::Continue;
        };

        let vault_wallet = wallet_from_address(&log.address);
        let staker_wallet = wallet_from_address(staker);
        let amount = match money::token_units_to_decimal(*amount, eh.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                error!("bad stake amount for staker {staker_wallet}: {e}");
                return Flow::Continue;
            }
        };
        if amount <= Decimal::ZERO {
            error!(
                "wrong stake amount {amount} found for staker {staker_wallet} on vault {vault_wallet}"
            );
            return Flow::Continue;
        }

        let vault_profile = match eh
            .ledger
            .profile_by_wallet(&vault_wallet, &eh.exchange_id)
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                error!("vault profile not found for stake {id} wallet {vault_wallet}");
                return Flow::Continue;
            }
            Err(e) => {
                error!("error retrieving vault profile for stake {id} wallet {vault_wallet}: {e}");
                return Flow::Continue;
            }
        };
        if vault_profile.profile_type != ProfileType::Vault {
            error!("profile is not a vault, stake {id} wallet {vault_wallet}");
            return Flow::Continue;
        }

        let staker_profile = match eh
            .ledger
            .profile_by_wallet(&staker_wallet, &eh.exchange_id)
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                error!("staker profile not found for stake {id} wallet {staker_wallet}");
                return Flow::Continue;
            }
            Err(e) => {
                error!(
                    "error retrieving staker profile for stake {id} wallet {staker_wallet}: {e}"
                );
                return Flow::Continue;
            }
        };

        // the vault's current NAV comes from a fresh cache read
        let vault_cache = match eh.ledger.invalidate_cache(vault_profile.profile_id).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(
                    "cache error for stake {id} vault profile_id {}: {e}",
                    vault_profile.profile_id
                );
                return Flow::Continue;
            }
        };

        let stake = Stake {
            id: format!("s_{id}"),
            vault_profile_id: vault_profile.profile_id,
            vault_wallet: vault_wallet.clone(),
            amount,
            current_nav: vault_cache.account_equity,
            tx: hash_to_hex(&log.transaction_hash),
        };
        let stake_id = stake.id.clone();
        info!("processing stake {stake_id} to {vault_wallet} by {staker_wallet}: {amount}");

        let result = eh
            .ledger
            .process_stake(staker_profile.profile_id, stake, false, &eh.exchange_id)
            .await;
        let _ = eh
            .ledger
            .invalidate_cache_and_notify(staker_profile.profile_id)
            .await;
        let _ = eh
            .ledger
            .invalidate_cache_and_notify(vault_profile.profile_id)
            .await;
        if let Err(e) = result {
            error!(
                "error processing stake {stake_id} to vault {vault_wallet} for wallet {staker_wallet}: {e}"
            );
        }
        Flow::Continue
    }
}

struct YieldEvents;

#[async_trait]
impl EventProcessor for YieldEvents {
    async fn on_event(
        &mut self,
        eh: &EthereumHandler,
        log: &LogEntry,
        event: &DecodedEvent,
    ) -> Flow {
        let DecodedEvent::ClaimedYield { amount } = event else {
            warn!("yield processor got unexpected event kind");
            return Flow::Continue;
        };

        let amount = match money::token_units_to_decimal(*amount, eh.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                error!("bad yield amount: {e}");
                return Flow::Continue;
            }
        };
        if amount <= Decimal::ZERO {
            if amount < Decimal::ZERO {
                error!("negative yield amount {amount}");
            }
            return Flow::Continue;
        }

        let id = yield_event_id(log.transaction_hash, log.log_index, eh.chain_id);
        let yield_event = Yield {
            id: format!("y_{}", hex::encode(id)),
            amount,
            tx: hash_to_hex(&log.transaction_hash),
            exchange_id: eh.exchange_id.clone(),
            chain_id: eh.chain_id,
            exchange_address: eh.exchange_contract.clone(),
        };
        let yield_id = yield_event.id.clone();
        info!("yield decoded: yield_id={yield_id} amount={amount}");
        if let Err(e) = eh.ledger.process_yield(yield_event).await {
            error!("error processing yield {yield_id}, amount {amount}: {e}");
        }
        Flow::Continue
    }
}

/// Accumulates `{id, tx_hash}` pairs across the whole range and commits
/// them in one ledger call, so withdrawal completion is atomic per range:
/// either every receipt is marked completed or none is.
struct WithdrawalReceipts {
    ids: Vec<WithdrawalTxInfo>,
}

#[async_trait]
impl EventProcessor for WithdrawalReceipts {
    async fn on_event(
        &mut self,
        _eh: &EthereumHandler,
        log: &LogEntry,
        event: &DecodedEvent,
    ) -> Flow {
        let DecodedEvent::WithdrawalReceipt { id } = event else {
            warn!("withdrawal processor got unexpected event kind");
            return Flow::Continue;
        };
        debug!("withdrawal receipt w_{id}");
        self.ids.push(WithdrawalTxInfo {
            id: format!("w_{id}"),
            tx_hash: hash_to_hex(&log.transaction_hash),
        });
        Flow::Continue
    }

    async fn commit(&mut self, eh: &EthereumHandler, _ended_early: bool) -> bool {
        match eh.ledger.completed_withdrawals(&self.ids).await {
            Ok(()) => true,
            Err(e) => {
                error!("error completing withdrawals batch: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::ledger::{BalanceOp, InMemoryLedger, OpStatus, Profile};
    use alloy::primitives::{Bytes, U256};

    const EXCHANGE: &str = "0x0e4a0e095ddb34158d705c3094c9fefd7da40bf6";
    const PROXY: &str = "0x1111111111111111111111111111111111111111";
    const VAULT: &str = "0x2222222222222222222222222222222222222222";
    const TRADER: &str = "0x3333333333333333333333333333333333333333";
    const CLAIMER_PK: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn test_config() -> HandlerConfig {
        HandlerConfig {
            exchange_id: "bfx".to_string(),
            chain_id: 81457,
            exchange_address: EXCHANGE.to_string(),
            deposit_address: PROXY.to_string(),
            provider_url: "http://127.0.0.1:8545".to_string(),
            default_from_block: 100,
            deposit_interval: 15,
            withdrawal_interval: 15,
            withdrawal_block_delay: 1800,
            confirmation_blocks: 10,
            cancel_interval: 60,
            process_yield: false,
            process_yield_interval: 0,
            claimer_pk: String::new(),
            vaults: vec![VAULT.to_string()],
            decimals: 6,
        }
    }

    struct Fixture {
        chain: Arc<MockChainClient>,
        ledger: Arc<InMemoryLedger>,
        shared: Arc<SettlementShared>,
        handler: EthereumHandler,
    }

    fn fixture_with(config: HandlerConfig, head: u64) -> Fixture {
        let chain = Arc::new(MockChainClient::new(head));
        let ledger = Arc::new(InMemoryLedger::new());
        let shared = Arc::new(SettlementShared::new());
        let handler = EthereumHandler::new(
            &config,
            chain.clone(),
            ledger.clone(),
            shared.clone(),
        )
        .unwrap();
        Fixture {
            chain,
            ledger,
            shared,
            handler,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_config(), 150)
    }

    fn addr(raw: &str) -> Address {
        parse_address(raw).unwrap()
    }

    fn word(value: u64) -> B256 {
        B256::from(U256::from(value))
    }

    fn amount_word(units: u64) -> Bytes {
        Bytes::from(U256::from(units).to_be_bytes::<32>().to_vec())
    }

    fn exchange_deposit_log(block: u64, id: u64, trader: Address, units: u64) -> LogEntry {
        let topics = EventTopics::derive();
        LogEntry {
            address: addr(EXCHANGE),
            topics: vec![topics.exchange_deposit, word(id), trader.into_word()],
            data: amount_word(units),
            block_number: block,
            transaction_hash: word(0xd000 + id),
            log_index: 0,
            removed: false,
        }
    }

    fn pool_deposit_log(block: u64, id: u64, trader: Address, units: u64, pool_id: u64) -> LogEntry {
        let topics = EventTopics::derive();
        LogEntry {
            address: addr(PROXY),
            topics: vec![
                topics.pool_deposit,
                word(id),
                trader.into_word(),
                word(pool_id),
            ],
            data: amount_word(units),
            block_number: block,
            transaction_hash: word(0xb000 + id),
            log_index: 0,
            removed: false,
        }
    }

    fn stake_log(block: u64, id: u64, staker: Address, units: u64) -> LogEntry {
        let topics = EventTopics::derive();
        LogEntry {
            address: addr(VAULT),
            topics: vec![topics.vault_stake, word(id), staker.into_word()],
            data: amount_word(units),
            block_number: block,
            transaction_hash: word(0x5000 + id),
            log_index: 0,
            removed: false,
        }
    }

    fn withdrawal_receipt_log(block: u64, id: u64) -> LogEntry {
        let topics = EventTopics::derive();
        LogEntry {
            address: addr(EXCHANGE),
            topics: vec![
                topics.withdrawal_receipt,
                word(id),
                addr(TRADER).into_word(),
            ],
            data: amount_word(1_000_000),
            block_number: block,
            transaction_hash: word(0xa000 + id),
            log_index: 0,
            removed: false,
        }
    }

    fn claimed_yield_log(block: u64, units: u64, log_index: u64) -> LogEntry {
        let topics = EventTopics::derive();
        LogEntry {
            address: addr(EXCHANGE),
            topics: vec![topics.claimed_yield],
            data: amount_word(units),
            block_number: block,
            transaction_hash: word(0xe000),
            log_index,
            removed: false,
        }
    }

    fn trader_profile(id: u64, wallet: &str) -> Profile {
        Profile {
            profile_id: id,
            profile_type: ProfileType::Trader,
            status: "active".to_string(),
            wallet: wallet.to_string(),
            exchange_id: "bfx".to_string(),
            created_at: 0,
        }
    }

    fn vault_profile(id: u64) -> Profile {
        Profile {
            profile_id: id,
            profile_type: ProfileType::Vault,
            status: "active".to_string(),
            wallet: VAULT.to_string(),
            exchange_id: "bfx".to_string(),
            created_at: 0,
        }
    }

    async fn checkpoint(fx: &Fixture, event: &str) -> Option<u64> {
        fx.ledger
            .last_processed_block(fx.handler.exchange_contract(), 81457, event)
            .await
            .unwrap()
    }

    // default_from_block=100, head=150, confirmations=10 -> window [100, 140]
    #[tokio::test]
    async fn test_first_scan_window_uses_default_from_block() {
        let fx = fixture();
        fx.handler.process_deposits_and_staking().await;

        let calls = fx.chain.filter_calls();
        assert!(calls.contains(&(100, 140)));
        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, Some(140));
    }

    #[tokio::test]
    async fn test_deposit_applied_to_known_profile() {
        let fx = fixture();
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.chain
            .add_log(exchange_deposit_log(120, 42, addr(TRADER), 1_500_000));

        fx.handler.process_deposits_and_staking().await;

        let state = fx.ledger.state().await;
        assert_eq!(state.deposits.len(), 1);
        let (profile_id, deposit, pooled) = &state.deposits[0];
        assert_eq!(*profile_id, 7);
        assert_eq!(deposit.id, "d_42");
        assert_eq!(deposit.amount, Decimal::new(15, 1));
        assert!(!pooled);
        assert_eq!(state.cache_notifications, vec![7]);
    }

    #[tokio::test]
    async fn test_unknown_wallet_routes_to_unknown_bucket() {
        let fx = fixture();
        fx.chain
            .add_log(exchange_deposit_log(120, 42, addr(TRADER), 1_500_000));

        fx.handler.process_deposits_and_staking().await;

        let state = fx.ledger.state().await;
        assert!(state.deposits.is_empty());
        assert_eq!(state.unknown_deposits.len(), 1);
        assert_eq!(state.unknown_deposits[0].id, "d_42");
    }

    // pool id zero is an individual deposit; non-zero is pooled
    #[tokio::test]
    async fn test_pool_id_distinguishes_pooled_deposits() {
        let fx = fixture();
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.chain
            .add_log(pool_deposit_log(120, 1, addr(TRADER), 1_000_000, 0));
        fx.chain
            .add_log(pool_deposit_log(121, 2, addr(TRADER), 1_000_000, 7));

        fx.handler.process_deposits_and_staking().await;

        let state = fx.ledger.state().await;
        assert_eq!(state.deposits.len(), 2);
        assert!(!state.deposits[0].2);
        assert!(state.deposits[1].2);
    }

    // exchange Deposit events crediting the proxy's own address are noise
    #[tokio::test]
    async fn test_proxy_self_deposit_ignored() {
        let fx = fixture();
        fx.chain
            .add_log(exchange_deposit_log(120, 3, addr(PROXY), 1_000_000));

        fx.handler.process_deposits_and_staking().await;

        let state = fx.ledger.state().await;
        assert!(state.deposits.is_empty());
        assert!(state.unknown_deposits.is_empty());
        drop(state);
        // the batch itself still commits
        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, Some(140));
    }

    #[tokio::test]
    async fn test_zero_amount_deposit_skipped() {
        let fx = fixture();
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.chain.add_log(exchange_deposit_log(120, 4, addr(TRADER), 0));

        fx.handler.process_deposits_and_staking().await;

        assert!(fx.ledger.state().await.deposits.is_empty());
        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, Some(140));
    }

    #[tokio::test]
    async fn test_removed_and_pending_logs_skipped() {
        let fx = fixture();
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        let mut reorged = exchange_deposit_log(120, 5, addr(TRADER), 1_000_000);
        reorged.removed = true;
        fx.chain.add_log(reorged);
        let mut pending = exchange_deposit_log(120, 6, addr(TRADER), 1_000_000);
        pending.block_number = 0;
        fx.chain.add_log(pending);

        fx.handler.process_deposits_and_staking().await;

        assert!(fx.ledger.state().await.deposits.is_empty());
    }

    // one failed log query, then a successful retry: checkpoint advances
    #[tokio::test]
    async fn test_filter_retry_recovers_and_advances() {
        let fx = fixture();
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.chain
            .add_log(exchange_deposit_log(120, 8, addr(TRADER), 1_000_000));
        fx.chain.fail_next_filters(1);

        fx.handler.process_deposits_and_staking().await;

        assert_eq!(fx.ledger.state().await.deposits.len(), 1);
        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, Some(140));
    }

    // both attempts fail: batch abandoned, checkpoint untouched
    #[tokio::test]
    async fn test_filter_double_failure_leaves_checkpoint() {
        let fx = fixture();
        fx.chain.fail_next_filters(2);

        fx.handler.process_deposits_and_staking().await;

        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, None);
    }

    #[tokio::test]
    async fn test_replayed_range_does_not_double_apply() {
        let fx = fixture();
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.chain
            .add_log(exchange_deposit_log(120, 9, addr(TRADER), 1_000_000));

        fx.handler.process_deposits_and_staking().await;
        // force a replay of the same range
        fx.ledger
            .state()
            .await
            .checkpoints
            .remove(&(EXCHANGE.to_string(), 81457, DEPOSIT_AND_STAKING_EVENT.to_string()));
        fx.handler.process_deposits_and_staking().await;

        assert_eq!(fx.ledger.state().await.deposits.len(), 1);
    }

    #[tokio::test]
    async fn test_stake_applied_with_vault_nav() {
        let fx = fixture();
        fx.ledger.insert_profile(vault_profile(20)).await;
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.ledger
            .set_account_equity(20, Decimal::from(123_456))
            .await;
        fx.chain.add_log(stake_log(125, 5, addr(TRADER), 2_000_000));

        fx.handler.process_deposits_and_staking().await;

        let state = fx.ledger.state().await;
        assert_eq!(state.stakes.len(), 1);
        let (staker_profile_id, stake) = &state.stakes[0];
        assert_eq!(*staker_profile_id, 7);
        assert_eq!(stake.id, "s_5");
        assert_eq!(stake.vault_profile_id, 20);
        assert_eq!(stake.current_nav, Decimal::from(123_456));
        // staker and vault caches refreshed
        assert!(state.cache_notifications.contains(&7));
        assert!(state.cache_notifications.contains(&20));
    }

    #[tokio::test]
    async fn test_stake_to_non_vault_profile_skipped() {
        let fx = fixture();
        // a profile exists at the vault address but is not a vault
        fx.ledger.insert_profile(trader_profile(21, VAULT)).await;
        fx.ledger.insert_profile(trader_profile(7, TRADER)).await;
        fx.chain.add_log(stake_log(125, 6, addr(TRADER), 2_000_000));

        fx.handler.process_deposits_and_staking().await;

        assert!(fx.ledger.state().await.stakes.is_empty());
        // malformed stakes do not fail the batch
        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, Some(140));
    }

    #[tokio::test]
    async fn test_withdrawal_batch_commits_atomically() {
        let fx = fixture();
        fx.chain.add_log(withdrawal_receipt_log(110, 1));
        fx.chain.add_log(withdrawal_receipt_log(130, 2));
        fx.ledger.set_fail_completed_withdrawals(true).await;

        fx.handler.complete_withdrawals_and_unstakes().await;

        // gateway failed mid-batch: nothing completed, checkpoint untouched
        assert!(fx.ledger.state().await.completed_withdrawals.is_empty());
        assert_eq!(checkpoint(&fx, WITHDRAW_AND_UNSTAKE_EVENT).await, None);

        fx.ledger.set_fail_completed_withdrawals(false).await;
        fx.handler.complete_withdrawals_and_unstakes().await;

        let state = fx.ledger.state().await;
        assert_eq!(state.completed_withdrawals.len(), 2);
        assert_eq!(state.completed_withdrawals[0].id, "w_1");
        drop(state);
        assert_eq!(checkpoint(&fx, WITHDRAW_AND_UNSTAKE_EVENT).await, Some(140));
    }

    // suspension flipped between two sub-ranges halts the scan before the
    // next range commits, without un-committing finished work
    #[tokio::test]
    async fn test_suspension_interrupts_multi_range_scan() {
        let fx = fixture_with(test_config(), 4500);
        let shared = fx.shared.clone();
        fx.chain.set_filter_hook(move |from, _to| {
            if from == 2100 {
                shared.set_suspended(true);
            }
        });

        fx.handler.complete_withdrawals_and_unstakes().await;

        // first range [100, 2099] committed; second range halted pre-commit
        assert_eq!(checkpoint(&fx, WITHDRAW_AND_UNSTAKE_EVENT).await, Some(2099));
        assert_eq!(fx.chain.filter_calls(), vec![(100, 2099), (2100, 4099)]);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_self_heals() {
        let fx = fixture();
        // ahead of the chain head
        fx.ledger
            .set_last_processed_block(10_000, EXCHANGE, 81457, DEPOSIT_AND_STAKING_EVENT)
            .await
            .unwrap();

        fx.handler.process_deposits_and_staking().await;

        // reset to default 100, then scanned [101, 140]
        assert!(fx.chain.filter_calls().contains(&(101, 140)));
        assert_eq!(checkpoint(&fx, DEPOSIT_AND_STAKING_EVENT).await, Some(140));
    }

    #[tokio::test]
    async fn test_checkpoint_below_floor_self_heals() {
        let fx = fixture();
        fx.ledger
            .set_last_processed_block(5, EXCHANGE, 81457, DEPOSIT_AND_STAKING_EVENT)
            .await
            .unwrap();

        fx.handler.process_deposits_and_staking().await;

        assert!(fx.chain.filter_calls().contains(&(101, 140)));
    }

    fn pending_op(ops_id: &str, tx_hash: B256, age: Duration) -> BalanceOp {
        BalanceOp {
            ops_id: ops_id.to_string(),
            status: OpStatus::Pending,
            tx_hash: hash_to_hex(&tx_hash),
            wallet: TRADER.to_string(),
            amount: Decimal::ONE,
            timestamp_us: Utc::now().timestamp_micros() - age.as_micros() as i64,
            exchange_id: "bfx".to_string(),
            chain_id: 81457,
        }
    }

    #[tokio::test]
    async fn test_dropped_pending_deposit_canceled() {
        let fx = fixture();
        // old, and its tx is unknown to the node
        fx.ledger
            .push_pending_deposit(pending_op("d_1", word(0xdead), Duration::from_secs(120)))
            .await;
        // old, but the tx still exists (even unconfirmed)
        fx.ledger
            .push_pending_deposit(pending_op("d_2", word(0xbeef), Duration::from_secs(120)))
            .await;
        fx.chain.add_transaction(word(0xbeef), 0);
        // recent: not yet eligible for cancelation
        fx.ledger
            .push_pending_deposit(pending_op("d_3", word(0xcafe), Duration::from_secs(1)))
            .await;

        fx.handler.process_dropped_deposits_and_stakes().await;

        assert_eq!(fx.ledger.state().await.canceled_ops, vec!["d_1"]);
    }

    // a lookup error must abort the pass without canceling anything
    #[tokio::test]
    async fn test_lookup_error_aborts_reconciliation() {
        let fx = fixture();
        fx.ledger
            .push_pending_deposit(pending_op("d_1", word(0xdead), Duration::from_secs(120)))
            .await;
        fx.chain.set_fail_tx_lookup(true);

        fx.handler.process_dropped_deposits_and_stakes().await;

        assert!(fx.ledger.state().await.canceled_ops.is_empty());
    }

    #[tokio::test]
    async fn test_update_pending_withdrawals_window() {
        let fx = fixture();
        fx.handler.update_pending_withdrawals().await;

        let state = fx.ledger.state().await;
        assert_eq!(state.withdrawal_windows.len(), 1);
        let (current, future, contract) = &state.withdrawal_windows[0];
        assert_eq!(*current, 150);
        assert_eq!(*future, 150 + 1800);
        assert_eq!(contract, EXCHANGE);
    }

    #[tokio::test]
    async fn test_yield_events_deduped_on_replay() {
        let fx = fixture();
        fx.chain.add_log(claimed_yield_log(120, 11_000_000, 3));

        fx.handler.distribute_yield().await;
        fx.ledger
            .state()
            .await
            .checkpoints
            .remove(&(EXCHANGE.to_string(), 81457, PROCESS_YIELD_EVENT.to_string()));
        fx.handler.distribute_yield().await;

        let state = fx.ledger.state().await;
        assert_eq!(state.yields.len(), 1);
        assert_eq!(state.yields[0].amount, Decimal::from(11));
        assert!(state.yields[0].id.starts_with("y_"));
    }

    #[tokio::test]
    async fn test_negative_or_zero_yield_skipped() {
        let fx = fixture();
        fx.chain.add_log(claimed_yield_log(120, 0, 0));

        fx.handler.distribute_yield().await;

        assert!(fx.ledger.state().await.yields.is_empty());
        assert_eq!(checkpoint(&fx, PROCESS_YIELD_EVENT).await, Some(140));
    }

    fn yield_config() -> HandlerConfig {
        let mut config = test_config();
        config.process_yield = true;
        config.process_yield_interval = 3600;
        config.claimer_pk = CLAIMER_PK.to_string();
        config
    }

    #[tokio::test]
    async fn test_claim_yield_doubles_gas_until_accepted() {
        let fx = fixture_with(yield_config(), 150);
        fx.chain.set_gas_too_low_rejections(2);

        fx.handler.claim_yield().await.unwrap();

        assert_eq!(fx.chain.sent_raw_count(), 1);
    }

    #[tokio::test]
    async fn test_claim_yield_bounded_attempts() {
        let fx = fixture_with(yield_config(), 150);
        fx.chain.set_gas_too_low_rejections(10);

        let err = fx.handler.claim_yield().await.unwrap_err();
        assert!(matches!(err, SettlementError::Chain(e) if e.is_gas_too_low()));
        assert_eq!(fx.chain.sent_raw_count(), 0);
    }

    #[tokio::test]
    async fn test_claim_yield_without_key_rejected() {
        let fx = fixture();
        let err = fx.handler.claim_yield().await.unwrap_err();
        assert!(matches!(err, SettlementError::ClaimYieldDisabled));
    }

    #[test]
    fn test_is_older_than() {
        let now = Utc::now().timestamp_micros();
        assert!(is_older_than(now - 120_000_000, Duration::from_secs(60)));
        assert!(!is_older_than(now, Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(parse_address(EXCHANGE).is_ok());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not hex at all").is_err());
    }
}

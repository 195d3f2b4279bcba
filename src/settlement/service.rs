//! Settlement Service - orchestration and the withdrawal circuit breaker.
//!
//! Owns one [`EthereumHandler`] per configured contract and runs three
//! independently scheduled loops per handler: deposits/stakes,
//! withdrawals and yield. Handlers run in isolation; the only state
//! shared across them is the withdrawal suspension flag and its guarding
//! lock, both owned here and passed to handlers by handle.
//!
//! Loops are single-flight by construction: each task awaits its tick
//! body before sleeping again, so the same loop never overlaps itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use alloy::primitives::U256;

use crate::chain::ChainClient;
use crate::ledger::LedgerApi;
use crate::money;

use super::config::HandlerConfig;
use super::error::SettlementError;
use super::handler::EthereumHandler;

/// Pause between claiming yield and scanning for its distribution
/// events, letting the claim transaction land on-chain.
const YIELD_SETTLE_PAUSE: Duration = Duration::from_secs(300);

/// Rolling 24h withdrawal ceiling: 4,000,000 tokens at the canonical
/// 18-decimal scale. Exactly at the ceiling is allowed; above suspends.
fn max_withdrawal_ceiling() -> U256 {
    U256::from(4_000_000u64) * U256::from(10u64).pow(U256::from(money::CANONICAL_DECIMALS))
}

/// State shared by every handler of one service instance: the cached
/// withdrawal suspension flag and the lock serializing withdrawal-risk
/// evaluation across concurrent ticks.
pub struct SettlementShared {
    withdrawal_suspended: AtomicBool,
    withdraw_lock: Mutex<()>,
}

impl Default for SettlementShared {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementShared {
    pub fn new() -> Self {
        Self {
            withdrawal_suspended: AtomicBool::new(false),
            withdraw_lock: Mutex::new(()),
        }
    }

    pub fn suspended(&self) -> bool {
        self.withdrawal_suspended.load(Ordering::SeqCst)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.withdrawal_suspended.store(suspended, Ordering::SeqCst);
    }
}

struct HandlerEntry {
    handler: Arc<EthereumHandler>,
    config: HandlerConfig,
}

pub struct SettlementService {
    ledger: Arc<dyn LedgerApi>,
    shared: Arc<SettlementShared>,
    handlers: Vec<HandlerEntry>,
    stop: watch::Sender<bool>,
}

impl SettlementService {
    pub fn new(ledger: Arc<dyn LedgerApi>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            ledger,
            shared: Arc::new(SettlementShared::new()),
            handlers: Vec::new(),
            stop,
        }
    }

    pub fn shared(&self) -> Arc<SettlementShared> {
        self.shared.clone()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Register one contract/chain pair: validate its configuration,
    /// record the contract binding with the ledger so other subsystems
    /// can resolve inbound events, and build its handler.
    pub async fn add_handler(
        &mut self,
        config: HandlerConfig,
        chain: Arc<dyn ChainClient>,
    ) -> Result<Arc<EthereumHandler>, SettlementError> {
        config.validate()?;
        self.ledger
            .add_contract_map(
                &config.exchange_address.to_lowercase(),
                config.chain_id,
                &config.exchange_id.to_lowercase(),
            )
            .await?;

        let handler = Arc::new(EthereumHandler::new(
            &config,
            chain,
            self.ledger.clone(),
            self.shared.clone(),
        )?);
        info!(
            "exchange_id={} chain_id={} settlement handler created",
            config.exchange_id, config.chain_id
        );
        self.handlers.push(HandlerEntry {
            handler: handler.clone(),
            config,
        });
        Ok(handler)
    }

    /// Spawn every per-handler loop. The returned tasks run until
    /// [`stop`](Self::stop) is called; loop starts are staggered so the
    /// three loops of one handler do not burst RPC calls at the same
    /// wall-clock moment.
    pub fn run(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(self.handlers.len() * 3);

        for entry in &self.handlers {
            let deposit_interval = Duration::from_secs(entry.config.deposit_interval);
            let withdrawal_interval = Duration::from_secs(entry.config.withdrawal_interval);
            let withdrawal_delay = deposit_interval.min(withdrawal_interval) / 2;
            let yield_delay = withdrawal_delay * 3 / 2;

            info!(
                "starting settlement loops for exchange_id={} chain_id={}, deposit interval {:?}, \
                 withdrawal interval {:?}, yield interval {}s",
                entry.handler.exchange_id(),
                entry.handler.chain_id(),
                deposit_interval,
                withdrawal_interval,
                entry.config.process_yield_interval
            );

            {
                let handler = entry.handler.clone();
                let mut stop = self.stop.subscribe();
                tasks.push(tokio::spawn(async move {
                    loop {
                        if !pause(&mut stop, deposit_interval).await {
                            return;
                        }
                        debug!(
                            "tick: exchange_id={} chain_id={} deposits and staking",
                            handler.exchange_id(),
                            handler.chain_id()
                        );
                        handler.process_deposits_and_staking().await;
                    }
                }));
            }

            {
                let handler = entry.handler.clone();
                let ledger = self.ledger.clone();
                let shared = self.shared.clone();
                let mut stop = self.stop.subscribe();
                tasks.push(tokio::spawn(async move {
                    if !pause(&mut stop, withdrawal_delay).await {
                        return;
                    }
                    loop {
                        if !pause(&mut stop, withdrawal_interval).await {
                            return;
                        }
                        debug!(
                            "tick: exchange_id={} chain_id={} withdrawals",
                            handler.exchange_id(),
                            handler.chain_id()
                        );
                        Self::withdrawal_tick(&ledger, &shared, &handler).await;
                    }
                }));
            }

            if entry.config.process_yield && entry.config.process_yield_interval > 0 {
                let handler = entry.handler.clone();
                let yield_interval = Duration::from_secs(entry.config.process_yield_interval);
                let mut stop = self.stop.subscribe();
                tasks.push(tokio::spawn(async move {
                    if !pause(&mut stop, yield_delay).await {
                        return;
                    }
                    // claim immediately on startup, then on every tick
                    loop {
                        debug!(
                            "tick: exchange_id={} chain_id={} yield",
                            handler.exchange_id(),
                            handler.chain_id()
                        );
                        if let Err(e) = handler.claim_yield().await {
                            error!("error claiming yield: {e}");
                        }
                        if !pause(&mut stop, YIELD_SETTLE_PAUSE).await {
                            return;
                        }
                        handler.distribute_yield().await;
                        if !pause(&mut stop, yield_interval).await {
                            return;
                        }
                    }
                }));
            }
        }

        tasks
    }

    /// Stop every loop cooperatively at its next wait boundary. In-flight
    /// network calls finish; they are just not re-issued.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn withdrawals_suspended(&self) -> bool {
        self.shared.suspended()
    }

    /// Flip the circuit breaker: cache the flag and persist it. The
    /// engine never clears it; resumption is an operator action.
    pub async fn suspend_withdrawals(&self) {
        Self::suspend(&self.ledger, &self.shared).await;
    }

    // --- per-tick entry points (also exercised directly by tests) -------

    pub async fn process_deposits_and_staking(&self, handler: &EthereumHandler) {
        handler.process_deposits_and_staking().await;
    }

    pub async fn process_withdrawal(&self, handler: &Arc<EthereumHandler>) {
        Self::withdrawal_tick(&self.ledger, &self.shared, handler).await;
    }

    pub async fn distribute_yield(&self, handler: &EthereumHandler) {
        handler.distribute_yield().await;
    }

    pub async fn claim_yield(&self, handler: &EthereumHandler) -> Result<(), SettlementError> {
        handler.claim_yield().await
    }

    /// One withdrawal tick: refresh the suspension flag (treating an
    /// unreadable flag as suspended), evaluate the rolling-volume risk
    /// gate under the dedicated lock, then run the completion scan
    /// outside the lock.
    async fn withdrawal_tick(
        ledger: &Arc<dyn LedgerApi>,
        shared: &Arc<SettlementShared>,
        handler: &Arc<EthereumHandler>,
    ) {
        match ledger.withdrawals_suspended().await {
            Ok(suspended) => shared.set_suspended(suspended),
            Err(e) => {
                error!("error checking if withdrawals are suspended: {e}");
                shared.set_suspended(true);
            }
        }
        if shared.suspended() {
            info!("processing of withdrawals is suspended");
            return;
        }

        {
            let _guard = shared.withdraw_lock.lock().await;
            Self::evaluate_withdrawal_risk(ledger, shared, handler).await;
        }

        handler.complete_withdrawals_and_unstakes().await;
    }

    /// Compare the rolling 24h withdrawal volume, at the canonical
    /// 18-decimal scale, against the fixed ceiling. Over the ceiling
    /// flips the persistent suspension; otherwise the pending-withdrawal
    /// delay window advances.
    async fn evaluate_withdrawal_risk(
        ledger: &Arc<dyn LedgerApi>,
        shared: &Arc<SettlementShared>,
        handler: &Arc<EthereumHandler>,
    ) {
        let withdrawals = match ledger
            .pending_withdrawals(handler.exchange_id(), handler.chain_id())
            .await
        {
            Ok(withdrawals) => withdrawals,
            Err(e) => {
                error!("error retrieving pending withdrawals: {e}");
                return;
            }
        };
        if withdrawals.is_empty() {
            debug!("found no pending withdrawals");
            return;
        }

        let rolling = match ledger.rolling_24h_withdrawals().await {
            Ok(rolling) => rolling,
            Err(e) => {
                error!("error reading rolling 24h withdrawal volume: {e}");
                return;
            }
        };
        let total = match money::decimal_to_token_units(rolling, money::CANONICAL_DECIMALS) {
            Ok(total) => total,
            Err(e) => {
                error!("error converting rolling 24h withdrawal volume {rolling}: {e}");
                return;
            }
        };

        if total > max_withdrawal_ceiling() {
            error!("rolling 24h withdrawal volume {total} over ceiling, suspending withdrawals");
            Self::suspend(ledger, shared).await;
            return;
        }

        handler.update_pending_withdrawals().await;
    }

    async fn suspend(ledger: &Arc<dyn LedgerApi>, shared: &Arc<SettlementShared>) {
        shared.set_suspended(true);
        if let Err(e) = ledger.suspend_withdrawals().await {
            error!("error suspending withdrawals: {e}");
        }
    }
}

/// Sleep for `duration` unless the stop signal fires first. Returns
/// false when the loop should exit.
async fn pause(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::ledger::{BalanceOp, InMemoryLedger, OpStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;

    const EXCHANGE: &str = "0x0e4a0e095ddb34158d705c3094c9fefd7da40bf6";

    fn test_config() -> HandlerConfig {
        HandlerConfig {
            exchange_id: "bfx".to_string(),
            chain_id: 81457,
            exchange_address: EXCHANGE.to_string(),
            deposit_address: "0x1111111111111111111111111111111111111111".to_string(),
            provider_url: "http://127.0.0.1:8545".to_string(),
            default_from_block: 100,
            deposit_interval: 1,
            withdrawal_interval: 1,
            withdrawal_block_delay: 1800,
            confirmation_blocks: 10,
            cancel_interval: 60,
            process_yield: false,
            process_yield_interval: 0,
            claimer_pk: String::new(),
            vaults: vec![],
            decimals: 6,
        }
    }

    fn pending_withdrawal(amount: Decimal) -> BalanceOp {
        BalanceOp {
            ops_id: "w_1".to_string(),
            status: OpStatus::Pending,
            tx_hash: String::new(),
            wallet: "0xabc".to_string(),
            amount,
            timestamp_us: Utc::now().timestamp_micros(),
            exchange_id: "bfx".to_string(),
            chain_id: 81457,
        }
    }

    async fn service_fixture() -> (
        SettlementService,
        Arc<EthereumHandler>,
        Arc<MockChainClient>,
        Arc<InMemoryLedger>,
    ) {
        let ledger = Arc::new(InMemoryLedger::new());
        let chain = Arc::new(MockChainClient::new(150));
        let mut service = SettlementService::new(ledger.clone());
        let handler = service
            .add_handler(test_config(), chain.clone())
            .await
            .unwrap();
        (service, handler, chain, ledger)
    }

    #[tokio::test]
    async fn test_add_handler_registers_contract_binding() {
        let (service, _, _, ledger) = service_fixture().await;

        assert_eq!(service.handler_count(), 1);
        let state = ledger.state().await;
        assert_eq!(state.contract_maps.len(), 1);
        assert_eq!(state.contract_maps[0].contract_address, EXCHANGE);
        assert_eq!(state.contract_maps[0].exchange_id, "bfx");
        assert_eq!(state.contract_maps[0].chain_id, 81457);
    }

    #[tokio::test]
    async fn test_add_handler_rejects_invalid_config() {
        let ledger = Arc::new(InMemoryLedger::new());
        let chain = Arc::new(MockChainClient::new(150));
        let mut service = SettlementService::new(ledger);

        let mut config = test_config();
        config.confirmation_blocks = 0;
        assert!(service.add_handler(config, chain).await.is_err());
    }

    // rolling volume exactly at the ceiling does not suspend
    #[tokio::test]
    async fn test_volume_at_ceiling_does_not_suspend() {
        let (service, handler, _, ledger) = service_fixture().await;
        ledger.push_pending_withdrawal(pending_withdrawal(Decimal::ONE)).await;
        ledger.set_rolling_24h(Decimal::from(4_000_000u64)).await;

        service.process_withdrawal(&handler).await;

        assert!(!service.withdrawals_suspended());
        assert!(!ledger.state().await.suspended);
        // the delay window advanced
        assert_eq!(ledger.state().await.withdrawal_windows.len(), 1);
    }

    // one token unit above the ceiling suspends, persistently
    #[tokio::test]
    async fn test_volume_above_ceiling_suspends() {
        let (service, handler, _, ledger) = service_fixture().await;
        ledger.push_pending_withdrawal(pending_withdrawal(Decimal::ONE)).await;
        // 4,000,000 + 10^-18
        let above = Decimal::from_i128_with_scale(4_000_000_000_000_000_000_000_001, 18);
        ledger.set_rolling_24h(above).await;

        service.process_withdrawal(&handler).await;

        assert!(service.withdrawals_suspended());
        assert!(ledger.state().await.suspended);
        assert!(ledger.state().await.withdrawal_windows.is_empty());
        // the completion scan was skipped too
        let checkpoint = ledger
            .last_processed_block(EXCHANGE, 81457, super::super::WITHDRAW_AND_UNSTAKE_EVENT)
            .await
            .unwrap();
        assert_eq!(checkpoint, None);
    }

    // an unreadable suspension flag is treated as suspended
    #[tokio::test]
    async fn test_unreadable_flag_fails_safe() {
        let (service, handler, chain, ledger) = service_fixture().await;
        ledger.set_fail_suspended_reads(true).await;

        service.process_withdrawal(&handler).await;

        assert!(service.withdrawals_suspended());
        assert!(chain.filter_calls().is_empty());
    }

    // a persisted suspension skips the whole tick
    #[tokio::test]
    async fn test_persisted_suspension_skips_tick() {
        let (service, handler, chain, ledger) = service_fixture().await;
        ledger.suspend_withdrawals().await.unwrap();
        ledger.push_pending_withdrawal(pending_withdrawal(Decimal::ONE)).await;

        service.process_withdrawal(&handler).await;

        assert!(service.withdrawals_suspended());
        assert!(chain.filter_calls().is_empty());
        assert!(ledger.state().await.withdrawal_windows.is_empty());
    }

    #[tokio::test]
    async fn test_no_pending_withdrawals_skips_risk_gate() {
        let (service, handler, _, ledger) = service_fixture().await;
        ledger.set_rolling_24h(Decimal::from(9_000_000u64)).await;

        service.process_withdrawal(&handler).await;

        // no pending withdrawals: the risk gate never ran
        assert!(!service.withdrawals_suspended());
        assert!(ledger.state().await.withdrawal_windows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_and_stop_terminates_loops() {
        let (service, _, _, _) = service_fixture().await;

        let tasks = service.run();
        assert_eq!(tasks.len(), 2);

        service.stop();
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(60), task)
                .await
                .expect("loop did not stop")
                .expect("loop panicked");
        }
    }

    #[test]
    fn test_ceiling_constant() {
        let ceiling = max_withdrawal_ceiling();
        assert_eq!(
            ceiling.to_string(),
            "4000000000000000000000000" // 4,000,000 * 10^18
        );
    }
}

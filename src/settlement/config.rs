use serde::Deserialize;

use super::error::SettlementError;

fn default_interval() -> u64 {
    15
}

fn default_withdrawal_block_delay() -> u64 {
    1800
}

fn default_confirmation_blocks() -> u64 {
    12
}

fn default_cancel_interval() -> u64 {
    60
}

/// Per-contract/chain settlement configuration.
///
/// One entry exists for every exchange contract the service reconciles;
/// each gets its own handler, checkpoints and timer loops.
#[derive(Debug, Deserialize, Clone)]
pub struct HandlerConfig {
    pub exchange_id: String,
    pub chain_id: u64,
    pub exchange_address: String,
    /// Pooled-deposit proxy contract.
    pub deposit_address: String,
    pub provider_url: String,
    /// Block to start scanning from when no checkpoint exists, and the
    /// floor below which a stored checkpoint is considered corrupted.
    pub default_from_block: u64,
    /// Seconds between deposit/stake scans.
    #[serde(default = "default_interval")]
    pub deposit_interval: u64,
    /// Seconds between withdrawal scans.
    #[serde(default = "default_interval")]
    pub withdrawal_interval: u64,
    /// Blocks a pending withdrawal must wait before becoming eligible.
    #[serde(default = "default_withdrawal_block_delay")]
    pub withdrawal_block_delay: u64,
    /// Confirmation lag subtracted from the head before scanning.
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    /// Seconds before a pending operation is checked for a dropped
    /// transaction.
    #[serde(default = "default_cancel_interval")]
    pub cancel_interval: u64,
    #[serde(default)]
    pub process_yield: bool,
    /// Seconds between yield claim/distribute cycles.
    #[serde(default)]
    pub process_yield_interval: u64,
    /// Hex-encoded secp256k1 key of the yield claimer wallet.
    #[serde(default)]
    pub claimer_pk: String,
    /// Vault contracts whose Stake events this handler consumes.
    #[serde(default)]
    pub vaults: Vec<String>,
    /// Token decimals of the exchange's settlement currency.
    pub decimals: u32,
}

impl HandlerConfig {
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.confirmation_blocks == 0 {
            return Err(SettlementError::Config(
                "confirmation_blocks must be positive".to_string(),
            ));
        }
        if self.process_yield && self.process_yield_interval == 0 {
            return Err(SettlementError::Config(
                "process_yield_interval must be positive when process_yield is set".to_string(),
            ));
        }
        if self.exchange_address.is_empty() || self.deposit_address.is_empty() {
            return Err(SettlementError::Config(
                "exchange_address and deposit_address are required".to_string(),
            ));
        }
        Ok(())
    }
}

use thiserror::Error;

use crate::chain::ChainError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid claimer key: {0}")]
    ClaimerKey(String),

    #[error("yield claiming is not configured for this contract")]
    ClaimYieldDisabled,
}

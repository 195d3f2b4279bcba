//! Ledger-facing record types.
//!
//! Operation ids follow the ledger's string convention: `d_<id>` for
//! deposits, `s_<id>` for stakes, `w_<id>` for withdrawals (decimal
//! rendering of the contract-assigned uint256) and `y_<hash>` for yield
//! events. Wallets are stored lowercase with a `0x` prefix.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a pending balance operation. Transitions are strictly
/// forward: pending -> completed | canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Pending,
    Processing,
    Completed,
    Canceled,
    Unknown,
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpStatus::Pending => "pending",
            OpStatus::Processing => "processing",
            OpStatus::Completed => "completed",
            OpStatus::Canceled => "canceled",
            OpStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    Trader,
    Vault,
    Insurance,
}

/// A ledger profile resolved by wallet + exchange id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub profile_id: u64,
    pub profile_type: ProfileType,
    pub status: String,
    pub wallet: String,
    pub exchange_id: String,
    pub created_at: i64,
}

/// The slice of the profile cache the settlement core reads: the vault's
/// current net asset value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCache {
    pub profile_id: u64,
    pub account_equity: Decimal,
}

/// A pending deposit, stake or withdrawal as stored by the ledger.
/// Timestamps are microseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceOp {
    pub ops_id: String,
    pub status: OpStatus,
    pub tx_hash: String,
    pub wallet: String,
    pub amount: Decimal,
    pub timestamp_us: i64,
    pub exchange_id: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    pub wallet: String,
    pub amount: Decimal,
    pub tx: String,
    pub exchange_id: String,
    pub chain_id: u64,
    pub exchange_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stake {
    pub id: String,
    pub vault_profile_id: u64,
    pub vault_wallet: String,
    pub amount: Decimal,
    pub current_nav: Decimal,
    pub tx: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Yield {
    pub id: String,
    pub amount: Decimal,
    pub tx: String,
    pub exchange_id: String,
    pub chain_id: u64,
    pub exchange_address: String,
}

/// One completed withdrawal, submitted to the ledger in a single batch
/// per processed block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalTxInfo {
    pub id: String,
    pub tx_hash: String,
}

/// Static binding of an on-chain contract to an internal exchange id,
/// registered once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMap {
    pub contract_address: String,
    pub chain_id: u64,
    pub exchange_id: String,
}

/// Normalize a wallet string to the ledger's canonical form: lowercase,
/// `0x`-prefixed.
pub fn normalize_wallet(wallet: &str) -> String {
    let wallet = wallet.to_lowercase();
    if wallet.starts_with("0x") {
        wallet
    } else {
        format!("0x{wallet}")
    }
}

/// Canonical wallet string for an EVM address.
pub fn wallet_from_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

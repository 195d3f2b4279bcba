//! Token Unit Conversion Module
//!
//! Unified conversion between raw on-chain token units (`U256`, scaled by
//! the token's configured decimals) and the ledger-facing
//! `rust_decimal::Decimal` representation. All amount conversions MUST go
//! through this module.
//!
//! ## Design Principles
//! 1. Explicit Error Handling: no silent truncation or overflow
//! 2. The token decimals come from per-contract configuration, never from
//!    hard-coded constants (18 is only the canonical risk-comparison scale)
//!
//! ## Usage
//! ```ignore
//! // A Deposit event carries 1.5 USDT as 1_500_000 raw units (6 decimals)
//! let amount = token_units_to_decimal(U256::from(1_500_000u64), 6)?;
//! assert_eq!(amount.to_string(), "1.500000");
//! ```

use alloy::primitives::U256;
use rust_decimal::Decimal;
use thiserror::Error;

/// Scale used for cross-token risk comparisons (withdrawal ceiling).
pub const CANONICAL_DECIMALS: u32 = 18;

/// Amount conversion errors
#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("amount {0} does not fit the decimal range")]
    Overflow(String),

    #[error("amount must not be negative: {0}")]
    Negative(Decimal),

    #[error("unsupported decimals: {0}")]
    UnsupportedDecimals(u32),
}

/// Convert a raw on-chain amount into a ledger decimal.
///
/// `raw` is the unsigned integer emitted by the contract, scaled by
/// `10^decimals`.
pub fn token_units_to_decimal(raw: U256, decimals: u32) -> Result<Decimal, MoneyError> {
    if decimals > 28 {
        return Err(MoneyError::UnsupportedDecimals(decimals));
    }
    let units: i128 = raw
        .try_into()
        .map_err(|_| MoneyError::Overflow(raw.to_string()))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map_err(|_| MoneyError::Overflow(raw.to_string()))
}

/// Convert a ledger decimal back into raw token units at the given scale,
/// rounding to the nearest unit.
pub fn decimal_to_token_units(amount: Decimal, decimals: u32) -> Result<U256, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative(amount));
    }
    if decimals > 28 {
        return Err(MoneyError::UnsupportedDecimals(decimals));
    }
    let multiplier = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let scaled = amount
        .checked_mul(multiplier)
        .ok_or_else(|| MoneyError::Overflow(amount.to_string()))?
        .round();
    let units: i128 = scaled
        .try_into()
        .map_err(|_| MoneyError::Overflow(amount.to_string()))?;
    Ok(U256::from(units as u128))
}

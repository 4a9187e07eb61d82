//! Decimal money helpers. Amounts are stored as canonical strings with two
//! fractional digits and parsed back into `Decimal` for arithmetic.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::ServiceError;

const MONEY_SCALE: u32 = 2;

/// Largest amount accepted for a single price or total: 100 crore rupees.
pub fn max_amount() -> Decimal {
    Decimal::new(100_000_000_000, MONEY_SCALE)
}

/// Why an amount cannot be stored as money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("must not be negative")]
    Negative,
    #[error("has more than 2 decimal places")]
    TooPrecise,
    #[error("exceeds the 1000000000.00 limit")]
    TooLarge,
}

/// The money rules shared by prices, totals, refunds and order lines.
pub fn check_amount(amount: Decimal) -> Result<Decimal, AmountError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AmountError::Negative);
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(AmountError::TooPrecise);
    }
    if amount > max_amount() {
        return Err(AmountError::TooLarge);
    }
    Ok(amount)
}

/// Parses a client-supplied amount and applies [`check_amount`].
pub fn parse_amount(field: &str, raw: &str) -> Result<Decimal, ServiceError> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| ServiceError::ValidationError(format!("{field} must be a decimal number")))?;
    check_amount(amount).map_err(|err| ServiceError::ValidationError(format!("{field} {err}")))
}

/// Canonical stored form, e.g. `1499.50`.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(MONEY_SCALE);
    rounded.rescale(MONEY_SCALE);
    rounded.to_string()
}

/// Reads an amount that was written by this crate.
pub fn stored_amount(raw: &str) -> Result<Decimal, ServiceError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ServiceError::InternalError(format!("stored amount {raw:?} is corrupt: {e}")))
}

//! Fixed-point money handling.
//!
//! Every balance and amount in the ledger is a `Decimal` with exactly two
//! fractional digits. Values entering the system are quantized with half-up
//! rounding (midpoint away from zero) before they touch any balance.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Number of fractional digits carried by every amount.
pub const SCALE: u32 = 2;

/// Largest representable amount (16 integer digits, 2 fractional).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_808_348_671, 232_830_643, 0, false, 2);

/// Quantize a decimal to two places using half-up rounding.
///
/// The result always carries scale 2, so `100` becomes `100.00`.
#[must_use]
pub fn quantize(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// Quantize a credit figure and check it lies in `0..=MAX_AMOUNT`.
///
/// # Errors
///
/// Returns `LedgerError::InvalidAmount` naming `field` when out of range.
pub fn bounded_credit(field: &str, value: Decimal) -> Result<Decimal, LedgerError> {
    let value = quantize(value);
    if value < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "{field} must not be negative, got {value}"
        )));
    }
    if value > MAX_AMOUNT {
        return Err(LedgerError::InvalidAmount(format!(
            "{field} exceeds maximum of {MAX_AMOUNT}"
        )));
    }
    Ok(value)
}

/// A strictly positive, two-place monetary amount.
///
/// Withdrawal amounts, ledger entry amounts and top-ups are all `Amount`s.
/// Balances may legitimately be zero and are plain quantized `Decimal`s.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Quantize `value` and validate that it is positive and in range.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` if the quantized value is not
    /// greater than zero or exceeds [`MAX_AMOUNT`].
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        let value = quantize(value);
        if value <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {value}"
            )));
        }
        if value > MAX_AMOUNT {
            return Err(LedgerError::InvalidAmount(format!(
                "amount exceeds maximum of {MAX_AMOUNT}"
            )));
        }
        Ok(Self(value))
    }

    /// The amount as a decimal with scale 2.
    #[must_use]
    pub const fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_pads_scale() {
        assert_eq!(quantize(dec!(100)).to_string(), "100.00");
        assert_eq!(quantize(dec!(1.5)).to_string(), "1.50");
    }

    #[test]
    fn quantize_rounds_half_up() {
        assert_eq!(quantize(dec!(1.005)), dec!(1.01));
        assert_eq!(quantize(dec!(1.004)), dec!(1.00));
        assert_eq!(quantize(dec!(2.675)), dec!(2.68));
    }

    #[test]
    fn amount_rejects_zero_and_negative() {
        assert!(Amount::new(dec!(0)).is_err());
        assert!(Amount::new(dec!(-1.00)).is_err());
        // Rounds to zero.
        assert!(Amount::new(dec!(0.004)).is_err());
    }

    #[test]
    fn amount_rejects_out_of_range() {
        assert!(Amount::new(MAX_AMOUNT).is_ok());
        assert!(Amount::new(MAX_AMOUNT + dec!(0.01)).is_err());
    }

    #[test]
    fn credit_figures_are_bounded() {
        assert_eq!(bounded_credit("credit_limit", dec!(0)).unwrap(), dec!(0.00));
        assert_eq!(bounded_credit("credit_limit", MAX_AMOUNT).unwrap(), MAX_AMOUNT);
        assert!(bounded_credit("credit_limit", dec!(-0.01)).is_err());
        assert!(bounded_credit("credit_limit", MAX_AMOUNT + dec!(1)).is_err());
    }

    #[test]
    fn max_amount_has_sixteen_integer_digits() {
        assert_eq!(MAX_AMOUNT.to_string(), "9999999999999999.99");
    }

    #[test]
    fn amount_serializes_as_string() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"100.00\"");
    }

    #[test]
    fn amount_deserializes_from_string_and_number() {
        let from_str: Amount = serde_json::from_str("\"12.345\"").unwrap();
        assert_eq!(from_str.value(), dec!(12.35));

        let from_num: Amount = serde_json::from_str("7").unwrap();
        assert_eq!(from_num.to_string(), "7.00");

        assert!(serde_json::from_str::<Amount>("\"-3\"").is_err());
    }
}

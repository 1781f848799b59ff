//! The shared credit pool, merchants and their credit limits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ids::{AccountId, MerchantId};
use crate::money::{bounded_credit, quantize, Amount};

/// The singleton reservoir of credit shared by every merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPool {
    /// Credit left in the pool. Never negative.
    pub available_amount: Decimal,
    /// Last time the balance changed.
    pub updated_at: DateTime<Utc>,
}

impl CreditPool {
    /// An empty pool.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            available_amount: quantize(Decimal::ZERO),
            updated_at: Utc::now(),
        }
    }

    /// Add `amount` to the pool.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` if the balance would exceed
    /// [`MAX_AMOUNT`](crate::MAX_AMOUNT).
    pub fn top_up(&mut self, amount: Amount) -> Result<()> {
        let next = self
            .available_amount
            .checked_add(amount.value())
            .ok_or_else(|| LedgerError::InvalidAmount("pool balance overflow".to_string()))?;
        self.available_amount = bounded_credit("pool balance", next)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the pool satisfies its storage invariant.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.available_amount >= Decimal::ZERO
    }
}

impl Default for CreditPool {
    fn default() -> Self {
        Self::empty()
    }
}

/// A merchant's ceiling on pool credit and how much of it is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantCredit {
    /// The owning merchant.
    pub merchant_id: MerchantId,
    /// Maximum credit the merchant may utilize.
    pub credit_limit: Decimal,
    /// Credit already consumed.
    pub utilized_amount: Decimal,
    /// Last time either figure changed.
    pub updated_at: DateTime<Utc>,
}

impl MerchantCredit {
    /// A zero-limit credit row for a freshly registered merchant.
    #[must_use]
    pub fn new(merchant_id: MerchantId) -> Self {
        Self {
            merchant_id,
            credit_limit: quantize(Decimal::ZERO),
            utilized_amount: quantize(Decimal::ZERO),
            updated_at: Utc::now(),
        }
    }

    /// `credit_limit - utilized_amount`.
    #[must_use]
    pub fn available(&self) -> Decimal {
        quantize(self.credit_limit - self.utilized_amount)
    }

    /// Set a new credit limit.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` for a limit outside
    /// `0..=MAX_AMOUNT` and `LedgerError::CreditLimitBelowUtilization` if
    /// the merchant already uses more than `limit`.
    pub fn set_limit(&mut self, limit: Decimal) -> Result<()> {
        let limit = bounded_credit("credit_limit", limit)?;
        if limit < self.utilized_amount {
            return Err(LedgerError::CreditLimitBelowUtilization {
                limit,
                utilized: self.utilized_amount,
            });
        }
        self.credit_limit = limit;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether `0 <= utilized_amount <= credit_limit`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.utilized_amount >= Decimal::ZERO && self.utilized_amount <= self.credit_limit
    }
}

/// A merchant that draws on the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merchant {
    /// Unique merchant identifier.
    pub id: MerchantId,
    /// Display/login name, unique across merchants.
    pub username: String,
    /// Whether an operator approved the merchant.
    pub is_approved: bool,
    /// Credit asked for at registration.
    pub requested_credit: Decimal,
    /// Opaque bank account forwarded to settlement. May be empty.
    pub bank_account: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl Merchant {
    /// Create an unapproved merchant.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        requested_credit: Decimal,
        bank_account: impl Into<String>,
    ) -> Self {
        Self {
            id: MerchantId::generate(),
            username: username.into(),
            is_approved: false,
            requested_credit: quantize(requested_credit),
            bank_account: bank_account.into(),
            created_at: Utc::now(),
        }
    }

    /// Fail unless the merchant is approved.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::MerchantNotApproved`.
    pub fn ensure_approved(&self) -> Result<()> {
        if self.is_approved {
            Ok(())
        } else {
            Err(LedgerError::MerchantNotApproved {
                merchant_id: self.id.to_string(),
            })
        }
    }
}

/// The wallet account a merchant withdraws from. One per merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    /// Account identifier.
    pub id: AccountId,
    /// Owning merchant.
    pub merchant_id: MerchantId,
}

impl WalletAccount {
    /// Open a wallet account for `merchant_id`.
    #[must_use]
    pub fn open(merchant_id: MerchantId) -> Self {
        Self {
            id: AccountId::generate(),
            merchant_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_merchant_starts_unapproved_with_zero_credit() {
        let merchant = Merchant::new("acme", dec!(500), "");
        assert!(!merchant.is_approved);
        assert!(matches!(
            merchant.ensure_approved(),
            Err(LedgerError::MerchantNotApproved { .. })
        ));

        let credit = MerchantCredit::new(merchant.id);
        assert_eq!(credit.available(), dec!(0.00));
    }

    #[test]
    fn available_is_limit_minus_utilized() {
        let mut credit = MerchantCredit::new(MerchantId::generate());
        credit.set_limit(dec!(10)).unwrap();
        credit.utilized_amount = dec!(3.25);
        assert_eq!(credit.available(), dec!(6.75));
        assert!(credit.is_consistent());
    }

    #[test]
    fn limit_cannot_drop_below_utilization() {
        let mut credit = MerchantCredit::new(MerchantId::generate());
        credit.set_limit(dec!(10)).unwrap();
        credit.utilized_amount = dec!(8.00);

        let err = credit.set_limit(dec!(5)).unwrap_err();
        assert!(matches!(err, LedgerError::CreditLimitBelowUtilization { .. }));
        assert_eq!(credit.credit_limit, dec!(10.00));

        assert!(credit.set_limit(dec!(-1)).is_err());
        assert!(credit.set_limit(crate::MAX_AMOUNT + dec!(1)).is_err());
    }

    #[test]
    fn top_up_adds_to_pool() {
        let mut pool = CreditPool::empty();
        pool.top_up(Amount::new(dec!(100.005)).unwrap()).unwrap();
        assert_eq!(pool.available_amount.to_string(), "100.01");
        assert!(pool.is_consistent());

        let mut full = CreditPool::empty();
        full.top_up(Amount::new(crate::MAX_AMOUNT).unwrap()).unwrap();
        assert!(full.top_up(Amount::new(dec!(1)).unwrap()).is_err());
        assert_eq!(full.available_amount, crate::MAX_AMOUNT);
    }
}

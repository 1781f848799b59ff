//! The consumption protocol.
//!
//! Storage backends lock the pool, then the merchant's credit row, re-read
//! both and hand them to [`Consumption::plan`]. The plan either fails without
//! touching anything or describes the new balances and the ledger pair the
//! backend must write in the same unit of work.

use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};
use crate::ids::{AccountId, TxId};
use crate::ledger::LedgerEntry;
use crate::money::{quantize, Amount};
use crate::pool::{CreditPool, MerchantCredit};

/// The effects of one successful consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    /// Transaction id shared by the ledger pair.
    pub tx_id: TxId,
    /// Pool balance after the debit.
    pub pool_available: Decimal,
    /// Merchant utilization after the credit.
    pub merchant_utilized: Decimal,
    /// The debit/credit pair to insert.
    pub entries: [LedgerEntry; 2],
}

impl Consumption {
    /// Check balances and compute the effects of consuming `amount`.
    ///
    /// The merchant's credit is checked before the pool.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientMerchantCredit` or
    /// `LedgerError::InsufficientPool`.
    pub fn plan(
        pool: &CreditPool,
        credit: &MerchantCredit,
        account_id: AccountId,
        amount: Amount,
    ) -> Result<Self> {
        let required = amount.value();

        let available = credit.available();
        if available < required {
            return Err(LedgerError::InsufficientMerchantCredit {
                available,
                required,
            });
        }
        if pool.available_amount < required {
            return Err(LedgerError::InsufficientPool {
                available: pool.available_amount,
                required,
            });
        }

        let tx_id = TxId::generate();
        Ok(Self {
            tx_id,
            pool_available: quantize(pool.available_amount - required),
            merchant_utilized: quantize(credit.utilized_amount + required),
            entries: LedgerEntry::pair(tx_id, credit.merchant_id, account_id, amount),
        })
    }

    /// Write the new balances into the locked rows.
    pub fn apply(&self, pool: &mut CreditPool, credit: &mut MerchantCredit) {
        let now = chrono::Utc::now();
        pool.available_amount = self.pool_available;
        pool.updated_at = now;
        credit.utilized_amount = self.merchant_utilized;
        credit.updated_at = now;
    }
}

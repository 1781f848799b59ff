//! Immutable double-entry ledger rows.
//!
//! Every successful consumption writes exactly one pair: a `DEBIT` against
//! the credit pool and a `CREDIT` against the merchant's credit, sharing a
//! `tx_id` and an amount. Entries are never updated or deleted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, EntryId, MerchantId, TxId};
use crate::money::Amount;

/// Which way an entry moves credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Credit leaves the source.
    Debit,
    /// Credit is attributed to the source.
    Credit,
}

impl Direction {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(Self::Debit),
            "CREDIT" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// The balance an entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSource {
    /// The shared pool.
    CreditPool,
    /// A merchant's credit row.
    MerchantCredit,
}

impl LedgerSource {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreditPool => "CREDIT_POOL",
            Self::MerchantCredit => "MERCHANT_CREDIT",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREDIT_POOL" => Some(Self::CreditPool),
            "MERCHANT_CREDIT" => Some(Self::MerchantCredit),
            _ => None,
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Row identifier.
    pub id: EntryId,
    /// Transaction shared with the other half of the pair.
    pub tx_id: TxId,
    /// Merchant the consumption was made for.
    pub merchant_id: MerchantId,
    /// Wallet account the withdrawal came from.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: Direction,
    /// Which balance moved.
    pub source: LedgerSource,
    /// Amount moved.
    pub amount: Amount,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build the debit/credit pair for one consumption.
    #[must_use]
    pub fn pair(
        tx_id: TxId,
        merchant_id: MerchantId,
        account_id: AccountId,
        amount: Amount,
    ) -> [Self; 2] {
        let now = Utc::now();
        let entry = |direction, source| Self {
            id: EntryId::generate(),
            tx_id,
            merchant_id,
            account_id,
            direction,
            source,
            amount,
            created_at: now,
        };
        [
            entry(Direction::Debit, LedgerSource::CreditPool),
            entry(Direction::Credit, LedgerSource::MerchantCredit),
        ]
    }
}

/// Check that `entries` consist solely of well-formed pairs.
///
/// Each `tx_id` must have exactly one pool debit and one merchant credit of
/// equal amount.
#[must_use]
pub fn entries_are_paired(entries: &[LedgerEntry]) -> bool {
    let mut by_tx: HashMap<TxId, Vec<&LedgerEntry>> = HashMap::new();
    for entry in entries {
        by_tx.entry(entry.tx_id).or_default().push(entry);
    }
    by_tx.values().all(|rows| match rows.as_slice() {
        [a, b] => {
            let (debit, credit) = if a.direction == Direction::Debit {
                (a, b)
            } else {
                (b, a)
            };
            debit.direction == Direction::Debit
                && debit.source == LedgerSource::CreditPool
                && credit.direction == Direction::Credit
                && credit.source == LedgerSource::MerchantCredit
                && debit.amount == credit.amount
                && debit.merchant_id == credit.merchant_id
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[test]
    fn pair_shares_tx_and_amount() {
        let tx = TxId::generate();
        let [debit, credit] = LedgerEntry::pair(
            tx,
            MerchantId::generate(),
            AccountId::generate(),
            amount(dec!(12.50)),
        );
        assert_eq!(debit.tx_id, tx);
        assert_eq!(credit.tx_id, tx);
        assert_eq!(debit.direction, Direction::Debit);
        assert_eq!(debit.source, LedgerSource::CreditPool);
        assert_eq!(credit.direction, Direction::Credit);
        assert_eq!(credit.source, LedgerSource::MerchantCredit);
        assert_ne!(debit.id, credit.id);
        assert!(entries_are_paired(&[debit, credit]));
    }

    #[test]
    fn unpaired_entries_are_detected() {
        let merchant = MerchantId::generate();
        let account = AccountId::generate();
        let [debit, _] = LedgerEntry::pair(TxId::generate(), merchant, account, amount(dec!(1)));
        assert!(!entries_are_paired(&[debit.clone()]));

        let [_, mut credit] = LedgerEntry::pair(debit.tx_id, merchant, account, amount(dec!(1)));
        credit.amount = amount(dec!(2));
        assert!(!entries_are_paired(&[debit, credit]));
    }

    #[test]
    fn direction_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Direction::Debit).unwrap(), "\"DEBIT\"");
        assert_eq!(
            serde_json::to_string(&LedgerSource::MerchantCredit).unwrap(),
            "\"MERCHANT_CREDIT\""
        );
        assert_eq!(LedgerSource::parse("CREDIT_POOL"), Some(LedgerSource::CreditPool));
    }
}

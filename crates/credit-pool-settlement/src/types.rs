//! Settlement request and response types.

use credit_pool_core::{AccountId, Amount, MerchantId};
use serde::{Deserialize, Serialize};

/// Success marker in the settlement response.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Body of a settlement call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// Merchant being paid out.
    pub merchant_id: MerchantId,
    /// The merchant's wallet account.
    pub account_id: AccountId,
    /// Amount to settle, sent as a two-place decimal string.
    pub amount: Amount,
    /// Destination bank account. May be empty.
    pub bank_account: String,
}

/// Raw settlement response.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementResponse {
    /// `SUCCESS` when the money moved.
    #[serde(default)]
    pub status: Option<String>,
    /// Bank reference for the transfer.
    #[serde(default)]
    pub bank_reference: Option<String>,
}

/// A confirmed settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Reference assigned by the bank.
    pub bank_reference: String,
}

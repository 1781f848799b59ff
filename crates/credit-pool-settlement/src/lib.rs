//! Client for the external bank settlement service.
//!
//! The settlement service moves money to a merchant's bank account. It is
//! called once per attempt with a bearer token and answers
//! `{"status": "SUCCESS", "bank_reference": "..."}` on success.
//!
//! Outcomes are classified for the saga that drives retries:
//!
//! - transport errors and 5xx responses are retryable
//! - any other non-200 response, or a 200 without `SUCCESS`, is a rejection
//!
//! # Example
//!
//! ```no_run
//! use credit_pool_settlement::{HttpSettlementClient, SettlementGateway, SettlementRequest};
//! # use credit_pool_core::{AccountId, Amount, MerchantId};
//!
//! # async fn example(amount: Amount) -> Result<(), credit_pool_settlement::SettlementError> {
//! let client = HttpSettlementClient::new(
//!     "http://settlement:9000/api/settlement/withdraw",
//!     "internal-token",
//! )?;
//!
//! let receipt = client
//!     .settle(&SettlementRequest {
//!         merchant_id: MerchantId::generate(),
//!         account_id: AccountId::generate(),
//!         amount,
//!         bank_account: "NL91ABNA0417164300".to_string(),
//!     })
//!     .await?;
//!
//! println!("settled as {}", receipt.bank_reference);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{classify, classify_unread, HttpSettlementClient, SettlementGateway, SettlementOptions};
pub use error::SettlementError;
pub use types::*;

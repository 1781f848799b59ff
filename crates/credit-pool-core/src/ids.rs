//! Identifier types for the credit pool.
//!
//! This module provides strongly-typed identifiers for merchants, wallet accounts,
//! withdrawals, ledger transactions and the records around them.
//!
//! # Macro-based ID Types
//!
//! The `uuid_id_type!` macro reduces boilerplate for UUID-based identifier types,
//! ensuring consistent implementation of serialization, parsing, and display traits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to define a UUID-based identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `uuid::Uuid` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - `Serialize`, `Deserialize` (as string)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
///
/// # Example
///
/// ```ignore
/// uuid_id_type!(MyId, "A custom identifier type.");
/// let id = MyId::generate();
/// let parsed: MyId = id.to_string().parse().unwrap();
/// ```
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_id_type!(MerchantId, "A merchant identifier.\n\nMerchant IDs are the `sub` claim of merchant access tokens.");
uuid_id_type!(AccountId, "A wallet account identifier.\n\nEach merchant owns exactly one wallet account.");
uuid_id_type!(WithdrawalId, "A withdrawal request identifier.");
uuid_id_type!(TxId, "A ledger transaction identifier.\n\nShared by the two entries of a ledger pair.");
uuid_id_type!(EntryId, "A single ledger entry identifier.");
uuid_id_type!(AuditId, "An audit log entry identifier.");
uuid_id_type!(ReconciliationId, "A reconciliation record identifier.");

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_id_roundtrip() {
        let id = MerchantId::generate();
        let parsed = MerchantId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn tx_id_serializes_as_plain_string() {
        let id = TxId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            "not-a-uuid".parse::<WithdrawalId>(),
            Err(IdError::InvalidUuid)
        );
    }

    #[test]
    fn debug_names_the_type() {
        let id = AccountId::generate();
        assert!(format!("{id:?}").starts_with("AccountId("));
    }
}

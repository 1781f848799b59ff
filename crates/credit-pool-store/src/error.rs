//! Error types for credit pool storage.

use credit_pool_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// A unique key was inserted twice.
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// The key that already exists.
        key: String,
    },

    /// A write would break a balance invariant.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => Self::DuplicateKey {
                    key: db.constraint().unwrap_or("unknown").to_string(),
                },
                Some("23514") => Self::ConstraintViolation(db.message().to_string()),
                _ => Self::Database(err.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}

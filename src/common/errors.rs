//! Error types for the reward ledger

use thiserror::Error;

/// Result type alias using our LedgerError
pub type Result<T> = std::result::Result<T, LedgerError>;

/// SQLSTATE reported by Postgres for a unique constraint violation
pub const UNIQUE_VIOLATION: &str = "23505";

/// Main error type for ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed input; never reaches the ledger engine
    #[error("Validation error: {0}")]
    Validation(String),

    /// A storage-level uniqueness constraint rejected the write
    #[error("Duplicate request for key: {key}")]
    DuplicateRequest { key: String },

    /// Another request holding the same idempotency key is still processing
    #[error("Request already in flight for key: {key}")]
    InFlight { key: String },

    /// No price could be produced for a symbol
    #[error("Price unavailable for {symbol}: {reason}")]
    PriceUnavailable { symbol: String, reason: String },

    /// Any storage or transaction failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// True for errors that must not leak details to API callers
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            LedgerError::Persistence(_)
                | LedgerError::Serialization(_)
                | LedgerError::Configuration(_)
                | LedgerError::Internal(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return LedgerError::DuplicateRequest {
                    key: db_err.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        LedgerError::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        LedgerError::Persistence(format!("migration failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_classification() {
        assert!(LedgerError::Persistence("boom".into()).is_server_error());
        assert!(!LedgerError::Validation("bad".into()).is_server_error());
        assert!(!LedgerError::InFlight { key: "k1".into() }.is_server_error());
    }

    #[test]
    fn test_non_database_sqlx_error_is_persistence() {
        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, LedgerError::Persistence(_)));
    }
}

use crate::database::DatabaseError;
use rust_decimal::Decimal;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settlement pipeline errors
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors (audit log, listener binding)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Settlement(e) => e.status_code(),
            _ => 500,
        }
    }
}

/// Repository-specific error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database query error
    #[error("Query error: {0}")]
    Query(SqlxError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Duplicate record (unique constraint)
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Optimistic version check failed; the row changed since it was read
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Row could not be mapped onto a model
    #[error("Corrupt row: {0}")]
    Decode(String),
}

impl From<SqlxError> for RepositoryError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            SqlxError::Database(db_err) => {
                // Check for common PostgreSQL error codes
                let code = db_err.code().map(|c| c.to_string());
                if code.as_deref() == Some("23505") {
                    // Unique violation
                    RepositoryError::Duplicate(db_err.message().to_string())
                } else if code.as_deref() == Some("23503") {
                    // Foreign key violation
                    RepositoryError::ConstraintViolation(db_err.message().to_string())
                } else if code.as_deref() == Some("23514") {
                    // Check constraint violation
                    RepositoryError::ConstraintViolation(db_err.message().to_string())
                } else {
                    RepositoryError::Query(err)
                }
            }
            SqlxError::ColumnDecode { .. } | SqlxError::Decode(_) => {
                RepositoryError::Decode(err.to_string())
            }
            _ => RepositoryError::Query(err),
        }
    }
}

/// Outcomes of the settlement pipeline that are not a plain success.
///
/// `DuplicateTransaction` and `WageringIncomplete` are routine and carry the
/// data the caller needs to reconcile; the rest abort the event with no
/// partial mutation.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Transaction {key} already recorded")]
    DuplicateTransaction { key: String, balance_after: Decimal },

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds {
        balance: Decimal,
        required: Decimal,
        deficit: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Concurrent modification: gave up after {attempts} attempts")]
    ConcurrentModification { attempts: u32 },

    #[error("Wagering incomplete: {remaining} of {required} still to wager")]
    WageringIncomplete {
        required: Decimal,
        wagered: Decimal,
        remaining: Decimal,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bonus grant not found: {0}")]
    GrantNotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type SettlementResult<T> = Result<T, SettlementError>;

impl SettlementError {
    /// HTTP-equivalent status for the failure envelope
    pub fn status_code(&self) -> u16 {
        match self {
            SettlementError::Validation(_)
            | SettlementError::InsufficientFunds { .. }
            | SettlementError::WageringIncomplete { .. } => 400,
            SettlementError::AccountNotFound(_) | SettlementError::GrantNotFound(_) => 404,
            SettlementError::DuplicateTransaction { .. }
            | SettlementError::ConcurrentModification { .. } => 409,
            SettlementError::Repository(RepositoryError::NotFound(_)) => 404,
            SettlementError::Repository(_) => 500,
        }
    }

    /// Short machine-readable code
    pub fn kind(&self) -> &'static str {
        match self {
            SettlementError::DuplicateTransaction { .. } => "duplicate_transaction",
            SettlementError::InsufficientFunds { .. } => "insufficient_funds",
            SettlementError::AccountNotFound(_) => "account_not_found",
            SettlementError::ConcurrentModification { .. } => "concurrent_modification",
            SettlementError::WageringIncomplete { .. } => "wagering_incomplete",
            SettlementError::Validation(_) => "validation_error",
            SettlementError::GrantNotFound(_) => "grant_not_found",
            SettlementError::Repository(_) => "internal_error",
        }
    }

    /// Diagnostic fields merged into the failure envelope
    pub fn details(&self) -> serde_json::Value {
        match self {
            SettlementError::DuplicateTransaction { key, balance_after } => serde_json::json!({
                "transaction_id": key,
                "balance": balance_after,
            }),
            SettlementError::InsufficientFunds {
                balance,
                required,
                deficit,
            } => serde_json::json!({
                "balance": balance,
                "required": required,
                "deficit": deficit,
            }),
            SettlementError::ConcurrentModification { attempts } => serde_json::json!({
                "attempts": attempts,
                "retryable": true,
            }),
            SettlementError::WageringIncomplete {
                required,
                wagered,
                remaining,
            } => serde_json::json!({
                "required": required,
                "wagered": wagered,
                "remaining": remaining,
            }),
            _ => serde_json::json!({}),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SettlementError::DuplicateTransaction { .. })
    }
}

/// Convenience function to convert Option<T> to a missing-account error
pub fn account_or_not_found<T>(opt: Option<T>, reference: &str) -> SettlementResult<T> {
    opt.ok_or_else(|| SettlementError::AccountNotFound(reference.to_string()))
}

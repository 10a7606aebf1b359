//! # Database Error Types
//!
//! Error types for database operations and sale orchestration.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError ← Adds context and categorization                             │
//! │       │                                                                 │
//! │       ├──────────────── CoreError (stock, missing customer, input) ────┤
//! │       ▼                                                                 │
//! │  ServiceError ← What the orchestrator / ledger return                  │
//! │       │                                                                 │
//! │       ├──► ApiError (HTTP status + {message, errors[]})               │
//! │       └──► DeliveryOutcome (ack / requeue / dead letter)              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use sgemp_core::{CoreError, ValidationError};
use thiserror::Error;

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging and user feedback.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Second sale with the same `pdv_sale_id`
    /// - Duplicate payment method description or product EAN
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Referencing non-existent product_id, customer_id or sale_id
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed (BEGIN / COMMIT / ROLLBACK).
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true for a unique violation on the given `table.column`.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field == column)
    }

    /// Returns true when retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::PoolExhausted | DbError::ConnectionFailed(_) | DbError::TransactionFailed(_) => {
                true
            }
            // SQLITE_BUSY / SQLITE_LOCKED after busy_timeout expired
            DbError::QueryFailed(msg) => msg.contains("database is locked") || msg.contains("busy"),
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Service Error
// =============================================================================

/// Outcome of a failed ledger or orchestration call.
///
/// ## Categories
/// ```text
/// is_client_error()  Core(Validation | InsufficientStock | *NotFound)
///                    DuplicateSale
///                    → the same input will fail again
///
/// is_retryable()     Timeout, transient Db errors
///                    → requeue and try again
/// ```
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Business rule or input failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// A concurrent writer committed the same `pdv_sale_id` first.
    #[error("Sale with pdvSaleId {0} already exists")]
    DuplicateSale(i64),

    /// The orchestration did not finish before its deadline; rolled back.
    #[error("Sale processing timed out after {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    /// Returns true when the caller sent something that cannot succeed as is.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::Core(_) | ServiceError::DuplicateSale(_))
    }

    /// Returns true when the same request may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout(_) => true,
            ServiceError::Db(e) => e.is_transient(),
            // Stock may be replenished before the next delivery
            ServiceError::Core(CoreError::InsufficientStock { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if the error refers to a row that does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ServiceError::Core(e) => e.is_not_found(),
            ServiceError::Db(DbError::NotFound { .. }) => true,
            _ => false,
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Core(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Db(err.into())
    }
}

/// Result type for ledger and orchestration calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

// =============================================================================
// Unit Tests
// =============================================================================

//! # Error Types
//!
//! Domain-specific error types for sgemp-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  sgemp-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule failures (stock, missing rows)   │
//! │  └── ValidationError  - Malformed or unresolvable input                │
//! │                                                                         │
//! │  sgemp-db errors                                                       │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── ServiceError     - Orchestration outcome (Core | Db | Timeout)    │
//! │                                                                         │
//! │  sgemp-sync errors                                                     │
//! │  └── SyncError        - Broker, config and decode failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → ServiceError → HTTP / queue ack   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised while ingesting a sale.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Not enough stock in the ledger to cover the requested exit.
    ///
    /// ## When This Occurs
    /// ```text
    /// Ledger for product 2:  ENTRY 10, EXIT 10   → available 0
    ///      │
    ///      ▼
    /// Sale line: product 2 × 1
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: 2, available: 0, requested: 1 }
    ///      │
    ///      ▼
    /// Whole sale rolled back, nothing written
    /// ```
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: i64,
        available: i64,
        requested: i64,
    },

    /// Customer referenced by the sale does not exist.
    #[error("Customer not found: {0}")]
    CustomerNotFound(i64),

    /// Product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    /// Sale does not exist.
    #[error("Sale not found: {0}")]
    SaleNotFound(i64),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true if the error refers to a row that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::CustomerNotFound(_) | CoreError::ProductNotFound(_) | CoreError::SaleNotFound(_)
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any write happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("{field} is required")]
    Required { field: String },

    /// A list that must contain at least one element is empty.
    #[error("{field} must contain at least one entry")]
    Empty { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not exceed a limit.
    #[error("{field} must be at most {max}")]
    TooLarge { field: String, max: i64 },

    /// Malformed value or payload.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A referenced row (product, payment method) could not be resolved.
    #[error("{field} {id} does not exist")]
    UnknownReference { field: String, id: i64 },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required { field: field.into() }
    }

    pub fn must_be_positive(field: impl Into<String>) -> Self {
        ValidationError::MustBePositive { field: field.into() }
    }

    pub fn unknown(field: impl Into<String>, id: i64) -> Self {
        ValidationError::UnknownReference {
            field: field.into(),
            id,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

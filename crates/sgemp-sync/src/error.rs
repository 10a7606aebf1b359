//! # Sync Error Types
//!
//! Error types for the queue bridge.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Bridge Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Payload             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  SerializationFailed    │ │
//! │  │  InvalidUrl     │  │  Broker         │  │  DeserializationFailed  │ │
//! │  │  ConfigLoad/Save│  │  PublishFailed  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Database     │  │     Lifecycle                               │  │
//! │  │  DatabaseError  │  │  AlreadyConsuming, ShuttingDown, Internal   │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for bridge operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Queue bridge error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid bridge configuration.
    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    /// Invalid broker URL.
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel or connection level failure reported by the broker client.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The broker refused or did not confirm a publish.
    #[error("Publish to '{queue}' failed: {reason}")]
    PublishFailed { queue: String, reason: String },

    // =========================================================================
    // Payload Errors
    // =========================================================================
    /// Failed to serialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// `start()` called on a consumer that is already consuming.
    #[error("Consumer is already running")]
    AlreadyConsuming,

    /// The component is shutting down.
    #[error("Bridge is shutting down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<lapin::Error> for SyncError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::IOError(io) => SyncError::ConnectionFailed(io.to_string()),
            other => SyncError::Broker(other.to_string()),
        }
    }
}

impl From<sgemp_db::DbError> for SyncError {
    fn from(err: sgemp_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried after reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Broker(_)
                | SyncError::PublishFailed { .. }
                | SyncError::DatabaseError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::PublishFailed {
            queue: "finalized_sale".into(),
            reason: "nack".into()
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("prefetch".into()).is_retryable());
        assert!(!SyncError::AlreadyConsuming.is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
        assert!(!SyncError::Broker("channel closed".into()).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::PublishFailed {
            queue: "finalized_sale.dlq".into(),
            reason: "not confirmed".into(),
        };
        assert!(err.to_string().contains("finalized_sale.dlq"));
    }
}

//! # Sgemp API
//!
//! HTTP surface and process wiring for sale ingestion.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Sgemp API Process                             │
//! │                                                                         │
//! │  ┌────────────────┐   ┌──────────────────┐   ┌──────────────────────┐  │
//! │  │  routes        │   │ SaleOrchestrator │   │  Queue side (role)   │  │
//! │  │                │   │                  │   │                      │  │
//! │  │ • POST /sale   │──►│ one transaction  │◄──│ back-office:         │  │
//! │  │ • GET /sale    │   │ per sale         │   │   QueueConsumer      │  │
//! │  │ • GET /stock   │   │                  │──►│ pdv:                 │  │
//! │  │ • POST /stock  │   │                  │   │   OutboxRelay        │  │
//! │  └────────────────┘   └──────────────────┘   └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables:
//! - `HTTP_PORT` / `SERVER_PORT` - HTTP port (default: 3001)
//! - `DATABASE_PATH` - SQLite file (default: ./sgemp.db)
//! - `SGEMP_ROLE` - `back-office` (default) or `pdv`
//! - `SGEMP_BRIDGE_CONFIG` - path to bridge.toml
//! - `SGEMP_QUEUE_ENABLED` - start the queue side (default: true)
//! - `RUST_LOG` - log filter (default: info)

pub mod config;
pub mod error;
pub mod routes;

// Re-exports
pub use config::{ApiConfig, ConfigError};
pub use error::ApiError;
pub use routes::{router, AppState};

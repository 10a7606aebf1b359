//! # sgemp-db: Database Layer for Sgemp
//!
//! SQLite storage, the stock ledger and the sale transaction orchestrator.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sgemp Data Flow                                  │
//! │                                                                         │
//! │  POST /sale  or  finalized_sale delivery                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     sgemp-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────┐   ┌───────────────┐   ┌──────────────┐   │   │
//! │  │   │SaleOrchestrator│──►│ Repositories  │   │  Migrations  │   │   │
//! │  │   │ BEGIN IMMEDIATE│   │ Sale, Product │   │  (embedded)  │   │   │
//! │  │   │ idempotency    │   │ StockLedger   │   │ 001_init.sql │   │   │
//! │  │   │ deadline       │   │ SaleOutbox    │   │ 002_outbox   │   │   │
//! │  │   └────────────────┘   └───────┬───────┘   └──────────────┘   │   │
//! │  │                                │                               │   │
//! │  │   ┌────────────────────────────▼──────────────────────────┐   │   │
//! │  │   │              Database (pool.rs, SqlitePool)           │   │   │
//! │  │   └───────────────────────────────────────────────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL)                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database and service error types
//! - [`repository`] - Repositories and the stock ledger
//! - [`orchestrator`] - The sale transaction
//! - [`seed`] - Default payment methods, customer and starter catalog
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sgemp_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./sgemp.db")).await?;
//!
//! let outcome = db.orchestrator().create_sale(&request).await?;
//! let stock = db.stock().current_stock(1).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod orchestrator;
pub mod pool;
pub mod repository;
pub mod seed;
mod tx;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult, ServiceError, ServiceResult};
pub use orchestrator::{OrchestratorConfig, SaleOrchestrator, SaleRole};
pub use pool::{Database, DbConfig};
pub use seed::{seed_defaults, SeedReport};

// Repository re-exports for convenience
pub use repository::customer::CustomerRepository;
pub use repository::outbox::SaleOutboxRepository;
pub use repository::payment_method::PaymentMethodRepository;
pub use repository::product::ProductRepository;
pub use repository::sale::SaleRepository;
pub use repository::stock::StockLedger;

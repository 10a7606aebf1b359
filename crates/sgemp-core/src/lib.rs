//! # sgemp-core: Pure Domain Logic for Sgemp
//!
//! Everything the sale ingestion workflow decides without touching a
//! database or a broker lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sgemp Sale Ingestion                             │
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌──────────────────────┐              │
//! │  │  POST /sale (axum)   │        │  finalized_sale queue │              │
//! │  └──────────┬───────────┘        └───────────┬──────────┘              │
//! │             │        SaleRequest (JSON)       │                         │
//! │             └───────────────┬─────────────────┘                         │
//! │                             ▼                                           │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ sgemp-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  payload  │  │   money   │  │   plan    │  │ validation│  │   │
//! │  │   │SaleRequest│  │   Money   │  │ SalePlan  │  │   rules   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                             │                                           │
//! │  ┌──────────────────────────▼──────────────────────────────────────┐   │
//! │  │        sgemp-db (Stock Ledger + Sale Orchestrator)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Persisted records (Sale, SaleItem, Payment, StockMovement, ...)
//! - [`money`] - Integer-cent `Money` type
//! - [`payload`] - The finalized-sale message / `POST /sale` body
//! - [`plan`] - Sale aggregate builder (pricing, totals, persistence plan)
//! - [`validation`] - Payload and ledger validation rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use std::collections::{HashMap, HashSet};
//! use sgemp_core::{build_sale_plan, Money, SaleRequest};
//!
//! let request = SaleRequest::from_json(br#"{
//!     "customerId": 1,
//!     "items": [{ "productId": 7, "quantity": 2 }],
//!     "paymentData": [{ "amount": 10.0, "paymentMethodId": 1 }]
//! }"#).unwrap();
//!
//! let prices = HashMap::from([(7, Money::from_cents(500))]);
//! let methods = HashSet::from([1]);
//!
//! let plan = build_sale_plan(&request, &prices, &methods).unwrap();
//! assert_eq!(plan.total.cents(), 1000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod payload;
pub mod plan;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use payload::{PaymentLine, SaleLine, SaleRequest};
pub use plan::{build_sale_plan, PlannedItem, PlannedPayment, PriceCatalog, SalePlan};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default queue carrying finalized sales from the PDV to the back office.
pub const FINALIZED_SALE_QUEUE: &str = "finalized_sale";

/// Maximum number of lines accepted in one sale.
pub const MAX_SALE_LINES: usize = 500;

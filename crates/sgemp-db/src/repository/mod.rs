//! # Repository Module
//!
//! Database repository implementations for Sgemp.
//!
//! ## Two Kinds of Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  db.sales().summary(id)                  &self, uses the pool          │
//! │       │                                  (standalone reads)            │
//! │       ▼                                                                 │
//! │  SaleRepository::summary_in(conn, id)    associated fn, takes          │
//! │                                          &mut SqliteConnection         │
//! │                                                                         │
//! │  The orchestrator only calls the `conn` flavour, so every read and     │
//! │  write of one sale happens inside its single BEGIN IMMEDIATE           │
//! │  transaction.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Catalog prices, product creation
//! - [`CustomerRepository`](customer::CustomerRepository) - Customer existence
//! - [`PaymentMethodRepository`](payment_method::PaymentMethodRepository) - Payment method existence
//! - [`SaleRepository`](sale::SaleRepository) - Sale header, items, payments
//! - [`StockLedger`](stock::StockLedger) - Append-only stock movements
//! - [`SaleOutboxRepository`](outbox::SaleOutboxRepository) - PDV publication queue

pub mod customer;
pub mod outbox;
pub mod payment_method;
pub mod product;
pub mod sale;
pub mod stock;

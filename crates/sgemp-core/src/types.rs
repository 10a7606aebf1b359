//! # Domain Types
//!
//! Records persisted by the sale ingestion workflow.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐ 1   N ┌─────────────────┐ N   1 ┌──────────────┐  │
//! │  │      Sale       │──────►│    SaleItem     │──────►│   Product    │  │
//! │  │  pdv_sale_id    │       │  quantity       │       │  price_cents │  │
//! │  │  total_cents    │       │  unit_price ❄   │       └──────┬───────┘  │
//! │  └───────┬─────────┘       │  value          │              │ 1        │
//! │          │ 1               └─────────────────┘              │          │
//! │          │                                                  │ N        │
//! │          │ N               ┌─────────────────┐       ┌──────┴───────┐  │
//! │          ├────────────────►│    Payment      │       │StockMovement │  │
//! │          │                 │  amount_cents   │       │ ENTRY / EXIT │  │
//! │          │                 └─────────────────┘       │ quantity > 0 │  │
//! │          │ 0..1                                      └──────┬───────┘  │
//! │          └──────────────────────────────────────────────────┘          │
//! │                                                                         │
//! │  ❄ = snapshot copied from the catalog at sale time                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{self, Money};

// =============================================================================
// Catalog
// =============================================================================

/// A catalog product. The sale workflow only reads `id` and `price_cents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub description: String,
    /// Barcode.
    pub ean: Option<String>,
    /// Current catalog price in cents.
    pub price_cents: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

/// Input for creating a product together with its initial stock.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub description: String,
    pub ean: Option<String>,
    pub price: Money,
}

/// A customer a sale can be attributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A payment method (cash, card, pix, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: i64,
    pub description: String,
    pub active: bool,
}

// =============================================================================
// Sale
// =============================================================================

/// Sale header.
///
/// `total_cents` is zero right after the header insert and is written once
/// all items are priced, inside the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: i64,
    pub customer_id: i64,
    pub total_cents: i64,
    /// Sale id issued by the point of sale; idempotency key.
    pub pdv_sale_id: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item of a sale.
/// Uses snapshot pattern to freeze the catalog price at time of sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub id: i64,
    pub sale_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    /// Unit price at time of sale (frozen).
    pub unit_price_cents: i64,
    /// quantity × unit price.
    pub value_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn value(&self) -> Money {
        Money::from_cents(self.value_cents)
    }
}

/// A payment towards a sale. A sale can be split across several methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub sale_id: i64,
    pub payment_method_id: i64,
    pub amount_cents: i64,
    /// Free-text details (card brand, authorization code, ...).
    pub details: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// A committed sale with its items and payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleSummary {
    pub sale_id: i64,
    pub customer_id: i64,
    pub pdv_sale_id: Option<i64>,
    #[serde(with = "money::decimal")]
    pub total: Money,
    pub items: Vec<SaleItem>,
    pub payments: Vec<Payment>,
}

/// Result of a sale ingestion.
#[derive(Debug, Clone)]
pub enum SaleOutcome {
    /// The sale was written by this call.
    Created(SaleSummary),
    /// A sale with the same `pdvSaleId` already exists; nothing was written.
    AlreadyProcessed(SaleSummary),
}

impl SaleOutcome {
    pub fn summary(&self) -> &SaleSummary {
        match self {
            SaleOutcome::Created(summary) | SaleOutcome::AlreadyProcessed(summary) => summary,
        }
    }

    pub fn into_summary(self) -> SaleSummary {
        match self {
            SaleOutcome::Created(summary) | SaleOutcome::AlreadyProcessed(summary) => summary,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SaleOutcome::Created(_))
    }
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Direction of a stock movement. The quantity is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Increases available stock.
    Entry,
    /// Decreases available stock.
    Exit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entry => "ENTRY",
            MovementType::Exit => "EXIT",
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a movement was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementReason {
    /// Exit caused by a sale; requires a sale id.
    Sale,
    /// Entry written in the same transaction that creates the product.
    /// Skips the product existence check.
    InitialStock,
    /// Anything else (restock, inventory adjustment, ...).
    Other(String),
}

impl MovementReason {
    pub const SALE: &'static str = "sale";
    pub const INITIAL_STOCK: &'static str = "initial_stock";

    pub fn as_str(&self) -> &str {
        match self {
            MovementReason::Sale => Self::SALE,
            MovementReason::InitialStock => Self::INITIAL_STOCK,
            MovementReason::Other(reason) => reason,
        }
    }
}

impl From<&str> for MovementReason {
    fn from(reason: &str) -> Self {
        match reason {
            Self::SALE => MovementReason::Sale,
            Self::INITIAL_STOCK => MovementReason::InitialStock,
            other => MovementReason::Other(other.to_string()),
        }
    }
}

/// A persisted ledger entry. Never updated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: i64,
    pub product_id: i64,
    pub quantity: i64,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub sale_id: Option<i64>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Effect of this movement on available stock.
    pub fn signed_quantity(&self) -> i64 {
        match self.movement_type {
            MovementType::Entry => self.quantity,
            MovementType::Exit => -self.quantity,
        }
    }
}

/// A movement about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockMovement {
    pub product_id: i64,
    pub quantity: i64,
    pub movement_type: MovementType,
    pub sale_id: Option<i64>,
    pub reason: MovementReason,
}

impl NewStockMovement {
    /// An entry (restock, adjustment, initial stock).
    pub fn entry(product_id: i64, quantity: i64, reason: MovementReason) -> Self {
        NewStockMovement {
            product_id,
            quantity,
            movement_type: MovementType::Entry,
            sale_id: None,
            reason,
        }
    }

    /// The exit written for one sale line.
    pub fn sale_exit(product_id: i64, quantity: i64, sale_id: i64) -> Self {
        NewStockMovement {
            product_id,
            quantity,
            movement_type: MovementType::Exit,
            sale_id: Some(sale_id),
            reason: MovementReason::Sale,
        }
    }
}

/// Current stock of one product, joined with its catalog data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_id: i64,
    pub description: String,
    pub ean: Option<String>,
    pub price_cents: i64,
    pub stock: i64,
}

/// One page of stock levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockPage {
    pub total: i64,
    pub per_page: i64,
    pub current_page: i64,
    pub last_page: i64,
    pub data: Vec<StockLevel>,
}

// =============================================================================
// Outbox
// =============================================================================

/// A finalized PDV sale waiting to be published to the sale queue.
/// Written in the same transaction as the sale itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct SaleOutboxEntry {
    pub id: i64,
    pub sale_id: i64,
    /// Serialized `SaleRequest` carrying `pdvSaleId`.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_reason_round_trips_through_storage_text() {
        assert_eq!(MovementReason::from("sale"), MovementReason::Sale);
        assert_eq!(MovementReason::from("initial_stock"), MovementReason::InitialStock);
        assert_eq!(
            MovementReason::from("inventory count"),
            MovementReason::Other("inventory count".to_string())
        );
    }

    #[test]
    fn test_signed_quantity() {
        let mut movement = StockMovement {
            id: 1,
            product_id: 1,
            quantity: 5,
            movement_type: MovementType::Exit,
            sale_id: Some(1),
            reason: Some("sale".to_string()),
            created_at: Utc::now(),
        };
        assert_eq!(movement.signed_quantity(), -5);

        movement.movement_type = MovementType::Entry;
        assert_eq!(movement.signed_quantity(), 5);
    }

    #[test]
    fn test_movement_type_json() {
        assert_eq!(serde_json::to_string(&MovementType::Exit).unwrap(), "\"EXIT\"");
        let parsed: MovementType = serde_json::from_str("\"ENTRY\"").unwrap();
        assert_eq!(parsed, MovementType::Entry);
    }

    #[test]
    fn test_sale_exit_constructor() {
        let exit = NewStockMovement::sale_exit(3, 2, 10);
        assert_eq!(exit.movement_type, MovementType::Exit);
        assert_eq!(exit.sale_id, Some(10));
        assert_eq!(exit.reason, MovementReason::Sale);
    }
}

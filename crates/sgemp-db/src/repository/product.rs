//! # Product Repository
//!
//! Catalog reads for pricing, plus product creation with initial stock.
//!
//! ## Batched Price Lookup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Sale lines:  product 1 × 2, product 2 × 1, product 1 × 3              │
//! │       │                                                                 │
//! │       ▼  distinct ids                                                   │
//! │  SELECT id, price_cents FROM products WHERE id IN (1, 2)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PriceCatalog { 1 → 5.00, 2 → 3.00 }   ONE round trip per sale         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbResult, ServiceError, ServiceResult};
use crate::repository::stock::StockLedger;
use crate::tx;
use sgemp_core::{Money, MovementReason, NewProduct, NewStockMovement, PriceCatalog, Product};

const PRODUCT_COLUMNS: &str = "id, description, ean, price_cents, active, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by its barcode.
    pub async fn get_by_ean(&self, ean: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE ean = ?1"
        ))
        .bind(ean)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Counts all products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Checks existence on the caller's connection.
    pub async fn exists_in(conn: &mut SqliteConnection, id: i64) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(found.is_some())
    }

    /// Resolves the current price of every given product in one query.
    ///
    /// Ids missing from the result do not exist; the caller decides what
    /// that means.
    pub async fn find_prices(conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<PriceCatalog> {
        if ids.is_empty() {
            return Ok(PriceCatalog::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, price_cents FROM products WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(i64, i64)> = builder.build_query_as().fetch_all(&mut *conn).await?;

        debug!(requested = ids.len(), found = rows.len(), "Resolved product prices");

        Ok(rows
            .into_iter()
            .map(|(id, cents)| (id, Money::from_cents(cents)))
            .collect())
    }

    /// Inserts a product row on the caller's connection.
    pub async fn insert_in(conn: &mut SqliteConnection, new: &NewProduct) -> DbResult<Product> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO products (description, ean, price_cents, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4, ?4)
            "#,
        )
        .bind(&new.description)
        .bind(&new.ean)
        .bind(new.price.cents())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let product = Product {
            id: result.last_insert_rowid(),
            description: new.description.clone(),
            ean: new.ean.clone(),
            price_cents: new.price.cents(),
            active: true,
            created_at: now,
            updated_at: now,
        };

        debug!(id = product.id, description = %product.description, "Inserted product");
        Ok(product)
    }

    /// Creates a product and, when `initial_stock > 0`, its opening ENTRY
    /// movement, atomically.
    pub async fn create_with_stock(
        &self,
        new: &NewProduct,
        initial_stock: i64,
    ) -> ServiceResult<Product> {
        let mut conn = tx::begin_immediate(&self.pool).await?;

        let result = async {
            let product = Self::insert_in(&mut conn, new).await?;
            if initial_stock > 0 {
                let entry =
                    NewStockMovement::entry(product.id, initial_stock, MovementReason::InitialStock);
                StockLedger::append_movement(&mut conn, &entry).await?;
            }
            Ok::<_, ServiceError>(product)
        }
        .await;

        match result {
            Ok(product) => {
                tx::commit(conn).await?;
                Ok(product)
            }
            Err(e) => {
                tx::rollback(conn).await;
                Err(e)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

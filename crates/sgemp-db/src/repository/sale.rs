//! # Sale Repository
//!
//! Database operations for sale headers, items and payments.
//!
//! ## Write Order Inside One Sale
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. insert_header()    → sales row, total_cents = 0, returns sale id   │
//! │  2. insert_items()     → one multi-row INSERT into sale_items          │
//! │  3. update_total()     → sales.total_cents = Σ value_cents             │
//! │  4. insert_payments()  → one multi-row INSERT into payments            │
//! │                                                                         │
//! │  All four take the orchestrator's connection; none commits.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use sgemp_core::{Money, Payment, PlannedItem, PlannedPayment, Sale, SaleItem, SaleSummary};

const SALE_COLUMNS: &str =
    "id, customer_id, total_cents, pdv_sale_id, active, created_at, updated_at";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Pool reads
    // =========================================================================

    /// Gets a sale header by ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    /// Gets a sale header by the id the PDV gave it.
    pub async fn find_by_pdv_sale_id(&self, pdv_sale_id: i64) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_pdv_sale_id_in(&mut conn, pdv_sale_id).await
    }

    /// Loads a sale with its items and payments.
    pub async fn summary(&self, id: i64) -> DbResult<Option<SaleSummary>> {
        let mut conn = self.pool.acquire().await?;
        Self::summary_in(&mut conn, id).await
    }

    /// Counts all sales.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Connection-scoped operations
    // =========================================================================

    /// Gets a sale header on the caller's connection.
    pub async fn get_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    /// Idempotency lookup on the caller's connection.
    pub async fn find_by_pdv_sale_id_in(
        conn: &mut SqliteConnection,
        pdv_sale_id: i64,
    ) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE pdv_sale_id = ?1"
        ))
        .bind(pdv_sale_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    /// Items of a sale, in insertion order.
    pub async fn items_in(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT id, sale_id, product_id, quantity, unit_price_cents, value_cents, created_at
            FROM sale_items
            WHERE sale_id = ?1
            ORDER BY id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    /// Payments of a sale, in insertion order.
    pub async fn payments_in(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, sale_id, payment_method_id, amount_cents, details, active, created_at
            FROM payments
            WHERE sale_id = ?1
            ORDER BY id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(payments)
    }

    /// Loads header, items and payments on the caller's connection.
    pub async fn summary_in(
        conn: &mut SqliteConnection,
        sale_id: i64,
    ) -> DbResult<Option<SaleSummary>> {
        let Some(sale) = Self::get_in(conn, sale_id).await? else {
            return Ok(None);
        };

        let items = Self::items_in(conn, sale_id).await?;
        let payments = Self::payments_in(conn, sale_id).await?;

        Ok(Some(SaleSummary {
            sale_id: sale.id,
            customer_id: sale.customer_id,
            pdv_sale_id: sale.pdv_sale_id,
            total: sale.total(),
            items,
            payments,
        }))
    }

    /// Inserts the sale header with a zero total. Returns the new sale id.
    pub async fn insert_header(
        conn: &mut SqliteConnection,
        customer_id: i64,
        pdv_sale_id: Option<i64>,
    ) -> DbResult<i64> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO sales (customer_id, total_cents, pdv_sale_id, active, created_at, updated_at)
            VALUES (?1, 0, ?2, 1, ?3, ?3)
            "#,
        )
        .bind(customer_id)
        .bind(pdv_sale_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(sale_id = id, customer_id, ?pdv_sale_id, "Inserted sale header");
        Ok(id)
    }

    /// Inserts every planned item in one statement.
    ///
    /// ## Snapshot Pattern
    /// The unit price is copied onto the item. Later catalog price changes
    /// do not alter recorded sales.
    pub async fn insert_items(
        conn: &mut SqliteConnection,
        sale_id: i64,
        items: &[PlannedItem],
    ) -> DbResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO sale_items (sale_id, product_id, quantity, unit_price_cents, value_cents, created_at) ",
        );
        builder.push_values(items, |mut row, item| {
            row.push_bind(sale_id)
                .push_bind(item.product_id)
                .push_bind(item.quantity)
                .push_bind(item.unit_price.cents())
                .push_bind(item.value.cents())
                .push_bind(now);
        });
        builder.build().execute(&mut *conn).await?;

        debug!(sale_id, count = items.len(), "Inserted sale items");
        Ok(())
    }

    /// Writes the final total.
    pub async fn update_total(
        conn: &mut SqliteConnection,
        sale_id: i64,
        total: Money,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sales SET total_cents = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(sale_id)
        .bind(total.cents())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", sale_id));
        }

        Ok(())
    }

    /// Inserts every planned payment in one statement.
    pub async fn insert_payments(
        conn: &mut SqliteConnection,
        sale_id: i64,
        payments: &[PlannedPayment],
    ) -> DbResult<()> {
        if payments.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO payments (sale_id, payment_method_id, amount_cents, details, active, created_at) ",
        );
        builder.push_values(payments, |mut row, payment| {
            row.push_bind(sale_id)
                .push_bind(payment.payment_method_id)
                .push_bind(payment.amount.cents())
                .push_bind(payment.details.clone())
                .push_bind(true)
                .push_bind(now);
        });
        builder.build().execute(&mut *conn).await?;

        debug!(sale_id, count = payments.len(), "Inserted payments");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

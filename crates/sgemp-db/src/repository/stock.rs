//! # Stock Ledger
//!
//! Append-only log of stock movements. Stock is never stored; it is derived
//! from the log every time it is asked for.
//!
//! ## Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  stock_movements (product 1)                                           │
//! │  ┌────┬──────┬─────┬─────────┬────────────────┐                        │
//! │  │ id │ type │ qty │ sale_id │ reason         │                        │
//! │  ├────┼──────┼─────┼─────────┼────────────────┤                        │
//! │  │  1 │ENTRY │  18 │  NULL   │ initial_stock  │   +18                  │
//! │  │  7 │EXIT  │   5 │    3    │ sale           │    -5                  │
//! │  │  9 │EXIT  │   3 │    4    │ sale           │    -3                  │
//! │  └────┴──────┴─────┴─────────┴────────────────┘                        │
//! │                                                  ──────                 │
//! │  current_stock(1) = Σ ENTRY − Σ EXIT               10                  │
//! │                                                                         │
//! │  Rows are never updated or deleted (enforced by triggers).             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Ways To Append
//! - [`StockLedger::append_movement`] joins a transaction the caller owns
//!   (the sale orchestrator, product creation).
//! - [`StockLedger::register_movement`] opens and commits its own.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbResult, ServiceResult};
use crate::repository::product::ProductRepository;
use crate::tx;
use sgemp_core::validation::validate_movement;
use sgemp_core::{
    CoreError, MovementReason, MovementType, NewStockMovement, StockLevel, StockMovement, StockPage,
    ValidationError,
};

const MOVEMENT_COLUMNS: &str =
    "id, product_id, quantity, type AS movement_type, sale_id, reason, created_at";

/// Largest page `stock_levels` will return.
pub const MAX_PER_PAGE: i64 = 100;

/// The stock ledger.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current stock of a product: Σ ENTRY − Σ EXIT, 0 without movements.
    pub async fn current_stock(&self, product_id: i64) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::current_stock_in(&mut conn, product_id).await
    }

    /// Same as [`current_stock`](Self::current_stock), on the caller's
    /// connection so it sees the caller's uncommitted movements.
    pub async fn current_stock_in(conn: &mut SqliteConnection, product_id: i64) -> DbResult<i64> {
        let stock: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE type WHEN 'ENTRY' THEN quantity ELSE -quantity END), 0)
            FROM stock_movements
            WHERE product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(stock)
    }

    /// Stock of an existing product; `ProductNotFound` otherwise.
    pub async fn stock_of(&self, product_id: i64) -> ServiceResult<i64> {
        let mut conn = self.pool.acquire().await?;

        if !ProductRepository::exists_in(&mut conn, product_id).await? {
            return Err(CoreError::ProductNotFound(product_id).into());
        }

        Ok(Self::current_stock_in(&mut conn, product_id).await?)
    }

    /// Every movement of a product, oldest first.
    pub async fn movements_for_product(&self, product_id: i64) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE product_id = ?1 ORDER BY id"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements written by a sale, oldest first.
    pub async fn movements_for_sale(&self, sale_id: i64) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE sale_id = ?1 ORDER BY id"
        ))
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// One page of products with their current stock.
    ///
    /// `page` starts at 1. `per_page` is clamped to `1..=MAX_PER_PAGE`.
    /// `product_id` narrows the page to a single product.
    pub async fn stock_levels(
        &self,
        page: i64,
        per_page: i64,
        product_id: Option<i64>,
    ) -> DbResult<StockPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let offset = (page - 1).saturating_mul(per_page);

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM products");
        if let Some(id) = product_id {
            count.push(" WHERE id = ").push_bind(id);
        }
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT
                p.id AS product_id,
                p.description,
                p.ean,
                p.price_cents,
                COALESCE(SUM(CASE m.type WHEN 'ENTRY' THEN m.quantity
                                         WHEN 'EXIT' THEN -m.quantity END), 0) AS stock
            FROM products p
            LEFT JOIN stock_movements m ON m.product_id = p.id
            "#,
        );
        if let Some(id) = product_id {
            select.push(" WHERE p.id = ").push_bind(id);
        }
        select
            .push(" GROUP BY p.id ORDER BY p.id LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind(offset);

        let data: Vec<StockLevel> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(StockPage {
            total,
            per_page,
            current_page: page,
            last_page: (total + per_page - 1) / per_page,
            data,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Appends one movement inside the caller's transaction.
    ///
    /// ## Checks (in order)
    /// 1. quantity > 0, sale exits carry a sale id
    /// 2. the product exists (skipped for `InitialStock`, whose product is
    ///    being inserted in the same transaction)
    /// 3. an EXIT does not take stock below zero
    ///
    /// Nothing is written when a check fails.
    pub async fn append_movement(
        conn: &mut SqliteConnection,
        movement: &NewStockMovement,
    ) -> ServiceResult<StockMovement> {
        validate_movement(movement)?;

        if movement.reason != MovementReason::InitialStock
            && !ProductRepository::exists_in(conn, movement.product_id).await?
        {
            return Err(ValidationError::unknown("productId", movement.product_id).into());
        }

        if movement.movement_type == MovementType::Exit {
            let available = Self::current_stock_in(conn, movement.product_id).await?;
            if available < movement.quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: movement.product_id,
                    available,
                    requested: movement.quantity,
                }
                .into());
            }
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO stock_movements (product_id, quantity, type, sale_id, reason, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(movement.product_id)
        .bind(movement.quantity)
        .bind(movement.movement_type.as_str())
        .bind(movement.sale_id)
        .bind(movement.reason.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(
            product_id = movement.product_id,
            quantity = movement.quantity,
            movement_type = %movement.movement_type,
            sale_id = ?movement.sale_id,
            "Appended stock movement"
        );

        Ok(StockMovement {
            id: result.last_insert_rowid(),
            product_id: movement.product_id,
            quantity: movement.quantity,
            movement_type: movement.movement_type,
            sale_id: movement.sale_id,
            reason: Some(movement.reason.as_str().to_string()),
            created_at: now,
        })
    }

    /// Appends one movement in a transaction of its own.
    pub async fn register_movement(&self, movement: NewStockMovement) -> ServiceResult<StockMovement> {
        let mut conn = tx::begin_immediate(&self.pool).await?;

        match Self::append_movement(&mut conn, &movement).await {
            Ok(appended) => {
                tx::commit(conn).await?;
                info!(
                    id = appended.id,
                    product_id = appended.product_id,
                    movement_type = %appended.movement_type,
                    quantity = appended.quantity,
                    "Stock movement registered"
                );
                Ok(appended)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, ServiceError};
    use sgemp_core::{Money, NewProduct};

    async fn setup(initial_stock: i64) -> (Database, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .products()
            .create_with_stock(
                &NewProduct {
                    description: "Guaraná 2L".to_string(),
                    ean: None,
                    price: Money::from_cents(899),
                },
                initial_stock,
            )
            .await
            .unwrap();
        (db, product.id)
    }

    fn restock(product_id: i64, quantity: i64) -> NewStockMovement {
        NewStockMovement::entry(product_id, quantity, MovementReason::Other("restock".into()))
    }

    #[tokio::test]
    async fn test_stock_without_movements_is_zero() {
        let (db, product_id) = setup(0).await;
        assert_eq!(db.stock().current_stock(product_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_add_up() {
        let (db, product_id) = setup(18).await;
        db.stock().register_movement(restock(product_id, 2)).await.unwrap();

        assert_eq!(db.stock().current_stock(product_id).await.unwrap(), 20);
        assert_eq!(db.stock().movements_for_product(product_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exit_beyond_stock_is_rejected_and_not_written() {
        let (db, product_id) = setup(1).await;

        let mut exit = restock(product_id, 2);
        exit.movement_type = MovementType::Exit;

        let err = db.stock().register_movement(exit).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::InsufficientStock {
                available: 1,
                requested: 2,
                ..
            })
        ));
        assert_eq!(db.stock().current_stock(product_id).await.unwrap(), 1);
        assert_eq!(db.stock().movements_for_product(product_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_movements() {
        let (db, product_id) = setup(5).await;

        let zero = db.stock().register_movement(restock(product_id, 0)).await.unwrap_err();
        assert!(matches!(zero, ServiceError::Core(CoreError::Validation(_))));

        let missing = db.stock().register_movement(restock(999, 1)).await.unwrap_err();
        assert!(matches!(
            missing,
            ServiceError::Core(CoreError::Validation(ValidationError::UnknownReference { id: 999, .. }))
        ));

        let mut orphan = NewStockMovement::sale_exit(product_id, 1, 1);
        orphan.sale_id = None;
        let orphan = db.stock().register_movement(orphan).await.unwrap_err();
        assert!(matches!(orphan, ServiceError::Core(CoreError::Validation(_))));

        assert_eq!(db.stock().current_stock(product_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_ledger_rows_cannot_be_rewritten() {
        let (db, product_id) = setup(5).await;

        let update = sqlx::query("UPDATE stock_movements SET quantity = 50 WHERE product_id = ?1")
            .bind(product_id)
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM stock_movements")
            .execute(db.pool())
            .await;
        assert!(delete.is_err());

        assert_eq!(db.stock().current_stock(product_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_stock_of_unknown_product() {
        let (db, product_id) = setup(3).await;

        assert_eq!(db.stock().stock_of(product_id).await.unwrap(), 3);
        let err = db.stock().stock_of(404).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stock_levels_pagination() {
        let (db, first) = setup(18).await;
        for (i, qty) in [24, 8, 1].into_iter().enumerate() {
            db.products()
                .create_with_stock(
                    &NewProduct {
                        description: format!("Product {}", i + 2),
                        ean: None,
                        price: Money::from_cents(100),
                    },
                    qty,
                )
                .await
                .unwrap();
        }

        let page = db.stock().stock_levels(1, 3, None).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.last_page, 2);
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.data[0].product_id, first);
        assert_eq!(page.data[0].stock, 18);

        let second = db.stock().stock_levels(2, 3, None).await.unwrap();
        assert_eq!(second.data.len(), 1);
        assert_eq!(second.data[0].stock, 1);

        let single = db.stock().stock_levels(1, 10, Some(first)).await.unwrap();
        assert_eq!(single.total, 1);
        assert_eq!(single.data[0].description, "Guaraná 2L");
    }
}

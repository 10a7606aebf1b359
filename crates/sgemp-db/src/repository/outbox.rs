//! # Sale Outbox Repository
//!
//! PDV side of the bridge: finalized sales waiting to be published.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  SaleOrchestrator::create_sale (PDV role)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. sales, sale_items, stock_movements, payments               │   │
//! │  │  2. INSERT INTO sale_outbox (sale_id, payload)                 │   │
//! │  │     payload = SaleRequest { pdvSaleId: <local sale id>, .. }   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼  COMMIT ← both succeed or both fail                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            OUTBOX RELAY (sgemp-sync, background)                │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT * FROM sale_outbox WHERE published_at IS NULL       │   │
//! │  │  2. For each entry: publish to finalized_sale                  │   │
//! │  │     a. ok   → published_at = now                               │   │
//! │  │     b. fail → attempts += 1, last_error = ?                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Broker down? Sales keep committing; entries queue up here.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use sgemp_core::{SaleOutboxEntry, SaleRequest};

const OUTBOX_COLUMNS: &str =
    "id, sale_id, payload, attempts, last_error, created_at, attempted_at, published_at";

/// Repository for the PDV sale outbox.
#[derive(Debug, Clone)]
pub struct SaleOutboxRepository {
    pool: SqlitePool,
}

impl SaleOutboxRepository {
    /// Creates a new SaleOutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleOutboxRepository { pool }
    }

    /// Queues a committed-to-be sale for publication, on the sale's own
    /// connection.
    ///
    /// The payload is the original request carrying `pdvSaleId = sale_id`,
    /// which is the idempotency key on the receiving side.
    pub async fn enqueue_in(
        conn: &mut SqliteConnection,
        sale_id: i64,
        request: &SaleRequest,
    ) -> DbResult<i64> {
        let payload = serde_json::to_string(&request.with_pdv_sale_id(sale_id))
            .map_err(|e| DbError::Internal(format!("outbox payload: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO sale_outbox (sale_id, payload, attempts, created_at)
            VALUES (?1, ?2, 0, ?3)
            "#,
        )
        .bind(sale_id)
        .bind(payload)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        debug!(sale_id, "Queued sale for publication");
        Ok(result.last_insert_rowid())
    }

    /// Gets unpublished entries below the attempt ceiling, oldest first.
    pub async fn get_pending(&self, limit: u32, max_attempts: u32) -> DbResult<Vec<SaleOutboxEntry>> {
        let entries = sqlx::query_as::<_, SaleOutboxEntry>(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM sale_outbox
            WHERE published_at IS NULL AND attempts < ?2
            ORDER BY created_at ASC, id ASC
            LIMIT ?1
            "#
        ))
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Marks an entry as published.
    pub async fn mark_published(&self, id: i64) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query("UPDATE sale_outbox SET published_at = ?2, attempted_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records a failed publish attempt.
    pub async fn mark_failed(&self, id: i64, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sale_outbox SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts unpublished entries.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sale_outbox WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Counts unpublished entries that reached the attempt ceiling.
    pub async fn count_stuck(&self, max_attempts: u32) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sale_outbox WHERE published_at IS NULL AND attempts >= ?1",
        )
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sale::SaleRepository;
    use crate::{Database, DbConfig};

    async fn setup() -> (Database, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = db.customers().insert("Consumidor final").await.unwrap();

        let request = SaleRequest::from_json(
            br#"{ "customerId": 1, "items": [], "paymentData": [] }"#,
        )
        .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let sale_id = SaleRepository::insert_header(&mut conn, customer.id, None)
            .await
            .unwrap();
        SaleOutboxRepository::enqueue_in(&mut conn, sale_id, &request)
            .await
            .unwrap();

        (db, sale_id)
    }

    #[tokio::test]
    async fn test_enqueue_sets_pdv_sale_id() {
        let (db, sale_id) = setup().await;

        let pending = db.sale_outbox().get_pending(10, 5).await.unwrap();
        assert_eq!(pending.len(), 1);

        let payload = SaleRequest::from_json(pending[0].payload.as_bytes()).unwrap();
        assert_eq!(payload.pdv_sale_id, Some(sale_id));
    }

    #[tokio::test]
    async fn test_published_and_failed_entries() {
        let (db, _) = setup().await;
        let outbox = db.sale_outbox();
        let id = outbox.get_pending(10, 2).await.unwrap()[0].id;

        outbox.mark_failed(id, "connection refused").await.unwrap();
        let retry = outbox.get_pending(10, 2).await.unwrap();
        assert_eq!(retry[0].attempts, 1);
        assert_eq!(retry[0].last_error.as_deref(), Some("connection refused"));

        outbox.mark_failed(id, "connection refused").await.unwrap();
        assert!(outbox.get_pending(10, 2).await.unwrap().is_empty());
        assert_eq!(outbox.count_stuck(2).await.unwrap(), 1);

        outbox.mark_published(id).await.unwrap();
        assert_eq!(outbox.count_pending().await.unwrap(), 0);
    }
}

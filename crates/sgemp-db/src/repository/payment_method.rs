//! # Payment Method Repository

use std::collections::HashSet;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::error::DbResult;
use sgemp_core::PaymentMethod;

/// Repository for payment method database operations.
#[derive(Debug, Clone)]
pub struct PaymentMethodRepository {
    pool: SqlitePool,
}

impl PaymentMethodRepository {
    /// Creates a new PaymentMethodRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentMethodRepository { pool }
    }

    /// Inserts an active payment method.
    pub async fn insert(&self, description: &str) -> DbResult<PaymentMethod> {
        let result = sqlx::query("INSERT INTO payment_methods (description, active) VALUES (?1, 1)")
            .bind(description)
            .execute(&self.pool)
            .await?;

        Ok(PaymentMethod {
            id: result.last_insert_rowid(),
            description: description.to_string(),
            active: true,
        })
    }

    /// Lists all payment methods ordered by id.
    pub async fn list(&self) -> DbResult<Vec<PaymentMethod>> {
        let methods = sqlx::query_as::<_, PaymentMethod>(
            "SELECT id, description, active FROM payment_methods ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(methods)
    }

    /// Returns which of the given ids exist, in one query.
    pub async fn existing_ids(conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM payment_methods WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let found: Vec<i64> = builder.build_query_scalar().fetch_all(&mut *conn).await?;
        Ok(found.into_iter().collect())
    }
}

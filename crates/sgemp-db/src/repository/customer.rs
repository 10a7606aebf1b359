//! # Customer Repository
//!
//! Customers are reference data here: the sale workflow only checks that
//! the referenced customer exists.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use sgemp_core::Customer;

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Inserts a customer.
    pub async fn insert(&self, name: &str) -> DbResult<Customer> {
        let now = Utc::now();

        let result = sqlx::query("INSERT INTO customers (name, active, created_at) VALUES (?1, 1, ?2)")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let customer = Customer {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            active: true,
            created_at: now,
        };

        debug!(id = customer.id, "Inserted customer");
        Ok(customer)
    }

    /// Gets a customer by its ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            "SELECT id, name, active, created_at FROM customers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    /// Counts all customers.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Checks existence on the caller's connection.
    pub async fn exists_in(conn: &mut SqliteConnection, id: i64) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM customers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(found.is_some())
    }
}

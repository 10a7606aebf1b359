//! # Write Transactions
//!
//! Every write path that reads before it writes (stock check, idempotency
//! lookup) runs inside `BEGIN IMMEDIATE`.
//!
//! ```text
//! acquire ──► BEGIN IMMEDIATE ──► work on &mut conn ──┬──► COMMIT
//!             (write lock taken                       │
//!              before the first read)                 └──► ROLLBACK
//!                                                           │ fails?
//!                                                           ▼
//!                                                     detach + close
//!                                                     (SQLite discards
//!                                                      the open tx)
//! ```
//!
//! A deferred `BEGIN` would let two writers read the same stock level and
//! both append an exit; IMMEDIATE serializes them at the lock.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::{DbError, DbResult};

/// Acquires a connection and opens an IMMEDIATE transaction on it.
pub(crate) async fn begin_immediate(pool: &SqlitePool) -> DbResult<PoolConnection<Sqlite>> {
    let mut conn = pool.acquire().await?;
    begin_in(&mut conn).await?;
    Ok(conn)
}

/// Opens an IMMEDIATE transaction on an already acquired connection.
///
/// Waits up to the pool's busy_timeout for the write lock.
pub(crate) async fn begin_in(conn: &mut SqliteConnection) -> DbResult<()> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

    Ok(())
}

/// Commits; on failure the transaction is rolled back before returning.
pub(crate) async fn commit(mut conn: PoolConnection<Sqlite>) -> DbResult<()> {
    match sqlx::query("COMMIT").execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(e) => {
            rollback(conn).await;
            Err(DbError::TransactionFailed(e.to_string()))
        }
    }
}

/// Rolls back. A connection whose rollback fails never goes back to the pool.
pub(crate) async fn rollback(mut conn: PoolConnection<Sqlite>) {
    if let Err(e) = rollback_in(&mut *conn).await {
        warn!(?e, "Rollback failed, discarding connection");
        drop(conn.detach());
    }
}

async fn rollback_in(conn: &mut SqliteConnection) -> DbResult<()> {
    sqlx::query("ROLLBACK").execute(&mut *conn).await?;
    Ok(())
}

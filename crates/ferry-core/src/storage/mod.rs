//! Database access layer for the retry queue.
//!
//! The repository translates between [`QueueEntry`](crate::models::QueueEntry)
//! and the `ferry_retry_queue` table. Every query is parameterized; no other
//! module issues SQL against the queue.

use std::sync::Arc;

use sqlx::PgPool;

pub mod retry_queue;
pub mod schema;

use crate::error::Result;

/// Entry point for all database operations.
#[derive(Clone)]
pub struct Storage {
    pool: Arc<PgPool>,
    /// Repository for the retry queue.
    pub retry_queue: Arc<retry_queue::Repository>,
}

impl Storage {
    /// Creates a storage instance over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        Self { retry_queue: Arc::new(retry_queue::Repository::new(pool.clone())), pool }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates the queue schema if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any DDL statement fails.
    pub async fn install(&self) -> Result<()> {
        schema::install(&self.pool()).await
    }

    /// Verifies database connectivity with a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created_lazily() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://localhost/ferry").unwrap();
        let storage = Storage::new(pool);
        assert_eq!(Arc::strong_count(&storage.retry_queue), 1);
    }
}

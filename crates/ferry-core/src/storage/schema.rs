//! Idempotent installation and removal of the queue schema.

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

/// Name of the queue table.
pub const QUEUE_TABLE: &str = "ferry_retry_queue";

/// Advisory lock key serializing schema changes across instances.
const SCHEMA_LOCK_KEY: i64 = 0x6665_7272_795f_7171;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ferry_retry_queue (
    id UUID PRIMARY KEY,
    trigger_code TEXT NOT NULL,
    payload BYTEA NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_flight', 'processed', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    next_retry_at TIMESTAMPTZ,
    processed_at TIMESTAMPTZ,
    claimed_at TIMESTAMPTZ,
    last_error TEXT
)
"#;

const CREATE_ELIGIBILITY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ferry_retry_queue_status_next_retry
    ON ferry_retry_queue (status, next_retry_at)
"#;

const CREATE_CREATED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ferry_retry_queue_created_at
    ON ferry_retry_queue (created_at)
"#;

/// Creates the queue table and its indexes. Safe to run on every start.
///
/// Concurrent installs serialize on a transaction-scoped advisory lock.
///
/// # Errors
///
/// Returns `CoreError::Database` if a statement fails.
pub async fn install(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(SCHEMA_LOCK_KEY).execute(&mut *tx).await?;
    for statement in [CREATE_TABLE, CREATE_ELIGIBILITY_INDEX, CREATE_CREATED_INDEX] {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(table = QUEUE_TABLE, "retry queue schema installed");
    Ok(())
}

/// Drops the queue table and everything in it.
///
/// # Errors
///
/// Returns `CoreError::Database` if the statement fails.
pub async fn uninstall(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(SCHEMA_LOCK_KEY).execute(&mut *tx).await?;
    sqlx::query("DROP TABLE IF EXISTS ferry_retry_queue").execute(&mut *tx).await?;
    tx.commit().await?;

    info!(table = QUEUE_TABLE, "retry queue schema removed");
    Ok(())
}

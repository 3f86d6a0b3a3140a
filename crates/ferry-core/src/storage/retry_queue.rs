//! Repository for retry queue operations.
//!
//! Provides parameterized access to queue entries with lock-free concurrent
//! claiming, fenced state transitions and the aggregate counts used by
//! operators.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{ClaimResult, ClaimToken, EntryId, QueueEntry, QueueStats, QueueStatus},
};

const COLUMNS: &str = "id, trigger_code, payload, status, attempts, created_at, next_retry_at, \
                       processed_at, claimed_at, last_error";

/// Repository for retry queue database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<EntryId> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO ferry_retry_queue (
                id, trigger_code, payload, status, attempts,
                created_at, next_retry_at, processed_at, claimed_at, last_error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(entry.id)
        .bind(&entry.trigger_code)
        .bind(&entry.payload)
        .bind(entry.status.as_str())
        .bind(entry.attempts)
        .bind(entry.created_at)
        .bind(entry.next_retry_at)
        .bind(entry.processed_at)
        .bind(entry.claimed_at)
        .bind(&entry.last_error)
        .fetch_one(&*self.pool)
        .await?;

        Ok(EntryId(id))
    }

    /// Returns entries a drain at `now` may pick up, oldest first.
    ///
    /// Read-only; use [`Repository::claim_eligible`] before attempting
    /// delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {COLUMNS} FROM ferry_retry_queue
            WHERE status = 'pending'
              AND next_retry_at <= $1
              AND attempts < $2
            ORDER BY created_at ASC
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(entries)
    }

    /// Claims eligible entries for delivery.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent drains claim disjoint
    /// sets without blocking each other. In-flight entries whose claim is
    /// older than `lease` are reclaimed so a crashed drain never strands
    /// them. Claimed entries are returned oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
        lease: Duration,
    ) -> Result<Vec<QueueEntry>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM ferry_retry_queue
            WHERE attempts < $2
              AND (
                (status = 'pending' AND next_retry_at <= $1)
                OR (status = 'in_flight' AND claimed_at <= $3)
              )
            ORDER BY created_at ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .bind(now - lease)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            UPDATE ferry_retry_queue
            SET status = 'in_flight', claimed_at = $2
            WHERE id = ANY($1)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    /// Claims a single entry for a manual retry, ignoring its eligibility
    /// window.
    ///
    /// Pending and failed entries are claimable, as are in-flight entries
    /// whose claim is older than `lease`.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_one(
        &self,
        id: EntryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimResult> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {COLUMNS} FROM ferry_retry_queue WHERE id = $1 FOR UPDATE SKIP LOCKED"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ferry_retry_queue WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&*self.pool)
                    .await?;
            return Ok(if exists { ClaimResult::Busy } else { ClaimResult::NotFound });
        };

        match current.status {
            QueueStatus::Processed => {
                tx.rollback().await?;
                return Ok(ClaimResult::AlreadyProcessed);
            },
            QueueStatus::InFlight if !current.claim_expired(now, lease) => {
                tx.rollback().await?;
                return Ok(ClaimResult::Busy);
            },
            _ => {},
        }

        let claimed = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            UPDATE ferry_retry_queue
            SET status = 'in_flight', claimed_at = $2
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ClaimResult::Claimed(claimed))
    }

    /// Restarts the lease of a held claim at `now`.
    ///
    /// Returns the new token, or `None` when the claim was released, settled
    /// or taken over in the meantime. The stored timestamp is returned so the
    /// token matches the column exactly.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn renew_claim(
        &self,
        token: ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimToken>> {
        let claimed_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE ferry_retry_queue
            SET claimed_at = $3
            WHERE id = $1 AND status = 'in_flight' AND claimed_at = $2
            RETURNING claimed_at
            "#,
        )
        .bind(token.id)
        .bind(token.claimed_at)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(claimed_at.map(|claimed_at| ClaimToken { id: token.id, claimed_at }))
    }

    /// Returns a claimed entry to `pending` without counting an attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release(&self, token: ClaimToken) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ferry_retry_queue
            SET status = 'pending', claimed_at = NULL
            WHERE id = $1 AND status = 'in_flight' AND claimed_at = $2
            "#,
        )
        .bind(token.id)
        .bind(token.claimed_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Marks a claimed entry as delivered.
    ///
    /// Returns `false` without touching the row when the claim is no longer
    /// held, so `processed_at` is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_processed(
        &self,
        token: ClaimToken,
        attempts: i32,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ferry_retry_queue
            SET status = 'processed', attempts = $3, processed_at = $4,
                next_retry_at = NULL, claimed_at = NULL
            WHERE id = $1 AND status = 'in_flight' AND claimed_at = $2
            "#,
        )
        .bind(token.id)
        .bind(token.claimed_at)
        .bind(attempts)
        .bind(processed_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns a claimed entry to `pending` with a new retry time.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_retry_scheduled(
        &self,
        token: ClaimToken,
        attempts: i32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ferry_retry_queue
            SET status = 'pending', attempts = $3, next_retry_at = $4,
                claimed_at = NULL, last_error = $5
            WHERE id = $1 AND status = 'in_flight' AND claimed_at = $2
            "#,
        )
        .bind(token.id)
        .bind(token.claimed_at)
        .bind(attempts)
        .bind(next_retry_at)
        .bind(error)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Marks a claimed entry as permanently failed.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(&self, token: ClaimToken, attempts: i32, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ferry_retry_queue
            SET status = 'failed', attempts = $3, next_retry_at = NULL,
                claimed_at = NULL, last_error = $4
            WHERE id = $1 AND status = 'in_flight' AND claimed_at = $2
            "#,
        )
        .bind(token.id)
        .bind(token.claimed_at)
        .bind(attempts)
        .bind(error)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finds an entry by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: EntryId) -> Result<Option<QueueEntry>> {
        let entry = sqlx::query_as::<_, QueueEntry>(&format!(
            "SELECT {COLUMNS} FROM ferry_retry_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(entry)
    }

    /// Lists entries with any of the given statuses, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list(&self, statuses: &[QueueStatus], limit: i64) -> Result<Vec<QueueEntry>> {
        let statuses: Vec<&str> = statuses.iter().map(QueueStatus::as_str).collect();

        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {COLUMNS} FROM ferry_retry_queue
            WHERE status = ANY($1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(&statuses)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(entries)
    }

    /// Counts unconfirmed and failed entries.
    ///
    /// In-flight entries count as pending.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn stats(&self) -> Result<QueueStats> {
        let (pending, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status IN ('pending', 'in_flight')),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM ferry_retry_queue
            "#,
        )
        .fetch_one(&*self.pool)
        .await?;

        Ok(QueueStats { pending, failed })
    }
}

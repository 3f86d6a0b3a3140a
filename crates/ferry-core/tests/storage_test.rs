//! Integration tests for the PostgreSQL retry queue repository.
//!
//! These tests need a PostgreSQL database and are ignored by default. Run
//! them with:
//!
//! ```text
//! DATABASE_URL=postgresql://localhost/ferry_test \
//!     cargo test -p ferry-core --test storage_test -- --ignored
//! ```
//!
//! Tests share one table and run serially.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use bytes::Bytes;
use chrono::{DateTime, Duration, DurationRound, Utc};
use ferry_core::{
    models::{ClaimResult, EntryId, QueueEntry, QueueStatus},
    storage::{schema, Storage},
};
use futures::future::join_all;
use serial_test::serial;
use sqlx::PgPool;

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL environment variable is required")
}

async fn storage() -> Storage {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    schema::install(&pool).await.unwrap();
    sqlx::query("DELETE FROM ferry_retry_queue").execute(&pool).await.unwrap();
    Storage::new(pool)
}

/// Postgres keeps microseconds; truncate so round-tripped values compare equal.
fn now() -> DateTime<Utc> {
    Utc::now().duration_trunc(Duration::milliseconds(1)).unwrap()
}

fn entry(created_at: DateTime<Utc>, next_retry_at: DateTime<Utc>) -> QueueEntry {
    QueueEntry::pending(
        "BILL_VALIDATE",
        Bytes::from_static(br#"{"trigger_code":"BILL_VALIDATE","object":{"ref":"FA-1"}}"#),
        created_at,
        next_retry_at,
    )
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn health_check_and_install_are_idempotent() {
    let storage = storage().await;

    storage.install().await.unwrap();
    storage.install().await.unwrap();
    assert!(storage.health_check().await.is_ok());
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn concurrent_installs_all_succeed() {
    let url = database_url();
    let mut pools = Vec::new();
    for _ in 0..4 {
        pools.push(PgPool::connect(&url).await.unwrap());
    }

    let results = join_all(pools.iter().map(schema::install)).await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn enqueued_entry_round_trips_byte_for_byte() {
    let storage = storage().await;
    let now = now();
    let queued = entry(now, now + Duration::minutes(15));

    let id = storage.retry_queue.enqueue(&queued).await.unwrap();
    let found = storage.retry_queue.find_by_id(id).await.unwrap().unwrap();

    assert_eq!(found, queued);
    assert_eq!(found.body(), queued.body());
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn claims_are_exclusive_and_oldest_first() {
    let storage = storage().await;
    let now = now();
    let newer = entry(now - Duration::hours(1), now - Duration::minutes(45));
    let older = entry(now - Duration::hours(2), now - Duration::minutes(105));
    let not_due = entry(now, now + Duration::minutes(15));
    for queued in [&newer, &older, &not_due] {
        storage.retry_queue.enqueue(queued).await.unwrap();
    }

    let eligible = storage.retry_queue.fetch_eligible(now, 10, 10).await.unwrap();
    let eligible: Vec<EntryId> = eligible.iter().map(|e| e.id).collect();
    assert_eq!(eligible, vec![older.id, newer.id]);

    let lease = Duration::minutes(2);
    let claimed = storage.retry_queue.claim_eligible(now, 10, 10, lease).await.unwrap();
    let again = storage.retry_queue.claim_eligible(now, 10, 10, lease).await.unwrap();

    let claimed_ids: Vec<EntryId> = claimed.iter().map(|e| e.id).collect();
    assert_eq!(claimed_ids, vec![older.id, newer.id]);
    assert!(claimed.iter().all(|e| e.status == QueueStatus::InFlight));
    assert!(again.is_empty());

    // Stale claims come back once the lease has expired.
    let later = now + Duration::minutes(3);
    let reclaimed = storage.retry_queue.claim_eligible(later, 10, 10, lease).await.unwrap();
    assert_eq!(reclaimed.len(), 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn fenced_transitions_never_overwrite_newer_state() {
    let storage = storage().await;
    let now = now();
    let queued = entry(now - Duration::hours(1), now - Duration::minutes(45));
    storage.retry_queue.enqueue(&queued).await.unwrap();

    let lease = Duration::minutes(2);
    let first = storage.retry_queue.claim_eligible(now, 10, 1, lease).await.unwrap();
    let stale_token = first[0].claim_token().unwrap();

    let later = now + Duration::minutes(5);
    let second = storage.retry_queue.claim_eligible(later, 10, 1, lease).await.unwrap();
    let token = second[0].claim_token().unwrap();

    assert!(storage.retry_queue.mark_processed(token, 1, later).await.unwrap());
    assert!(!storage.retry_queue.mark_failed(stale_token, 1, "late").await.unwrap());
    assert!(!storage.retry_queue.mark_processed(token, 2, later).await.unwrap());

    let stored = storage.retry_queue.find_by_id(queued.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Processed);
    assert_eq!(stored.processed_at, Some(later));
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn renewal_extends_only_a_held_claim() {
    let storage = storage().await;
    let now = now();
    let queued = entry(now - Duration::hours(1), now - Duration::minutes(45));
    storage.retry_queue.enqueue(&queued).await.unwrap();
    let lease = Duration::minutes(2);

    let claimed = storage.retry_queue.claim_eligible(now, 10, 1, lease).await.unwrap();
    let token = claimed[0].claim_token().unwrap();
    let renewed_at = now + Duration::minutes(1);
    let renewed = storage.retry_queue.renew_claim(token, renewed_at).await.unwrap().unwrap();
    assert_eq!(renewed.claimed_at, renewed_at);

    // The renewed claim is not stale yet, and the old token no longer fences.
    let later = now + Duration::minutes(2) + Duration::seconds(30);
    assert!(storage.retry_queue.claim_eligible(later, 10, 1, lease).await.unwrap().is_empty());
    assert!(storage.retry_queue.renew_claim(token, later).await.unwrap().is_none());
    assert!(storage.retry_queue.mark_processed(renewed, 1, later).await.unwrap());
    assert!(storage.retry_queue.renew_claim(renewed, later).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn retry_and_failure_bookkeeping() {
    let storage = storage().await;
    let now = now();
    let queued = entry(now - Duration::hours(1), now);
    storage.retry_queue.enqueue(&queued).await.unwrap();
    let lease = Duration::minutes(2);

    let claimed = storage.retry_queue.claim_eligible(now, 10, 1, lease).await.unwrap();
    let token = claimed[0].claim_token().unwrap();
    let next = now + Duration::minutes(15);
    assert!(storage
        .retry_queue
        .mark_retry_scheduled(token, 1, next, "HTTP 500")
        .await
        .unwrap());

    let stored = storage.retry_queue.find_by_id(queued.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.next_retry_at, Some(next));
    assert_eq!(stored.last_error.as_deref(), Some("HTTP 500"));
    assert_eq!(stored.claimed_at, None);

    let claimed = storage.retry_queue.claim_eligible(next, 10, 1, lease).await.unwrap();
    let token = claimed[0].claim_token().unwrap();
    assert!(storage.retry_queue.mark_failed(token, 10, "HTTP 502").await.unwrap());

    let stats = storage.retry_queue.stats().await.unwrap();
    assert_eq!((stats.pending, stats.failed), (0, 1));
    let failed = storage.retry_queue.list(&[QueueStatus::Failed], 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].next_retry_at, None);
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL via DATABASE_URL"]
async fn claim_one_reports_every_state() {
    let storage = storage().await;
    let now = now();
    let lease = Duration::minutes(2);

    let mut processed = entry(now, now);
    processed.status = QueueStatus::Processed;
    processed.processed_at = Some(now);
    storage.retry_queue.enqueue(&processed).await.unwrap();

    let mut failed = entry(now, now);
    failed.status = QueueStatus::Failed;
    failed.attempts = 10;
    storage.retry_queue.enqueue(&failed).await.unwrap();

    let result = storage.retry_queue.claim_one(processed.id, now, lease).await.unwrap();
    assert_eq!(result, ClaimResult::AlreadyProcessed);

    let missing = storage.retry_queue.claim_one(EntryId::new(), now, lease).await.unwrap();
    assert_eq!(missing, ClaimResult::NotFound);

    let claimed = storage.retry_queue.claim_one(failed.id, now, lease).await.unwrap();
    assert!(matches!(claimed, ClaimResult::Claimed(ref e) if e.status == QueueStatus::InFlight));

    let busy = storage.retry_queue.claim_one(failed.id, now, lease).await.unwrap();
    assert_eq!(busy, ClaimResult::Busy);

    let released = match claimed {
        ClaimResult::Claimed(entry) => entry.claim_token().unwrap(),
        other => panic!("expected a claim, got {other:?}"),
    };
    assert!(storage.retry_queue.release(released).await.unwrap());
    let stored = storage.retry_queue.find_by_id(failed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.attempts, 10);
}

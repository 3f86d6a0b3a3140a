//! Queue store abstraction for the delivery coordinator.
//!
//! The coordinator only talks to the retry queue through [`QueueStore`].
//! Production uses the PostgreSQL repository from `ferry_core`; tests and
//! embedded hosts use the in-memory store in [`memory`].

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use ferry_core::{
    error::Result,
    models::{ClaimResult, ClaimToken, EntryId, QueueEntry, QueueStats, QueueStatus},
    storage::Storage,
};

/// Boxed future returned by [`QueueStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable storage for not-yet-confirmed events.
///
/// Every state transition on a claimed entry is fenced by its
/// [`ClaimToken`]: a transition on an entry that is no longer held by that
/// claim returns `Ok(false)` and changes nothing.
pub trait QueueStore: Send + Sync + 'static {
    /// Inserts a new pending entry with zero attempts.
    fn enqueue(
        &self,
        trigger_code: &str,
        payload: Bytes,
        created_at: DateTime<Utc>,
        first_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, EntryId>;

    /// Returns pending entries due at `now` with attempts below
    /// `max_attempts`, oldest `created_at` first, without claiming them.
    fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Atomically claims what [`QueueStore::fetch_eligible`] would return,
    /// plus in-flight entries whose claim is older than `lease`.
    fn claim_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
        lease: Duration,
    ) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Claims one entry regardless of its retry window.
    fn claim_one(
        &self,
        id: EntryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StoreFuture<'_, ClaimResult>;

    /// Restarts the lease of a held claim at `now`; `None` once the claim
    /// is gone.
    fn renew_claim(
        &self,
        token: ClaimToken,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<ClaimToken>>;

    /// Returns a claimed entry to pending without counting an attempt.
    fn release(&self, token: ClaimToken) -> StoreFuture<'_, bool>;

    /// Claimed entry was delivered.
    fn mark_processed(
        &self,
        token: ClaimToken,
        attempts: i32,
        processed_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Claimed entry failed and stays pending until `next_retry_at`.
    fn mark_retry_scheduled(
        &self,
        token: ClaimToken,
        attempts: i32,
        next_retry_at: DateTime<Utc>,
        error: String,
    ) -> StoreFuture<'_, bool>;

    /// Claimed entry failed for the last time.
    fn mark_failed(
        &self,
        token: ClaimToken,
        attempts: i32,
        error: String,
    ) -> StoreFuture<'_, bool>;

    /// Finds one entry.
    fn fetch_one(&self, id: EntryId) -> StoreFuture<'_, Option<QueueEntry>>;

    /// Lists entries in the given statuses, newest first.
    fn list(&self, statuses: Vec<QueueStatus>, limit: i64) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Counts pending (including in-flight) and failed entries.
    fn stats(&self) -> StoreFuture<'_, QueueStats>;
}

/// PostgreSQL queue store.
///
/// Wraps the `ferry_core` repository; all SQL lives there.
#[derive(Clone)]
pub struct PostgresQueueStore {
    storage: Arc<Storage>,
}

impl PostgresQueueStore {
    /// Creates a new PostgreSQL queue store.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl QueueStore for PostgresQueueStore {
    fn enqueue(
        &self,
        trigger_code: &str,
        payload: Bytes,
        created_at: DateTime<Utc>,
        first_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, EntryId> {
        let entry = QueueEntry::pending(trigger_code, payload, created_at, first_retry_at);
        Box::pin(async move { self.storage.retry_queue.enqueue(&entry).await })
    }

    fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            self.storage.retry_queue.fetch_eligible(now, max_attempts, limit).await
        })
    }

    fn claim_eligible(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
        lease: Duration,
    ) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            self.storage.retry_queue.claim_eligible(now, max_attempts, limit, lease).await
        })
    }

    fn claim_one(
        &self,
        id: EntryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StoreFuture<'_, ClaimResult> {
        Box::pin(async move { self.storage.retry_queue.claim_one(id, now, lease).await })
    }

    fn renew_claim(
        &self,
        token: ClaimToken,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<ClaimToken>> {
        Box::pin(async move { self.storage.retry_queue.renew_claim(token, now).await })
    }

    fn release(&self, token: ClaimToken) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.storage.retry_queue.release(token).await })
    }

    fn mark_processed(
        &self,
        token: ClaimToken,
        attempts: i32,
        processed_at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.storage.retry_queue.mark_processed(token, attempts, processed_at).await
        })
    }

    fn mark_retry_scheduled(
        &self,
        token: ClaimToken,
        attempts: i32,
        next_retry_at: DateTime<Utc>,
        error: String,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.storage
                .retry_queue
                .mark_retry_scheduled(token, attempts, next_retry_at, &error)
                .await
        })
    }

    fn mark_failed(
        &self,
        token: ClaimToken,
        attempts: i32,
        error: String,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move { self.storage.retry_queue.mark_failed(token, attempts, &error).await })
    }

    fn fetch_one(&self, id: EntryId) -> StoreFuture<'_, Option<QueueEntry>> {
        Box::pin(async move { self.storage.retry_queue.find_by_id(id).await })
    }

    fn list(&self, statuses: Vec<QueueStatus>, limit: i64) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move { self.storage.retry_queue.list(&statuses, limit).await })
    }

    fn stats(&self) -> StoreFuture<'_, QueueStats> {
        Box::pin(async move { self.storage.retry_queue.stats().await })
    }
}

pub mod memory {
    //! In-memory queue store.
    //!
    //! Every operation runs under one write lock, so claims are atomic with
    //! respect to each other exactly like `FOR UPDATE SKIP LOCKED` claims in
    //! PostgreSQL. Failures can be injected per operation family to exercise
    //! persistence error paths.

    use std::{collections::HashMap, sync::Arc};

    use bytes::Bytes;
    use chrono::{DateTime, Duration, Utc};
    use ferry_core::{
        error::{CoreError, Result},
        models::{ClaimResult, ClaimToken, EntryId, QueueEntry, QueueStats, QueueStatus},
    };
    use tokio::sync::RwLock;

    use super::{QueueStore, StoreFuture};

    #[derive(Default)]
    struct State {
        entries: HashMap<EntryId, QueueEntry>,
        enqueue_error: Option<String>,
        claim_error: Option<String>,
        update_error: Option<String>,
    }

    /// In-memory queue store.
    #[derive(Clone, Default)]
    pub struct InMemoryQueueStore {
        state: Arc<RwLock<State>>,
    }

    impl InMemoryQueueStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts an entry as-is, bypassing enqueue validation.
        pub async fn insert(&self, entry: QueueEntry) {
            self.state.write().await.entries.insert(entry.id, entry);
        }

        /// Returns every entry, oldest first.
        pub async fn entries(&self) -> Vec<QueueEntry> {
            let mut entries: Vec<_> = self.state.read().await.entries.values().cloned().collect();
            entries.sort_by_key(|entry| (entry.created_at, entry.id));
            entries
        }

        /// Makes `enqueue` fail with a database error until cleared.
        pub async fn fail_enqueue(&self, message: Option<&str>) {
            self.state.write().await.enqueue_error = message.map(str::to_string);
        }

        /// Makes claims fail with a database error until cleared.
        pub async fn fail_claims(&self, message: Option<&str>) {
            self.state.write().await.claim_error = message.map(str::to_string);
        }

        /// Makes state transitions fail with a database error until cleared.
        pub async fn fail_updates(&self, message: Option<&str>) {
            self.state.write().await.update_error = message.map(str::to_string);
        }

        fn check(error: &Option<String>) -> Result<()> {
            match error {
                Some(message) => Err(CoreError::Database(message.clone())),
                None => Ok(()),
            }
        }

        async fn transition<F>(&self, token: ClaimToken, apply: F) -> Result<bool>
        where
            F: FnOnce(&mut QueueEntry) + Send,
        {
            let mut state = self.state.write().await;
            Self::check(&state.update_error)?;

            match state.entries.get_mut(&token.id) {
                Some(entry) if entry.claim_token() == Some(token) => {
                    apply(entry);
                    entry.claimed_at = None;
                    Ok(true)
                },
                _ => Ok(false),
            }
        }
    }

    impl QueueStore for InMemoryQueueStore {
        fn enqueue(
            &self,
            trigger_code: &str,
            payload: Bytes,
            created_at: DateTime<Utc>,
            first_retry_at: DateTime<Utc>,
        ) -> StoreFuture<'_, EntryId> {
            let entry = QueueEntry::pending(trigger_code, payload, created_at, first_retry_at);
            Box::pin(async move {
                let mut state = self.state.write().await;
                Self::check(&state.enqueue_error)?;

                let id = entry.id;
                state.entries.insert(id, entry);
                Ok(id)
            })
        }

        fn fetch_eligible(
            &self,
            now: DateTime<Utc>,
            max_attempts: i32,
            limit: i64,
        ) -> StoreFuture<'_, Vec<QueueEntry>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut eligible: Vec<_> = state
                    .entries
                    .values()
                    .filter(|entry| entry.is_eligible(now, max_attempts))
                    .cloned()
                    .collect();
                eligible.sort_by_key(|entry| (entry.created_at, entry.id));
                eligible.truncate(usize::try_from(limit).unwrap_or(0));
                Ok(eligible)
            })
        }

        fn claim_eligible(
            &self,
            now: DateTime<Utc>,
            max_attempts: i32,
            limit: i64,
            lease: Duration,
        ) -> StoreFuture<'_, Vec<QueueEntry>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                Self::check(&state.claim_error)?;

                let mut ids: Vec<_> = state
                    .entries
                    .values()
                    .filter(|entry| {
                        entry.is_eligible(now, max_attempts)
                            || (entry.attempts < max_attempts && entry.claim_expired(now, lease))
                    })
                    .map(|entry| (entry.created_at, entry.id))
                    .collect();
                ids.sort();
                ids.truncate(usize::try_from(limit).unwrap_or(0));

                let mut claimed = Vec::with_capacity(ids.len());
                for (_, id) in ids {
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.status = QueueStatus::InFlight;
                        entry.claimed_at = Some(now);
                        claimed.push(entry.clone());
                    }
                }
                Ok(claimed)
            })
        }

        fn claim_one(
            &self,
            id: EntryId,
            now: DateTime<Utc>,
            lease: Duration,
        ) -> StoreFuture<'_, ClaimResult> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                Self::check(&state.claim_error)?;

                let Some(entry) = state.entries.get_mut(&id) else {
                    return Ok(ClaimResult::NotFound);
                };

                match entry.status {
                    QueueStatus::Processed => Ok(ClaimResult::AlreadyProcessed),
                    QueueStatus::InFlight if !entry.claim_expired(now, lease) => {
                        Ok(ClaimResult::Busy)
                    },
                    _ => {
                        entry.status = QueueStatus::InFlight;
                        entry.claimed_at = Some(now);
                        Ok(ClaimResult::Claimed(entry.clone()))
                    },
                }
            })
        }

        fn renew_claim(
            &self,
            token: ClaimToken,
            now: DateTime<Utc>,
        ) -> StoreFuture<'_, Option<ClaimToken>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                Self::check(&state.update_error)?;

                match state.entries.get_mut(&token.id) {
                    Some(entry) if entry.claim_token() == Some(token) => {
                        entry.claimed_at = Some(now);
                        Ok(entry.claim_token())
                    },
                    _ => Ok(None),
                }
            })
        }

        fn release(&self, token: ClaimToken) -> StoreFuture<'_, bool> {
            Box::pin(self.transition(token, |entry| entry.status = QueueStatus::Pending))
        }

        fn mark_processed(
            &self,
            token: ClaimToken,
            attempts: i32,
            processed_at: DateTime<Utc>,
        ) -> StoreFuture<'_, bool> {
            Box::pin(self.transition(token, move |entry| {
                entry.status = QueueStatus::Processed;
                entry.attempts = attempts;
                entry.processed_at = Some(processed_at);
                entry.next_retry_at = None;
            }))
        }

        fn mark_retry_scheduled(
            &self,
            token: ClaimToken,
            attempts: i32,
            next_retry_at: DateTime<Utc>,
            error: String,
        ) -> StoreFuture<'_, bool> {
            Box::pin(self.transition(token, move |entry| {
                entry.status = QueueStatus::Pending;
                entry.attempts = attempts;
                entry.next_retry_at = Some(next_retry_at);
                entry.last_error = Some(error);
            }))
        }

        fn mark_failed(
            &self,
            token: ClaimToken,
            attempts: i32,
            error: String,
        ) -> StoreFuture<'_, bool> {
            Box::pin(self.transition(token, move |entry| {
                entry.status = QueueStatus::Failed;
                entry.attempts = attempts;
                entry.next_retry_at = None;
                entry.last_error = Some(error);
            }))
        }

        fn fetch_one(&self, id: EntryId) -> StoreFuture<'_, Option<QueueEntry>> {
            Box::pin(async move { Ok(self.state.read().await.entries.get(&id).cloned()) })
        }

        fn list(
            &self,
            statuses: Vec<QueueStatus>,
            limit: i64,
        ) -> StoreFuture<'_, Vec<QueueEntry>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut entries: Vec<_> = state
                    .entries
                    .values()
                    .filter(|entry| statuses.contains(&entry.status))
                    .cloned()
                    .collect();
                entries.sort_by_key(|entry| std::cmp::Reverse((entry.created_at, entry.id)));
                entries.truncate(usize::try_from(limit).unwrap_or(0));
                Ok(entries)
            })
        }

        fn stats(&self) -> StoreFuture<'_, QueueStats> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut stats = QueueStats::default();
                for entry in state.entries.values() {
                    match entry.status {
                        QueueStatus::Pending | QueueStatus::InFlight => stats.pending += 1,
                        QueueStatus::Failed => stats.failed += 1,
                        QueueStatus::Processed => {},
                    }
                }
                Ok(stats)
            })
        }
    }

}

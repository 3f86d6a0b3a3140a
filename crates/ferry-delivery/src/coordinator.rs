//! Send-or-enqueue on first attempt, drain-and-resend on retries.
//!
//! The coordinator owns the delivery state machine:
//!
//! ```text
//! NotQueued ──attempt_immediate──▶ Delivered
//!     │
//!     └─failure──▶ Pending ──drain / retry_one──▶ InFlight ──▶ Processed
//!                     ▲                              │
//!                     └────────retry scheduled───────┤
//!                                                    └──▶ Failed
//! ```
//!
//! Every queued attempt goes through the same claim, send and settle
//! sequence whether it was started by a drain or by an operator, so the
//! backoff bookkeeping is identical on both paths.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ferry_core::{
    events::{DeliveryEvent, DeliveryListener, NoOpListener},
    models::{ClaimResult, EntryId, OutboundEvent, QueueEntry, QueueStats, QueueStatus},
    time::{Clock, RealClock},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryOutcome, DeliveryRequest},
    error::{DeliveryError, ErrorCategory, Result},
    retry::{BackoffPolicy, RetryDecision},
    signing::SignedBody,
    storage::QueueStore,
    target::WebhookTarget,
};

/// Limits applied to queue processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Maximum entries claimed by one drain.
    pub drain_limit: i64,

    /// Wall-clock budget of one drain; unattempted claims are released once
    /// it is spent.
    pub drain_budget: Duration,

    /// How long a claim is honored before the entry can be reclaimed. Each
    /// claim is renewed right before its entry is sent.
    pub claim_lease: Duration,
}

impl CoordinatorConfig {
    /// Checks that claims outlive the work done under them.
    ///
    /// The lease must exceed the drain budget plus one delivery timeout, so
    /// an entry claimed at the start of a drain is still held when the last
    /// send of that drain returns.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when a limit is zero or the lease is too
    /// short.
    pub fn validate(&self, delivery_timeout: Duration) -> Result<()> {
        if self.drain_limit < 1 {
            return Err(DeliveryError::configuration("drain_limit must be at least 1"));
        }
        if self.drain_budget.is_zero() {
            return Err(DeliveryError::configuration("drain_budget must be greater than 0"));
        }
        if self.claim_lease.is_zero() {
            return Err(DeliveryError::configuration("claim_lease must be greater than 0"));
        }

        let minimum = self.drain_budget.saturating_add(delivery_timeout);
        if self.claim_lease <= minimum {
            return Err(DeliveryError::configuration(format!(
                "claim_lease ({}s) must exceed drain_budget plus delivery timeout ({}s)",
                self.claim_lease.as_secs(),
                minimum.as_secs()
            )));
        }

        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            drain_limit: crate::DEFAULT_DRAIN_LIMIT,
            drain_budget: Duration::from_secs(5 * 60),
            claim_lease: Duration::from_secs(6 * 60),
        }
    }
}

/// What happened to an event handed to [`DeliveryCoordinator::attempt_immediate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Target not configured; the event was dropped.
    NotConfigured,

    /// Receiver confirmed the event; nothing was persisted.
    Delivered {
        /// HTTP status returned by the receiver.
        status_code: u16,
        /// Raw response body.
        response_body: String,
    },

    /// Delivery failed and the event was queued for retry.
    Queued {
        /// New queue entry.
        entry_id: EntryId,
        /// First eligible retry time.
        next_retry_at: DateTime<Utc>,
        /// Why the immediate attempt failed.
        reason: String,
    },
}

/// Counts produced by one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries claimed for this drain.
    pub claimed: usize,
    /// Entries that transitioned to `Processed`.
    pub processed: usize,
    /// Entries that failed and were rescheduled.
    pub rescheduled: usize,
    /// Entries that failed for the last time.
    pub exhausted: usize,
    /// Claimed entries returned to pending unattempted.
    pub released: usize,
    /// Entries whose attempt or settlement hit a storage error; they become
    /// reclaimable once their lease expires.
    pub errors: usize,
}

/// Result of an operator-initiated retry of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// Target not configured; nothing was attempted.
    NotConfigured,

    /// The entry was delivered and is now processed.
    Delivered {
        /// Raw response body.
        response_body: String,
    },

    /// Delivery failed; the entry is pending again.
    RetryScheduled {
        /// Attempts taken so far.
        attempts: i32,
        /// Next eligible retry time.
        next_retry_at: DateTime<Utc>,
    },

    /// Delivery failed and the retry budget is spent; the entry is failed.
    Exhausted {
        /// Attempts taken so far.
        attempts: i32,
    },

    /// The entry had already been delivered.
    AlreadyProcessed,

    /// Another drain or retry currently holds the entry.
    Busy,
}

/// How a claimed entry was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Processed { response_body: String },
    Rescheduled { attempts: i32, next_retry_at: DateTime<Utc> },
    Exhausted { attempts: i32 },
    /// The claim expired and was taken over before we could settle.
    Superseded,
}

/// Orchestrates immediate deliveries and queued retries.
pub struct DeliveryCoordinator {
    store: Arc<dyn QueueStore>,
    client: DeliveryClient,
    policy: BackoffPolicy,
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn DeliveryListener>,
    cancellation_token: CancellationToken,
}

impl DeliveryCoordinator {
    /// Creates a coordinator with default policy, limits, real clock and no
    /// listener.
    pub fn new(store: Arc<dyn QueueStore>, client: DeliveryClient) -> Self {
        Self {
            store,
            client,
            policy: BackoffPolicy::default(),
            config: CoordinatorConfig::default(),
            clock: Arc::new(RealClock::new()),
            listener: Arc::new(NoOpListener),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets drain limits and the claim lease. See
    /// [`CoordinatorConfig::validate`] for the constraints between them.
    #[must_use]
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock used for every timestamp and budget.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the lifecycle event listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn DeliveryListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Sets the token that cuts running drains short.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Returns the backoff policy.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Returns the drain limits.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Signs and sends `event`; queues it for retry if delivery fails.
    ///
    /// Transport failures and rejections never surface as errors: the caller
    /// learns whether the event was delivered or queued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent` when the event cannot be serialized and
    /// `PersistenceError` when delivery failed and the event could not be
    /// queued either. In the latter case the serialized body is logged for
    /// manual recovery.
    pub async fn attempt_immediate(
        &self,
        event: &OutboundEvent,
        target: &WebhookTarget,
    ) -> Result<DispatchOutcome> {
        if !target.is_configured() {
            warn!(
                trigger_code = %event.trigger_code,
                category = %ErrorCategory::ConfigurationMissing,
                "webhook target not configured, event dropped"
            );
            return Ok(DispatchOutcome::NotConfigured);
        }

        let body = event.to_bytes()?;
        let request = signed_request(target, body.clone(), None, 0)?;

        match self.client.send(&request).await {
            DeliveryOutcome::Success(response) => {
                debug!(trigger_code = %event.trigger_code, "event delivered immediately");
                self.emit(DeliveryEvent::Delivered {
                    entry_id: None,
                    trigger_code: event.trigger_code.clone(),
                    status_code: response.status_code,
                    attempts: 0,
                    delivered_at: self.clock.now_utc(),
                })
                .await;

                Ok(DispatchOutcome::Delivered {
                    status_code: response.status_code,
                    response_body: response.body,
                })
            },
            DeliveryOutcome::Failure(failure) => {
                self.enqueue_failed(&event.trigger_code, body, failure).await
            },
        }
    }

    async fn enqueue_failed(
        &self,
        trigger_code: &str,
        body: Bytes,
        failure: DeliveryError,
    ) -> Result<DispatchOutcome> {
        let now = self.clock.now_utc();
        let next_retry_at = self.policy.first_retry_at(now);

        match self.store.enqueue(trigger_code, body.clone(), now, next_retry_at).await {
            Ok(entry_id) => {
                info!(
                    %entry_id,
                    trigger_code,
                    %next_retry_at,
                    category = %ErrorCategory::from(&failure),
                    error = %failure,
                    "delivery failed, event queued for retry"
                );
                self.emit(DeliveryEvent::Queued {
                    entry_id,
                    trigger_code: trigger_code.to_string(),
                    next_retry_at,
                    error: failure.to_string(),
                })
                .await;

                Ok(DispatchOutcome::Queued { entry_id, next_retry_at, reason: failure.to_string() })
            },
            Err(store_error) => {
                let payload = String::from_utf8_lossy(&body).into_owned();
                error!(
                    trigger_code,
                    payload = %payload,
                    category = %ErrorCategory::PersistenceFailure,
                    delivery_error = %failure,
                    error = %store_error,
                    "delivery failed and event could not be queued, manual recovery required"
                );
                self.emit(DeliveryEvent::PersistenceFailed {
                    trigger_code: trigger_code.to_string(),
                    payload,
                    error: store_error.to_string(),
                    failed_at: now,
                })
                .await;

                Err(DeliveryError::persistence(store_error.to_string()))
            },
        }
    }

    /// Attempts every entry eligible at `now`, oldest first, up to `limit`.
    ///
    /// Entries are claimed before they are sent, so concurrent drains and
    /// manual retries never deliver the same entry twice. When the drain
    /// budget is spent or cancellation is requested, claimed entries that
    /// were not attempted yet are released untouched.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the claim itself fails. Storage errors
    /// while settling single entries are logged and counted instead.
    pub async fn drain(
        &self,
        target: &WebhookTarget,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        if !target.is_configured() {
            debug!(
                category = %ErrorCategory::ConfigurationMissing,
                "drain skipped, target not configured"
            );
            return Ok(report);
        }

        let started = self.clock.now();
        let lease = to_chrono(self.config.claim_lease);
        let entries =
            self.store.claim_eligible(now, self.policy.max_attempts, limit, lease).await?;

        if entries.is_empty() {
            debug!("no queued entries eligible");
            return Ok(report);
        }

        report.claimed = entries.len();
        debug!(claimed = report.claimed, "draining retry queue");

        let mut entries = entries.into_iter();
        while let Some(entry) = entries.next() {
            if self.should_stop(started) {
                let unattempted: Vec<_> = std::iter::once(entry).chain(entries.by_ref()).collect();
                report.released = self.release_all(&unattempted).await;
                warn!(
                    released = report.released,
                    cancelled = self.cancellation_token.is_cancelled(),
                    "drain stopped early, unattempted entries released"
                );
                break;
            }

            match self.attempt_claimed(&entry, target).await {
                Ok(Settlement::Processed { .. }) => report.processed += 1,
                Ok(Settlement::Rescheduled { .. }) => report.rescheduled += 1,
                Ok(Settlement::Exhausted { .. }) => report.exhausted += 1,
                Ok(Settlement::Superseded) => {},
                Err(e) => {
                    report.errors += 1;
                    error!(entry_id = %entry.id, error = %e, "failed to settle queued entry");
                },
            }
        }

        info!(
            processed = report.processed,
            rescheduled = report.rescheduled,
            exhausted = report.exhausted,
            released = report.released,
            errors = report.errors,
            "drain completed"
        );

        Ok(report)
    }

    /// Drains with the current time and the configured limit.
    ///
    /// # Errors
    ///
    /// See [`DeliveryCoordinator::drain`].
    pub async fn drain_due(&self, target: &WebhookTarget) -> Result<DrainReport> {
        self.drain(target, self.clock.now_utc(), self.config.drain_limit).await
    }

    /// Drains now and returns how many entries were processed.
    ///
    /// # Errors
    ///
    /// See [`DeliveryCoordinator::drain`].
    pub async fn drain_now(&self, target: &WebhookTarget) -> Result<usize> {
        self.drain_due(target).await.map(|report| report.processed)
    }

    /// Attempts one entry immediately, regardless of its retry window.
    ///
    /// Pending and failed entries can be retried. A failure applies exactly
    /// the same attempt and backoff bookkeeping as a drain.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `PersistenceError` when the
    /// store fails.
    pub async fn retry_one(&self, id: EntryId, target: &WebhookTarget) -> Result<RetryOutcome> {
        if !target.is_configured() {
            warn!(
                entry_id = %id,
                category = %ErrorCategory::ConfigurationMissing,
                "retry skipped, target not configured"
            );
            return Ok(RetryOutcome::NotConfigured);
        }

        let now = self.clock.now_utc();
        let lease = to_chrono(self.config.claim_lease);
        let entry = match self.store.claim_one(id, now, lease).await? {
            ClaimResult::Claimed(entry) => entry,
            ClaimResult::Busy => return Ok(RetryOutcome::Busy),
            ClaimResult::AlreadyProcessed => return Ok(RetryOutcome::AlreadyProcessed),
            ClaimResult::NotFound => return Err(DeliveryError::not_found(id)),
        };

        info!(entry_id = %id, attempts = entry.attempts, status = %entry.status, "manual retry");

        Ok(match self.attempt_claimed(&entry, target).await? {
            Settlement::Processed { response_body } => RetryOutcome::Delivered { response_body },
            Settlement::Rescheduled { attempts, next_retry_at } => {
                RetryOutcome::RetryScheduled { attempts, next_retry_at }
            },
            Settlement::Exhausted { attempts } => RetryOutcome::Exhausted { attempts },
            Settlement::Superseded => RetryOutcome::Busy,
        })
    }

    /// Current pending and failed counts, read from the store.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when the store fails.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(self.store.stats().await?)
    }

    /// Entries in `statuses`, newest first, for display.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when the store fails.
    pub async fn list_queue(
        &self,
        statuses: &[QueueStatus],
        limit: i64,
    ) -> Result<Vec<QueueEntry>> {
        Ok(self.store.list(statuses.to_vec(), limit).await?)
    }

    /// Entries a drain at `now` would pick up, without claiming them.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` when the store fails.
    pub async fn eligible(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueEntry>> {
        Ok(self.store.fetch_eligible(now, self.policy.max_attempts, limit).await?)
    }

    /// Sends a claimed entry and settles it.
    async fn attempt_claimed(
        &self,
        entry: &QueueEntry,
        target: &WebhookTarget,
    ) -> Result<Settlement> {
        let claimed = entry.claim_token().ok_or_else(|| {
            DeliveryError::persistence(format!("entry {} is not claimed", entry.id))
        })?;

        // A claim that went stale while earlier entries were sent may already
        // belong to another drain; only a successful renewal allows the send.
        let Some(token) = self.store.renew_claim(claimed, self.clock.now_utc()).await? else {
            warn!(entry_id = %entry.id, "claim lost before send, entry skipped");
            return Ok(Settlement::Superseded);
        };
        let attempt = entry.attempts.saturating_add(1);
        let request = signed_request(target, entry.body(), Some(entry.id), attempt)?;

        match self.client.send(&request).await {
            DeliveryOutcome::Success(response) => {
                let processed_at = self.clock.now_utc();
                if !self.store.mark_processed(token, attempt, processed_at).await? {
                    warn!(entry_id = %entry.id, "claim superseded before settlement");
                    return Ok(Settlement::Superseded);
                }

                self.emit(DeliveryEvent::Delivered {
                    entry_id: Some(entry.id),
                    trigger_code: entry.trigger_code.clone(),
                    status_code: response.status_code,
                    attempts: attempt,
                    delivered_at: processed_at,
                })
                .await;

                Ok(Settlement::Processed { response_body: response.body })
            },
            DeliveryOutcome::Failure(failure) => {
                let failed_at = self.clock.now_utc();
                let reason = failure.to_string();

                match self.policy.next_state(entry.attempts, failed_at) {
                    RetryDecision::Retry { attempts, next_retry_at } => {
                        let applied = self
                            .store
                            .mark_retry_scheduled(token, attempts, next_retry_at, reason.clone())
                            .await?;
                        if !applied {
                            warn!(entry_id = %entry.id, "claim superseded before settlement");
                            return Ok(Settlement::Superseded);
                        }

                        info!(
                            entry_id = %entry.id,
                            attempts,
                            %next_retry_at,
                            category = %ErrorCategory::from(&failure),
                            error = %failure,
                            "queued delivery failed, retry scheduled"
                        );
                        self.emit(DeliveryEvent::RetryScheduled {
                            entry_id: entry.id,
                            attempts,
                            next_retry_at,
                            error: reason,
                        })
                        .await;

                        Ok(Settlement::Rescheduled { attempts, next_retry_at })
                    },
                    RetryDecision::GiveUp { attempts } => {
                        if !self.store.mark_failed(token, attempts, reason.clone()).await? {
                            warn!(entry_id = %entry.id, "claim superseded before settlement");
                            return Ok(Settlement::Superseded);
                        }

                        error!(
                            entry_id = %entry.id,
                            trigger_code = %entry.trigger_code,
                            category = %ErrorCategory::ExhaustedRetries,
                            error = %DeliveryError::retries_exhausted(attempts),
                            last_error = %failure,
                            "queued delivery failed for the last time, operator action required"
                        );
                        self.emit(DeliveryEvent::Exhausted {
                            entry_id: entry.id,
                            attempts,
                            error: reason,
                        })
                        .await;

                        Ok(Settlement::Exhausted { attempts })
                    },
                }
            },
        }
    }

    fn should_stop(&self, started: std::time::Instant) -> bool {
        self.cancellation_token.is_cancelled()
            || self.clock.now().duration_since(started) >= self.config.drain_budget
    }

    async fn release_all(&self, entries: &[QueueEntry]) -> usize {
        let mut released = 0;
        for token in entries.iter().filter_map(QueueEntry::claim_token) {
            match self.store.release(token).await {
                Ok(true) => released += 1,
                Ok(false) => {},
                Err(e) => warn!(entry_id = %token.id, error = %e, "failed to release claim"),
            }
        }
        released
    }

    async fn emit(&self, event: DeliveryEvent) {
        debug!(event = event.kind(), "publishing delivery event");
        self.listener.on_event(event).await;
    }
}

fn signed_request(
    target: &WebhookTarget,
    body: Bytes,
    entry_id: Option<EntryId>,
    attempt: i32,
) -> Result<DeliveryRequest> {
    let body = SignedBody::new(&target.api_secret, body)
        .map_err(|e| DeliveryError::configuration(e.to_string()))?;

    Ok(DeliveryRequest {
        url: target.webhook_url.clone(),
        organization_id: target.organization_id.clone(),
        body,
        entry_id,
        attempt,
    })
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

//! Reliable webhook delivery with a durable retry queue.
//!
//! Business events are signed with HMAC-SHA256 and POSTed to a single
//! configured receiver. When the receiver cannot be reached or rejects the
//! event, the exact serialized body is persisted and retried later with
//! exponential backoff until it is confirmed or the retry budget is spent.
//!
//! # Architecture
//!
//! 1. **Immediate attempt** - [`DeliveryCoordinator::attempt_immediate`]
//!    sends once and queues on failure
//! 2. **Claim** - drains and manual retries claim entries before sending, so
//!    concurrent drains never deliver an entry twice
//! 3. **Settle** - success marks the entry processed; failure reschedules it
//!    or marks it failed once attempts are exhausted
//! 4. **Schedule** - [`DrainScheduler`] drains on a fixed interval
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferry_core::{models::OutboundEvent, storage::Storage};
//! use ferry_delivery::{
//!     DeliveryClient, DeliveryCoordinator, DeliveryError, PostgresQueueStore, WebhookTarget,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), DeliveryError> {
//! let store = Arc::new(PostgresQueueStore::new(Arc::new(Storage::new(pool))));
//! let coordinator = DeliveryCoordinator::new(store, DeliveryClient::with_defaults()?);
//! let target = WebhookTarget::new("https://receiver.example/hook", "secret", "org-1");
//!
//! let event = OutboundEvent::new("BILL_VALIDATE", serde_json::json!({ "ref": "FA2403-0001" }));
//! coordinator.attempt_immediate(&event, &target).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod client;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod retry;
pub mod scheduler;
pub mod signing;
pub mod stats;
pub mod storage;
pub mod target;

pub use client::{ClientConfig, DeliveryClient, DeliveryOutcome, DeliveryRequest, DeliveryResponse};
pub use coordinator::{
    CoordinatorConfig, DeliveryCoordinator, DispatchOutcome, DrainReport, RetryOutcome,
};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use host::{
    EventHandler, HandlerOutcome, HostEvent, ModuleLifecycle, ObservabilityWidget,
    PostgresLifecycle, QueueStatusWidget, TargetSource, WebhookEventHandler,
};
pub use retry::{BackoffPolicy, RetryDecision};
pub use scheduler::DrainScheduler;
pub use signing::{SignatureError, SignedBody};
pub use stats::{render_status, Severity, StatsReporter, StatusLine};
pub use storage::{memory::InMemoryQueueStore, PostgresQueueStore, QueueStore};
pub use target::WebhookTarget;

/// Default maximum entries attempted by one drain.
pub const DEFAULT_DRAIN_LIMIT: i64 = 50;

/// Default attempt budget of a queued entry.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// Default delay before the first retry, in seconds.
pub const DEFAULT_BASE_DELAY_SECONDS: u64 = 15 * 60;

/// Exponent at which the backoff stops growing.
pub const DEFAULT_CAP_EXPONENT: u32 = 6;

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Default total request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Default number of entries returned by queue listings.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Default pause between scheduled drains.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(15 * 60);

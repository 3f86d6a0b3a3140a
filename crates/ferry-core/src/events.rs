//! Delivery lifecycle events and listeners.
//!
//! The coordinator publishes a [`DeliveryEvent`] for every outcome that an
//! operator may need to see: immediate deliveries, newly queued entries,
//! scheduled retries, exhausted entries and, most importantly, events that
//! could not be persisted at all.
//!
//! ```text
//! ┌─────────────────────┐   DeliveryEvent   ┌────────────────────┐
//! │ DeliveryCoordinator │ ─────────────────▶│ MulticastListener  │
//! └─────────────────────┘                   └────────────────────┘
//!                                                     │
//!                                                     ▼
//!                                           alerting, audit, tests
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EntryId;

/// Events emitted by the delivery coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// Event delivered, either immediately or from the queue.
    Delivered {
        /// Queue entry, absent for an immediate delivery.
        entry_id: Option<EntryId>,
        /// Trigger code of the delivered event.
        trigger_code: String,
        /// HTTP status returned by the receiver.
        status_code: u16,
        /// Queue attempts including this one; zero for an immediate delivery.
        attempts: i32,
        /// When the receiver confirmed the event.
        delivered_at: DateTime<Utc>,
    },

    /// Immediate delivery failed and the event was durably queued.
    Queued {
        /// New queue entry.
        entry_id: EntryId,
        /// Trigger code of the queued event.
        trigger_code: String,
        /// First eligible retry time.
        next_retry_at: DateTime<Utc>,
        /// Why the immediate attempt failed.
        error: String,
    },

    /// A queued attempt failed and another one was scheduled.
    RetryScheduled {
        /// Queue entry.
        entry_id: EntryId,
        /// Attempts taken so far.
        attempts: i32,
        /// Next eligible retry time.
        next_retry_at: DateTime<Utc>,
        /// Why the attempt failed.
        error: String,
    },

    /// Retry budget exhausted; the entry is now failed.
    Exhausted {
        /// Queue entry.
        entry_id: EntryId,
        /// Attempts taken.
        attempts: i32,
        /// Reason of the last failure.
        error: String,
    },

    /// Immediate delivery failed and the event could not be queued either.
    ///
    /// The serialized body is carried so the event can be recovered by hand.
    PersistenceFailed {
        /// Trigger code of the lost event.
        trigger_code: String,
        /// Serialized body as sent to the receiver.
        payload: String,
        /// Storage error.
        error: String,
        /// When the failure happened.
        failed_at: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    /// Short machine-readable name, used as a log field.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Queued { .. } => "queued",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Exhausted { .. } => "exhausted",
            Self::PersistenceFailed { .. } => "persistence_failed",
        }
    }
}

/// Subscriber side of the delivery event stream.
///
/// Listeners must not block delivery processing, and their failures are
/// never propagated back to the coordinator.
#[async_trait::async_trait]
pub trait DeliveryListener: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn on_event(&self, event: DeliveryEvent);
}

/// Listener that discards every event.
#[derive(Debug, Default)]
pub struct NoOpListener;

#[async_trait::async_trait]
impl DeliveryListener for NoOpListener {
    async fn on_event(&self, _event: DeliveryEvent) {}
}

/// Forwards events to every registered listener concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastListener {
    listeners: Vec<Arc<dyn DeliveryListener>>,
}

impl MulticastListener {
    /// Creates a multicast listener with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add_listener(&mut self, listener: Arc<dyn DeliveryListener>) {
        self.listeners.push(listener);
    }

    /// Returns the number of registered subscribers.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait::async_trait]
impl DeliveryListener for MulticastListener {
    async fn on_event(&self, event: DeliveryEvent) {
        let futures = self.listeners.iter().map(|listener| {
            let event = event.clone();
            async move { listener.on_event(event).await }
        });

        futures::future::join_all(futures).await;
    }
}

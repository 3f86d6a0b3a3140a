//! HTTP request handlers for the operator API.
//!
//! Handlers are grouped by functionality:
//! - `health` - liveness and health checks
//! - `queue` - retry queue inspection, drains and manual retries
//! - `events` - event submission by producers

pub mod events;
pub mod health;
pub mod queue;

pub use events::submit_event;
pub use health::{health_check, liveness_check};
pub use queue::{drain_queue, list_queue, queue_stats, queue_widget, retry_entry};

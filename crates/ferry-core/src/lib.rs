//! Core domain types for the ferry retry queue.
//!
//! Holds the queue entry model, the clock abstraction used for every
//! scheduling decision, delivery lifecycle events, and the PostgreSQL
//! repository that persists not-yet-confirmed events. The delivery and API
//! crates build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{DeliveryEvent, DeliveryListener, MulticastListener, NoOpListener};
pub use models::{
    ClaimResult, ClaimToken, EntryId, OutboundEvent, QueueEntry, QueueStats, QueueStatus,
};
pub use time::{Clock, RealClock, TestClock};

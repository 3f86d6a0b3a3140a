//! Queue domain models and strongly-typed identifiers.
//!
//! Defines the outbound event handed over by producers, the durable queue
//! entry created when an immediate delivery fails, its status machine, and
//! the aggregate counts shown to operators. Includes the database
//! serialization traits needed by the PostgreSQL repository.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed queue entry identifier.
///
/// Wraps a UUID so entry ids cannot be confused with any other identifier
/// flowing through the operator API.
///
/// # Example
///
/// ```
/// use ferry_core::models::EntryId;
/// let id = EntryId::new();
/// println!("Retrying entry: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for EntryId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidInput(format!("invalid entry id '{s}': {e}")))
    }
}

impl sqlx::Type<PgDb> for EntryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EntryId {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EntryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Domain event produced by the host application.
///
/// Serialized exactly once, when the coordinator hands it to the signer. The
/// wire shape is `{"trigger_code": "...", "object": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Business occurrence that produced the event, e.g. `BILL_VALIDATE`.
    pub trigger_code: String,

    /// Business fields copied from the host object.
    #[serde(rename = "object")]
    pub payload: serde_json::Value,
}

impl OutboundEvent {
    /// Creates an event for the given trigger code and payload.
    pub fn new(trigger_code: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { trigger_code: trigger_code.into(), payload }
    }

    /// Rejects events that cannot be traced back to a trigger.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the trigger code is blank.
    pub fn validate(&self) -> Result<()> {
        if self.trigger_code.trim().is_empty() {
            return Err(CoreError::InvalidInput("trigger_code must not be empty".to_string()));
        }
        Ok(())
    }

    /// Serializes the event into the exact bytes that are signed and sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the event fails validation or JSON encoding.
    pub fn to_bytes(&self) -> Result<Bytes> {
        self.validate()?;
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Lifecycle status of a queue entry.
///
/// `Processed` and `Failed` are terminal for automatic processing.
/// `InFlight` marks an entry claimed by a drain or a manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for its next eligible retry time.
    Pending,

    /// Claimed by exactly one caller that is attempting delivery.
    InFlight,

    /// Delivered; never retried again.
    Processed,

    /// Retry budget exhausted; only an operator can act on it.
    Failed,
}

impl QueueStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::InFlight, Self::Processed, Self::Failed];

    /// Database and wire representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Returns true for states no automatic transition leaves.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::InvalidInput(format!("invalid queue status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for QueueStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for QueueStatus {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse::<Self>().map_err(Into::into)
    }
}

/// Durable record of an event whose immediate delivery failed.
///
/// `payload` holds the exact bytes produced at first serialization so every
/// retry transmits, and signs, the same body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    /// Unique identifier for this entry.
    pub id: EntryId,

    /// Trigger code copied from the originating event.
    pub trigger_code: String,

    /// Serialized event body.
    pub payload: Vec<u8>,

    /// Current lifecycle status.
    pub status: QueueStatus,

    /// Delivery attempts taken from the queue. The failed immediate attempt
    /// is not counted.
    pub attempts: i32,

    /// When the immediate attempt failed and the entry was created.
    pub created_at: DateTime<Utc>,

    /// Earliest time the entry is eligible for a drain. Only meaningful
    /// while pending.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Set once, when the entry becomes `Processed`.
    pub processed_at: Option<DateTime<Utc>>,

    /// When the current claim was taken. Only meaningful while in flight.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Reason of the most recent failed attempt.
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// Creates a fresh pending entry with zero attempts.
    pub fn pending(
        trigger_code: impl Into<String>,
        payload: Bytes,
        created_at: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            trigger_code: trigger_code.into(),
            payload: payload.to_vec(),
            status: QueueStatus::Pending,
            attempts: 0,
            created_at,
            next_retry_at: Some(next_retry_at),
            processed_at: None,
            claimed_at: None,
            last_error: None,
        }
    }

    /// Returns the stored body for re-transmission.
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.payload)
    }

    /// Returns the fencing token of the current claim, if in flight.
    pub fn claim_token(&self) -> Option<ClaimToken> {
        match (self.status, self.claimed_at) {
            (QueueStatus::InFlight, Some(claimed_at)) => {
                Some(ClaimToken { id: self.id, claimed_at })
            },
            _ => None,
        }
    }

    /// Returns true when a claim on this entry is older than `lease`.
    pub fn claim_expired(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        self.status == QueueStatus::InFlight
            && self.claimed_at.is_none_or(|claimed_at| claimed_at + lease <= now)
    }

    /// Returns true when a drain at `now` may pick this entry up.
    pub fn is_eligible(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        self.status == QueueStatus::Pending
            && self.attempts < max_attempts
            && self.next_retry_at.is_some_and(|at| at <= now)
    }
}

/// Fencing token for an in-flight entry.
///
/// Settling an entry requires the token of the claim that is being settled,
/// so a caller whose lease expired and was reclaimed elsewhere cannot
/// overwrite the newer claim's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken {
    /// Claimed entry.
    pub id: EntryId,

    /// When the claim was taken.
    pub claimed_at: DateTime<Utc>,
}

/// Outcome of claiming a single entry for a manual retry.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    /// The entry is now in flight for the caller.
    Claimed(QueueEntry),

    /// Another caller holds a live claim on the entry.
    Busy,

    /// The entry was already delivered.
    AlreadyProcessed,

    /// No entry with that id exists.
    NotFound,
}

/// Aggregate counts shown to operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries still awaiting confirmation, including those in flight.
    pub pending: i64,

    /// Entries whose retry budget is exhausted.
    pub failed: i64,
}

impl QueueStats {
    /// Returns true when nothing needs attention.
    pub const fn all_synced(&self) -> bool {
        self.pending == 0 && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    #[test]
    fn outbound_event_uses_object_key() {
        let event = OutboundEvent::new("BILL_VALIDATE", json!({"ref": "FA2401-0001"}));
        let bytes = event.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["trigger_code"], "BILL_VALIDATE");
        assert_eq!(value["object"]["ref"], "FA2401-0001");
    }

    #[test]
    fn blank_trigger_code_is_rejected() {
        let event = OutboundEvent::new("  ", json!({}));
        assert!(matches!(event.to_bytes(), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in QueueStatus::ALL {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("delivered".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::InFlight.is_terminal());
        assert!(QueueStatus::Processed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
    }

    #[test]
    fn pending_entry_eligibility_follows_next_retry_at() {
        let created = Utc::now();
        let entry = QueueEntry::pending(
            "PRODUCT_CREATE",
            Bytes::from_static(b"{}"),
            created,
            created + Duration::minutes(15),
        );

        assert!(!entry.is_eligible(created, 10));
        assert!(entry.is_eligible(created + Duration::minutes(15), 10));

        let exhausted = QueueEntry { attempts: 10, ..entry };
        assert!(!exhausted.is_eligible(created + Duration::hours(1), 10));
    }

    #[test]
    fn claim_expires_after_lease() {
        let now = Utc::now();
        let entry = QueueEntry {
            status: QueueStatus::InFlight,
            claimed_at: Some(now),
            ..QueueEntry::pending("PROPAL_VALIDATE", Bytes::new(), now, now)
        };

        assert!(!entry.claim_expired(now + Duration::seconds(30), Duration::minutes(2)));
        assert!(entry.claim_expired(now + Duration::minutes(2), Duration::minutes(2)));
    }

    #[test]
    fn entry_id_parses_uuid() {
        let id = EntryId::new();
        assert_eq!(id.to_string().parse::<EntryId>().unwrap(), id);
        assert!("not-a-uuid".parse::<EntryId>().is_err());
    }
}

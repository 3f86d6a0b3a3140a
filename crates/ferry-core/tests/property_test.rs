//! Property-based tests for queue entry invariants.
//!
//! Deterministic and in-memory; no database required.

#![allow(clippy::unwrap_used)]

use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ferry_core::{
    models::{OutboundEvent, QueueEntry, QueueStatus},
    time::{Clock, TestClock},
};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

fn proptest_config() -> ProptestConfig {
    ProptestConfig { cases: 64, failure_persistence: None, ..ProptestConfig::default() }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

fn status_strategy() -> impl Strategy<Value = QueueStatus> {
    prop::sample::select(QueueStatus::ALL.to_vec())
}

fn entry_strategy() -> impl Strategy<Value = QueueEntry> {
    (
        status_strategy(),
        0i32..15,
        -600i64..600,
        prop::option::of(-600i64..600),
    )
        .prop_map(|(status, attempts, next_retry, claimed)| {
            let mut entry = QueueEntry::pending(
                "PROPAL_VALIDATE",
                Bytes::from_static(b"{}"),
                base() - Duration::days(1),
                base() + Duration::minutes(next_retry),
            );
            entry.status = status;
            entry.attempts = attempts;
            entry.claimed_at = claimed.map(|minutes| base() + Duration::minutes(minutes));
            entry
        })
}

proptest! {
    #![proptest_config(proptest_config())]

    /// The serialized body carries the trigger code and the untouched object.
    #[test]
    fn serialized_event_preserves_trigger_and_object(
        trigger in "[A-Z][A-Z_]{0,30}",
        reference in "[A-Za-z0-9-]{0,20}",
        amount in any::<i64>(),
    ) {
        let object = serde_json::json!({ "ref": reference, "amount": amount });
        let event = OutboundEvent::new(trigger.clone(), object.clone());

        let body = event.to_bytes().unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&body).unwrap();

        prop_assert_eq!(&decoded["trigger_code"], &serde_json::Value::String(trigger));
        prop_assert_eq!(&decoded["object"], &object);
    }

    /// Only in-flight entries with a claim time carry a fencing token.
    #[test]
    fn claim_token_requires_live_claim(entry in entry_strategy()) {
        let token = entry.claim_token();

        prop_assert_eq!(
            token.is_some(),
            entry.status == QueueStatus::InFlight && entry.claimed_at.is_some()
        );
        if let Some(token) = token {
            prop_assert_eq!(token.id, entry.id);
            prop_assert_eq!(Some(token.claimed_at), entry.claimed_at);
        }
    }

    /// Eligibility needs a pending status, a due retry time and budget left.
    #[test]
    fn eligibility_is_the_conjunction_of_its_rules(
        entry in entry_strategy(),
        max_attempts in 1i32..12,
    ) {
        let expected = entry.status == QueueStatus::Pending
            && entry.attempts < max_attempts
            && entry.next_retry_at.is_some_and(|at| at <= base());

        prop_assert_eq!(entry.is_eligible(base(), max_attempts), expected);
        prop_assert!(!(entry.status.is_terminal() && entry.is_eligible(base(), max_attempts)));
    }

    /// Once a claim has expired it stays expired as time moves forward.
    #[test]
    fn claim_expiry_is_monotonic(entry in entry_strategy(), later in 0i64..600) {
        let lease = Duration::minutes(2);
        if entry.claim_expired(base(), lease) {
            prop_assert!(entry.claim_expired(base() + Duration::minutes(later), lease));
        }
    }

    /// Advancing the test clock moves wall time by exactly the same amount.
    #[test]
    fn test_clock_advances_exactly(steps in prop::collection::vec(0u64..86_400, 1..20)) {
        let clock = TestClock::with_start_time(base());
        let mut expected = base();

        for secs in steps {
            clock.advance(StdDuration::from_secs(secs));
            expected += Duration::seconds(i64::try_from(secs).unwrap());
            prop_assert_eq!(clock.now_utc(), expected);
        }
    }
}

//! Time abstractions for deterministic scheduling.
//!
//! Every retry schedule, eligibility check and claim lease reads time through
//! [`Clock`], so tests can drive a drain across hours of backoff without
//! waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};

/// Clock abstraction for time operations.
///
/// Production code uses `RealClock`, tests inject `TestClock`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time used for persisted timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to tokio::time::sleep, in tests this advances
    /// virtual time immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock for deterministic time control.
///
/// Monotonic and wall-clock time advance together; wall-clock time can also
/// be moved to an arbitrary point with [`TestClock::jump_to`].
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Monotonic time in nanoseconds since creation
    monotonic_ns: Arc<AtomicU64>,
    /// Wall-clock time as microseconds since UNIX epoch
    wall_us: Arc<AtomicI64>,
    /// Base instant for monotonic time calculations
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            wall_us: Arc::new(AtomicI64::new(start.timestamp_micros())),
            base_instant: Instant::now(),
        }
    }

    /// Advances both clocks by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let us = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);

        self.monotonic_ns.fetch_add(ns, Ordering::AcqRel);
        self.wall_us.fetch_add(us, Ordering::AcqRel);
    }

    /// Moves wall-clock time to `time`. Monotonic time only moves forward.
    pub fn jump_to(&self, time: DateTime<Utc>) {
        let target = time.timestamp_micros();
        let current = self.wall_us.load(Ordering::Acquire);

        if target > current {
            self.advance(Duration::from_micros(target.abs_diff(current)));
        } else {
            self.wall_us.store(target, Ordering::Release);
        }
    }

    /// Returns elapsed monotonic time since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let us = self.wall_us.load(Ordering::Acquire);
        Utc.timestamp_micros(us).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

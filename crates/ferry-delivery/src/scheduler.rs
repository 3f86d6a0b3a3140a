//! Periodic retry-queue drain.
//!
//! Mirrors a host cron job: every `interval` the scheduler reads the current
//! target and drains whatever is due. Drains are serialized within one
//! scheduler; concurrent schedulers on other processes are safe because
//! entries are claimed before delivery.

use std::{sync::Arc, time::Duration};

use ferry_core::time::{Clock, RealClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    coordinator::{DeliveryCoordinator, DrainReport},
    error::Result,
    host::TargetSource,
};

/// Pause after a failed drain before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Drains the retry queue on a fixed interval until cancelled.
pub struct DrainScheduler {
    coordinator: Arc<DeliveryCoordinator>,
    targets: Arc<dyn TargetSource>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl DrainScheduler {
    /// Creates a scheduler running every
    /// [`DEFAULT_DRAIN_INTERVAL`](crate::DEFAULT_DRAIN_INTERVAL).
    pub fn new(
        coordinator: Arc<DeliveryCoordinator>,
        targets: Arc<dyn TargetSource>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            targets,
            interval: crate::DEFAULT_DRAIN_INTERVAL,
            clock: Arc::new(RealClock::new()),
            cancellation_token,
        }
    }

    /// Sets the pause between drains.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the clock used for sleeping.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs a single drain against the current target.
    ///
    /// # Errors
    ///
    /// Propagates drain errors.
    pub async fn tick(&self) -> Result<DrainReport> {
        let target = self.targets.target().await;
        self.coordinator.drain_due(&target).await
    }

    /// Drains until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Never fails today; drain errors are logged and retried after a pause.
    pub async fn run(&self) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "drain scheduler starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.tick().await {
                Ok(report) => {
                    debug!(processed = report.processed, claimed = report.claimed, "drain tick");
                    self.interval
                },
                Err(e) => {
                    error!(error = %e, "scheduled drain failed");
                    ERROR_BACKOFF.min(self.interval)
                },
            };

            tokio::select! {
                () = self.clock.sleep(pause) => {},
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("drain scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use ferry_core::{
        models::{QueueEntry, QueueStatus},
        time::TestClock,
    };
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        client::DeliveryClient, storage::memory::InMemoryQueueStore, target::WebhookTarget,
    };

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let store = Arc::new(InMemoryQueueStore::new());
        let coordinator =
            Arc::new(DeliveryCoordinator::new(store, DeliveryClient::with_defaults().unwrap()));
        let token = CancellationToken::new();
        let scheduler =
            DrainScheduler::new(coordinator, Arc::new(WebhookTarget::default()), token.clone());

        let handle = tokio::spawn(async move { scheduler.run().await });
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn tick_drains_due_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(TestClock::with_start_time(start));
        let store = Arc::new(InMemoryQueueStore::new());
        store
            .insert(QueueEntry::pending(
                "BILL_VALIDATE",
                Bytes::from_static(b"{}"),
                start - ChronoDuration::minutes(30),
                start - ChronoDuration::minutes(15),
            ))
            .await;

        let coordinator = Arc::new(
            DeliveryCoordinator::new(store.clone(), DeliveryClient::with_defaults().unwrap())
                .with_clock(clock.clone()),
        );
        let target = WebhookTarget::new(format!("{}/hook", server.uri()), "secret", "");
        let scheduler =
            DrainScheduler::new(coordinator, Arc::new(target), CancellationToken::new())
                .with_clock(clock);

        let report = scheduler.tick().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(store.entries().await[0].status, QueueStatus::Processed);
    }
}

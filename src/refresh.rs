use log::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::FetchError;
use crate::latest::LatestValue;
use crate::telemetry::TelemetryFetcher;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Polls the fetcher at a fixed cadence and publishes every good snapshot.
///
/// A failed cycle keeps whatever was published before; the upstream is retried
/// forever at the same cadence.
pub struct RefreshLoop<F> {
    fetcher: F,
    latest: Arc<LatestValue>,
    interval: Duration,
    failures: u32,
}

impl<F: TelemetryFetcher> RefreshLoop<F> {
    pub fn new(fetcher: F, latest: Arc<LatestValue>, interval: Duration) -> Self {
        Self {
            fetcher,
            latest,
            interval,
            failures: 0,
        }
    }

    /// One fetch, publishing on success.
    pub async fn cycle(&mut self) -> Result<(), FetchError> {
        match self.fetcher.fetch().await {
            Ok(snapshot) => {
                debug!(
                    "publishing snapshot: {:.1} W, {:.0} Wh",
                    snapshot.power_total, snapshot.energy_total
                );
                if !self.latest.is_present() {
                    info!("First telemetry snapshot received");
                }
                self.latest.set(snapshot);
                if self.failures > 0 {
                    info!("Telemetry restored after {} failed cycles", self.failures);
                    self.failures = 0;
                }
                Ok(())
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                error!("{}: {}", e.kind(), e);
                Err(e)
            }
        }
    }

    pub async fn run(mut self) -> Infallible {
        info!("Refreshing telemetry every {} s", self.interval.as_secs());
        loop {
            if self.cycle().await.is_err() {
                // logged in cycle(); the last good snapshot stays published
            }
            sleep(self.interval).await;
        }
    }
}

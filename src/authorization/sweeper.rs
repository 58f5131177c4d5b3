//! Expiry Sweeper
//!
//! Background worker that expires transfer requests whose 24h window lapsed
//! without full authorization. Submissions also expire lazily; the sweep makes
//! sure abandoned requests close even if nobody touches them again.
//!
//! Each tick also deletes expired and cancelled requests once they are older
//! than the configured retention.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::clock::Clock;
use super::engine::AuthorizationEngine;
use super::error::AuthorizationError;
use crate::config::SweepConfig;

pub struct SweepWorker {
    engine: Arc<AuthorizationEngine>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
}

impl SweepWorker {
    pub fn new(engine: Arc<AuthorizationEngine>, clock: Arc<dyn Clock>, config: SweepConfig) -> Self {
        Self {
            engine,
            clock,
            config,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs.max(1))
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.interval().as_secs(),
            batch_size = self.config.batch_size,
            "Starting expiry sweeper"
        );

        let mut ticker = tokio::time::interval(self.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Expiry sweep failed");
            }
            if let Err(e) = self.purge_once().await {
                error!(error = %e, "Closed request purge failed");
            }
        }
    }

    /// Single sweep pass at the clock's current time
    pub async fn sweep_once(&self) -> Result<usize, AuthorizationError> {
        self.engine
            .expire_stale_batch(self.clock.now(), self.config.batch_size)
            .await
    }

    /// Single purge pass for requests closed longer than the retention
    pub async fn purge_once(&self) -> Result<usize, AuthorizationError> {
        self.engine
            .purge_closed_requests(
                self.clock.now() - self.config.purge_after(),
                self.config.batch_size,
            )
            .await
    }
}

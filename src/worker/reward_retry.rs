//! Reward Retry Worker
//!
//! Background service that re-delivers reward grants the ledger did not
//! accept on the first try.
//!
//! Flow:
//! 1. Every `retry_interval_secs`, load up to `batch_size` Pending grants
//!    below `max_attempts` with no delivery in flight, oldest first
//! 2. Claim one attempt per grant (compare-and-set on its attempt counter,
//!    leased for `claim_lease_secs`)
//! 3. Deliver; on failure record the error, abandoning the grant once it
//!    has used all of its attempts

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::RewardConfig;
use crate::error::Result;
use crate::reward::{RetrySummary, RewardDispatcher};

pub struct RewardRetryWorker {
    dispatcher: Arc<RewardDispatcher>,
    config: RewardConfig,
}

impl RewardRetryWorker {
    pub fn new(dispatcher: Arc<RewardDispatcher>, config: RewardConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Run forever
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.retry_interval_secs,
            max_attempts = self.config.max_attempts,
            batch_size = self.config.batch_size,
            claim_lease_secs = self.config.claim_lease_secs,
            "Reward retry worker started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.retry_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Error re-delivering reward grants");
            }
        }
    }

    /// One scan over the pending grants
    pub async fn run_once(&self) -> Result<RetrySummary> {
        let summary = self
            .dispatcher
            .retry_pending(self.config.batch_size)
            .await?;

        if summary.total() == 0 {
            debug!("No pending reward grants");
        } else {
            info!(
                delivered = summary.delivered,
                retrying = summary.retrying,
                abandoned = summary.abandoned,
                skipped = summary.skipped,
                "Reward retry pass finished"
            );
        }
        Ok(summary)
    }
}

pub fn spawn_reward_retry_worker(
    dispatcher: Arc<RewardDispatcher>,
    config: RewardConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let worker = RewardRetryWorker::new(dispatcher, config);
        worker.run().await;
    })
}

//! Queue sweep
//!
//! Each sweep works on a snapshot of the queue taken when it starts; rows
//! queued while it runs wait for the next sweep.

use super::bounce;
use super::remote::Relay;
use super::schedule::{Schedule, ScheduledTask};
use crate::error::Result;
use crate::model::QueuedMessage;
use crate::storage::Store;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub retried: usize,
    pub bounced: usize,
    /// Rows whose bookkeeping failed; they stay queued as they were
    pub errors: usize,
}

pub struct RetryWorker {
    store: Store,
    relay: Arc<dyn Relay>,
    max_retries: u32,
    hostname: String,
}

enum Outcome {
    Delivered,
    Retried,
    Bounced,
}

impl RetryWorker {
    pub fn new(store: Store, relay: Arc<dyn Relay>, max_retries: u32, hostname: impl Into<String>) -> Self {
        Self {
            store,
            relay,
            max_retries,
            hostname: hostname.into(),
        }
    }

    /// Re-attempt every queued row once
    ///
    /// A row that fails again is bounced once this attempt brings its
    /// failures to `max_retries`, so a row never outlives `max_retries`
    /// sweeps. Per-row storage errors are logged and counted; only a failure
    /// to read the queue fails the sweep.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let queue = self.store.get_queue().await?;
        let mut report = SweepReport::default();
        if queue.is_empty() {
            return Ok(report);
        }

        info!("Retrying {} queued messages", queue.len());
        for entry in &queue {
            match self.retry_one(entry).await {
                Ok(Outcome::Delivered) => report.delivered += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Bounced) => report.bounced += 1,
                Err(e) => {
                    error!(queue_id = entry.id, "Queue bookkeeping failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            retried = report.retried,
            bounced = report.bounced,
            errors = report.errors,
            "Queue sweep finished"
        );
        Ok(report)
    }

    async fn retry_one(&self, entry: &QueuedMessage) -> Result<Outcome> {
        let failure = match self.relay.relay(&entry.from, &entry.to, &entry.content).await {
            Ok(()) => {
                self.store.delete_queue(entry.id).await?;
                return Ok(Outcome::Delivered);
            }
            Err(e) => e,
        };

        if entry.retries + 1 < self.max_retries {
            warn!(
                queue_id = entry.id,
                retries = entry.retries + 1,
                "Retry for {} failed: {}",
                entry.to,
                failure
            );
            self.store.increment_retries(entry.id).await?;
            return Ok(Outcome::Retried);
        }

        warn!(
            queue_id = entry.id,
            "Giving up on {} after {} attempts: {}",
            entry.to,
            entry.retries + 1,
            failure
        );
        bounce::deliver(&self.store, &self.hostname, entry).await?;
        Ok(Outcome::Bounced)
    }

    /// Run [`sweep`](Self::sweep) on `schedule` in the background
    pub fn spawn(self: Arc<Self>, schedule: Schedule) -> ScheduledTask {
        ScheduledTask::spawn("queue-sweep", schedule, move || {
            let worker = self.clone();
            async move {
                if let Err(e) = worker.sweep().await {
                    error!("Queue sweep failed: {}", e);
                }
            }
        })
    }
}

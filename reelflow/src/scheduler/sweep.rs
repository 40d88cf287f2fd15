//! Periodic timeout sweep.
//!
//! The pull half of the orchestrator's two event sources: a background loop
//! over entities whose live attempt deadline elapsed, re-invoking `advance`
//! on each. Races against callbacks are settled by the ledger's CAS, so the
//! sweep is safe to run alongside webhook handling.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::StageScheduler;
use crate::utils::now;

/// Background loop driving timeout retries.
pub struct TimeoutSweeper {
    scheduler: Arc<StageScheduler>,
    interval: Duration,
}

impl TimeoutSweeper {
    /// Creates a sweeper ticking at the given interval.
    #[must_use]
    pub fn new(scheduler: Arc<StageScheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Runs one sweep pass immediately.
    pub async fn sweep_once(&self) {
        match self.scheduler.run_due(now()).await {
            Ok(outcomes) => {
                if !outcomes.is_empty() {
                    tracing::debug!(count = outcomes.len(), "timeout sweep advanced entities");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "timeout sweep failed");
            }
        }
    }

    /// Spawns the sweep loop.
    ///
    /// Returns the task handle and a shutdown sender; send `true` to stop
    /// the loop.
    #[must_use]
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        (handle, shutdown_tx)
    }
}

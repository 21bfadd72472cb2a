//! Timer-driven reconcile loop.

use crate::autoscaler::Autoscaler;
use crate::report::ReconcileReport;
use fleet_core::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

/// Runs [`Autoscaler::reconcile`] every `interval` until shutdown.
pub struct ReconcileLoop {
    autoscaler: Autoscaler,
    interval: Duration,
}

impl ReconcileLoop {
    pub fn new(autoscaler: Autoscaler, interval: Duration) -> Self {
        Self {
            autoscaler,
            interval,
        }
    }

    /// Run until `shutdown` carries `true` or its sender is dropped. A tick
    /// in flight when shutdown arrives is abandoned; whatever it left half
    /// done is picked up by the next process's first tick.
    ///
    /// The first tick fires one interval after start. Returns the number of
    /// ticks that ran to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0;

        info!(
            pool_id = %self.autoscaler.config().pool_id,
            interval = ?self.interval,
            "Starting reconcile loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            tokio::select! {
                result = self.autoscaler.reconcile() => {
                    log_tick(&result);
                    completed += 1;
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown requested, abandoning reconcile tick");
                    break;
                }
            }
        }

        info!(ticks = completed, "Reconcile loop stopped");
        completed
    }
}

/// Resolves once shutdown is signalled. A dropped sender counts as shutdown.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn log_tick(result: &Result<ReconcileReport>) {
    match result {
        Ok(report) if report.is_noop() => debug!(tick = report.tick, "Nothing to do"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Reconcile tick failed"),
    }
}

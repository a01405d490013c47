//! Periodic reconciliation driver.
//!
//! Fires [`ReconcileService::try_run`] on a fixed interval. Overlap is
//! already excluded by the run guard, so a slow run simply makes the next
//! tick a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ReconcileService;
use crate::platform::VideoPlatform;

/// Run reconciliation every `interval` until the task is aborted.
pub fn spawn<P: VideoPlatform + 'static>(
    service: Arc<ReconcileService<P>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "scheduler started");

        loop {
            ticker.tick().await;
            match service.try_run().await {
                Ok(Some(report)) => {
                    info!(
                        inserted = report.inserted,
                        updated = report.updated,
                        deleted = report.deleted,
                        "scheduled run complete"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    error!(error = %err, "scheduled run failed");
                }
            }
        }
    })
}

//! Trial sweep scheduler.
//!
//! Drives the periodic maintenance loop: each tick expires due trials and
//! then queues reminders for trials close to their end, so stored states
//! and the reminder queue stay current without an external cron.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time;

use crate::metrics::AppMetrics;
use crate::trial::manager::{ReminderSweep, TrialManager};

/// What one sweep accomplished. Steps that failed are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Option<u64>,
    pub reminders: Option<ReminderSweep>,
}

/// Run the sweep loop.
///
/// Errors from either step are logged and the loop continues. A single
/// failed sweep never stops the scheduler.
///
/// Runs until `Ctrl+C` (SIGINT) is received.
pub async fn run_trial_sweeps(
    manager: Arc<TrialManager>,
    metrics: Option<Arc<AppMetrics>>,
    interval_seconds: u64,
) {
    let mut interval = time::interval(Duration::from_secs(interval_seconds));

    tracing::info!("Trial sweeps started (interval: {}s)", interval_seconds);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_once(&manager, metrics.as_deref()).await;
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping trial sweeps.");
                break;
            }
        }
    }

    tracing::info!("Trial sweeps stopped cleanly");
}

/// Execute a single sweep.
pub async fn sweep_once(manager: &TrialManager, metrics: Option<&AppMetrics>) -> SweepReport {
    if let Some(m) = metrics {
        m.sweeps_total.inc();
    }

    let mut report = SweepReport::default();

    match manager.expire_trials().await {
        Ok(count) => report.expired = Some(count),
        Err(err) => {
            tracing::error!("Trial expiry sweep failed: {}", err);
            if let Some(m) = metrics {
                m.sweep_errors_total.inc();
            }
        }
    }

    match manager.process_expiring_trials().await {
        Ok(sweep) => report.reminders = Some(sweep),
        Err(err) => {
            tracing::error!("Reminder sweep failed: {}", err);
            if let Some(m) = metrics {
                m.sweep_errors_total.inc();
            }
        }
    }

    report
}

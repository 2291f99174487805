//! Trial status resolution.
//!
//! [`TrialResolver::get_trial_status`] is fail-closed: a store failure is
//! reported to the caller exactly like "no trial". The failure is still
//! logged and counted under its own metric outcome.

use std::sync::Arc;

use crate::metrics::{outcome, AppMetrics};
use crate::trial::clock::{Clock, SystemClock};
use crate::trial::store::{StoreResult, TrialStore};
use crate::trial::types::TrialStatus;

pub struct TrialResolver {
    store: Arc<dyn TrialStore>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<AppMetrics>>,
}

impl TrialResolver {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve the status, surfacing store failures.
    pub async fn try_get_trial_status(&self, user_id: &str) -> StoreResult<TrialStatus> {
        let record = self.store.find_current(user_id).await?;
        let now = self.clock.now();
        Ok(match record {
            Some(record) => record.status_at(now),
            None => TrialStatus::none(),
        })
    }

    /// Resolve the status, mapping any failure to [`TrialStatus::none`].
    pub async fn get_trial_status(&self, user_id: &str) -> TrialStatus {
        match self.try_get_trial_status(user_id).await {
            Ok(status) => {
                let label = if !status.has_trial {
                    outcome::NONE
                } else if status.is_expired {
                    outcome::EXPIRED
                } else {
                    outcome::ACTIVE
                };
                self.record(label);
                status
            }
            Err(err) => {
                tracing::warn!(user_id, "Trial lookup failed, denying access: {}", err);
                self.record(outcome::FAILED);
                TrialStatus::none()
            }
        }
    }

    pub async fn has_access(&self, user_id: &str) -> bool {
        self.get_trial_status(user_id).await.has_access()
    }

    fn record(&self, label: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_lookup(label);
        }
    }
}

//! Trial lifecycle operations: start, cancel, convert, expire, and queueing
//! of expiry reminders.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::AppMetrics;
use crate::trial::clock::{Clock, SystemClock};
use crate::trial::store::{ReminderQueue, StoreError, TrialStore};
use crate::trial::types::{
    NewReminder, NewTrial, TrialRecord, TrialState, TrialStats, EXPIRY_REMINDER,
};

/// Default trial length in days.
pub const DEFAULT_TRIAL_DAYS: i64 = 7;

/// Longest accepted trial length in days.
pub const MAX_TRIAL_DAYS: i64 = 3650;

/// Trials ending between 1 and this many days from now get a reminder.
pub const REMINDER_WINDOW_DAYS: i64 = 3;

#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Invalid trial request: {0}")]
    InvalidInput(String),

    #[error("User {user_id} already has an active trial")]
    AlreadyActive { user_id: String },

    #[error("Trial length of {days} days is outside 1..={max}", max = MAX_TRIAL_DAYS)]
    InvalidDuration { days: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one reminder pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSweep {
    /// Active trials found inside the reminder window.
    pub considered: usize,
    /// Reminders newly queued.
    pub scheduled: usize,
}

pub struct TrialManager {
    store: Arc<dyn TrialStore>,
    reminders: Arc<dyn ReminderQueue>,
    clock: Arc<dyn Clock>,
    trial_days: i64,
    metrics: Option<Arc<AppMetrics>>,
}

impl TrialManager {
    pub fn new(store: Arc<dyn TrialStore>, reminders: Arc<dyn ReminderQueue>) -> Self {
        Self {
            store,
            reminders,
            clock: Arc::new(SystemClock),
            trial_days: DEFAULT_TRIAL_DAYS,
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_trial_days(mut self, days: i64) -> Self {
        self.trial_days = days;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start a trial of the configured length beginning now.
    pub async fn start_trial(&self, request: NewTrial) -> Result<TrialRecord, TrialError> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(TrialError::InvalidInput("user_id must not be empty".to_string()));
        }

        if self.store.find_active(user_id).await?.is_some() {
            return Err(TrialError::AlreadyActive {
                user_id: user_id.to_string(),
            });
        }

        let now = self.clock.now();
        let ends_at = (1..=MAX_TRIAL_DAYS)
            .contains(&self.trial_days)
            .then(|| now.checked_add_signed(Duration::days(self.trial_days)))
            .flatten()
            .ok_or(TrialError::InvalidDuration {
                days: self.trial_days,
            })?;

        let record = TrialRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            lead_id: request.lead_id,
            english_level: request.english_level,
            starts_at: now,
            ends_at,
            state: TrialState::Active,
            created_at: now,
            updated_at: now,
        };
        // Concurrent starts can all pass the check above; the store's
        // one-active-trial constraint settles the race.
        self.store.insert(&record).await.map_err(|e| match e {
            StoreError::AlreadyExists { .. } => TrialError::AlreadyActive {
                user_id: record.user_id.clone(),
            },
            other => TrialError::Store(other),
        })?;

        tracing::info!(
            user_id = %record.user_id,
            trial_id = %record.id,
            ends_at = %record.ends_at,
            "Trial started"
        );
        Ok(record)
    }

    /// Cancel the user's active trial. `false` if none was active.
    pub async fn cancel_trial(&self, user_id: &str) -> Result<bool, TrialError> {
        self.close_active(user_id, TrialState::Cancelled).await
    }

    /// Mark the user's active trial as converted to a paid plan.
    pub async fn convert_trial(&self, user_id: &str) -> Result<bool, TrialError> {
        self.close_active(user_id, TrialState::Converted).await
    }

    async fn close_active(&self, user_id: &str, to: TrialState) -> Result<bool, TrialError> {
        let changed = self
            .store
            .transition(user_id, TrialState::Active, to, self.clock.now())
            .await?;
        if changed > 0 {
            tracing::info!(user_id, state = %to, "Trial closed");
        }
        Ok(changed > 0)
    }

    /// Move every due active trial to `expired`. Returns how many changed.
    pub async fn expire_trials(&self) -> Result<u64, TrialError> {
        let expired = self.store.expire_due(self.clock.now()).await?;
        if let Some(metrics) = &self.metrics {
            metrics.trials_expired_total.inc_by(expired as f64);
        }
        tracing::info!("{} trials expired", expired);
        Ok(expired)
    }

    pub async fn stats(&self) -> Result<TrialStats, TrialError> {
        Ok(self.store.stats().await?)
    }

    /// Queue a reminder for each active trial ending within the reminder
    /// window that does not already have one.
    ///
    /// The reminder is scheduled one day before the trial's last day. A
    /// failure on one trial is logged and does not stop the others.
    pub async fn process_expiring_trials(&self) -> Result<ReminderSweep, TrialError> {
        let now = self.clock.now();
        let expiring = self
            .store
            .active_ending_between(
                now + Duration::days(1),
                now + Duration::days(REMINDER_WINDOW_DAYS),
            )
            .await?;

        let mut sweep = ReminderSweep {
            considered: expiring.len(),
            scheduled: 0,
        };

        for trial in expiring {
            let Some(days_remaining) = trial.days_remaining_at(now) else {
                continue;
            };

            match self.queue_reminder(&trial, days_remaining).await {
                Ok(true) => sweep.scheduled += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        trial_id = %trial.id,
                        "Failed to queue expiry reminder: {}",
                        err
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.reminders_queued_total.inc_by(sweep.scheduled as f64);
        }
        tracing::info!(
            "Processed {} expiring trials, {} reminders queued",
            sweep.considered,
            sweep.scheduled
        );
        Ok(sweep)
    }

    async fn queue_reminder(
        &self,
        trial: &TrialRecord,
        days_remaining: u32,
    ) -> Result<bool, StoreError> {
        if self.reminders.has_reminder(&trial.id, EXPIRY_REMINDER).await? {
            return Ok(false);
        }

        let reminder = NewReminder {
            trial_id: trial.id.clone(),
            user_id: trial.user_id.clone(),
            lead_id: trial.lead_id.clone(),
            kind: EXPIRY_REMINDER.to_string(),
            scheduled_for: self.clock.now() + Duration::days(i64::from(days_remaining) - 1),
        };
        self.reminders.enqueue(&reminder).await?;
        Ok(true)
    }
}

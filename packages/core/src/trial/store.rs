//! Trial record store interface
//!
//! Keeps the resolver and lifecycle manager independent of the backing
//! database. [`crate::repository::TrialRepository`] is the SQLite
//! implementation; tests substitute in-memory doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::trial::types::{NewReminder, TrialRecord, TrialState, TrialStats};

/// Errors raised by a trial store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed trial record field '{field}': {message}")]
    Malformed { field: &'static str, message: String },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// A write was refused by a uniqueness constraint.
    #[error("Record already exists: {message}")]
    AlreadyExists { message: String },
}

impl StoreError {
    pub fn malformed(field: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed { field, message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed access to trial records.
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// The latest-ending record for `user_id` that is `active` or `expired`.
    async fn find_current(&self, user_id: &str) -> StoreResult<Option<TrialRecord>>;

    /// The latest-ending `active` record for `user_id`.
    async fn find_active(&self, user_id: &str) -> StoreResult<Option<TrialRecord>>;

    /// Insert a new record. Fails with [`StoreError::AlreadyExists`] when the
    /// user already has an active trial.
    async fn insert(&self, record: &TrialRecord) -> StoreResult<()>;

    /// Move every `from` record of `user_id` to `to`. Returns the number of
    /// records changed.
    async fn transition(
        &self,
        user_id: &str,
        from: TrialState,
        to: TrialState,
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Mark all active trials ending at or before `now` as expired.
    async fn expire_due(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn stats(&self) -> StoreResult<TrialStats>;

    /// Active trials with `from <= ends_at <= to`, soonest first.
    async fn active_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<TrialRecord>>;
}

/// Outgoing reminder queue.
#[async_trait]
pub trait ReminderQueue: Send + Sync {
    /// `true` when a reminder of `kind` was already queued for the trial.
    async fn has_reminder(&self, trial_id: &str, kind: &str) -> StoreResult<bool>;

    async fn enqueue(&self, reminder: &NewReminder) -> StoreResult<()>;
}

//! Core trial types.
//!
//! [`TrialRecord`] is what the store holds; [`TrialStatus`] is what callers
//! see. A status is always derived from a record and the current time and
//! is never persisted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Milliseconds in one day, used for the whole-day rounding of remaining time.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Lifecycle state of a stored trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Active,
    Expired,
    Cancelled,
    Converted,
}

impl TrialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialState::Active => "active",
            TrialState::Expired => "expired",
            TrialState::Cancelled => "cancelled",
            TrialState::Converted => "converted",
        }
    }

    /// `true` for states that still count as "the user has a trial".
    pub fn is_current(&self) -> bool {
        matches!(self, TrialState::Active | TrialState::Expired)
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown trial state '{0}'")]
pub struct UnknownTrialState(pub String);

impl FromStr for TrialState {
    type Err = UnknownTrialState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TrialState::Active),
            "expired" => Ok(TrialState::Expired),
            "cancelled" => Ok(TrialState::Cancelled),
            "converted" => Ok(TrialState::Converted),
            other => Err(UnknownTrialState(other.to_string())),
        }
    }
}

/// A persisted trial grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: String,
    pub user_id: String,
    pub lead_id: Option<String>,
    pub english_level: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub state: TrialState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrialRecord {
    /// Whole days left before `ends_at`, rounded up. `None` once the end
    /// has been reached.
    pub fn days_remaining_at(&self, now: DateTime<Utc>) -> Option<u32> {
        let remaining_ms = (self.ends_at - now).num_milliseconds();
        if remaining_ms <= 0 {
            return None;
        }
        let days = (remaining_ms + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;
        Some(u32::try_from(days).unwrap_or(u32::MAX))
    }

    /// Derive the caller-facing status of this record at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> TrialStatus {
        let details = Some(TrialDetails::from(self));
        match self.days_remaining_at(now) {
            Some(days_remaining) => TrialStatus {
                has_trial: true,
                is_expired: false,
                days_remaining,
                trial: details,
            },
            None => TrialStatus {
                has_trial: true,
                is_expired: true,
                days_remaining: 0,
                trial: details,
            },
        }
    }
}

/// Input for starting a trial. Duration comes from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTrial {
    pub user_id: String,
    pub lead_id: Option<String>,
    pub english_level: Option<String>,
}

/// Record details echoed back with a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialDetails {
    pub id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub state: TrialState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub english_level: Option<String>,
}

impl From<&TrialRecord> for TrialDetails {
    fn from(record: &TrialRecord) -> Self {
        Self {
            id: record.id.clone(),
            starts_at: record.starts_at,
            ends_at: record.ends_at,
            state: record.state,
            lead_id: record.lead_id.clone(),
            english_level: record.english_level.clone(),
        }
    }
}

/// Trial status as seen by a caller.
///
/// Invariants: no trial implies not expired and zero days; expired implies
/// zero days. Use [`TrialStatus::none`] for the fail-closed default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatus {
    pub has_trial: bool,
    pub is_expired: bool,
    pub days_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial: Option<TrialDetails>,
}

impl TrialStatus {
    /// The all-false status: no trial, no access.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_access(&self) -> bool {
        self.has_trial && !self.is_expired
    }
}

/// Counts of trials per lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStats {
    pub total_trials: u64,
    pub active_trials: u64,
    pub expired_trials: u64,
    pub converted_trials: u64,
    pub cancelled_trials: u64,
}

/// Reminder kind queued for trials close to their end.
pub const EXPIRY_REMINDER: &str = "reminder";

/// A notification row to be picked up by whatever delivers reminders.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub trial_id: String,
    pub user_id: String,
    pub lead_id: Option<String>,
    pub kind: String,
    pub scheduled_for: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_ending(ends_at: DateTime<Utc>) -> TrialRecord {
        let starts_at = ends_at - Duration::days(7);
        TrialRecord {
            id: "t1".to_string(),
            user_id: "u1".to_string(),
            lead_id: None,
            english_level: Some("Novice".to_string()),
            starts_at,
            ends_at,
            state: TrialState::Active,
            created_at: starts_at,
            updated_at: starts_at,
        }
    }

    #[test]
    fn trial_state_parses_its_own_labels() {
        for state in [
            TrialState::Active,
            TrialState::Expired,
            TrialState::Cancelled,
            TrialState::Converted,
        ] {
            assert_eq!(state.as_str().parse::<TrialState>(), Ok(state));
        }
    }

    #[test]
    fn trial_state_rejects_unknown_label() {
        assert_eq!(
            "paused".parse::<TrialState>(),
            Err(UnknownTrialState("paused".to_string()))
        );
    }

    #[test]
    fn partial_day_rounds_up() {
        let now = Utc::now();
        let record = record_ending(now + Duration::hours(25));
        assert_eq!(record.days_remaining_at(now), Some(2));
    }

    #[test]
    fn one_millisecond_left_is_one_day() {
        let now = Utc::now();
        let record = record_ending(now + Duration::milliseconds(1));
        assert_eq!(record.days_remaining_at(now), Some(1));
    }

    #[test]
    fn end_equal_to_now_is_expired() {
        let now = Utc::now();
        let status = record_ending(now).status_at(now);
        assert!(status.has_trial);
        assert!(status.is_expired);
        assert_eq!(status.days_remaining, 0);
    }

    #[test]
    fn none_status_has_no_access() {
        let status = TrialStatus::none();
        assert!(!status.has_trial);
        assert!(!status.is_expired);
        assert_eq!(status.days_remaining, 0);
        assert!(!status.has_access());
    }

    #[test]
    fn status_serialises_camel_case_without_empty_details() {
        let json = serde_json::to_value(TrialStatus::none()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "hasTrial": false, "isExpired": false, "daysRemaining": 0 })
        );
    }
}

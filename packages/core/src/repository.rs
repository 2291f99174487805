//! Database repository for trial persistence.
//!
//! All SQLite read/write logic lives here. [`TrialRepository`] implements
//! both [`TrialStore`] (trial records) and [`ReminderQueue`] (the
//! `trial_reminders` table).
//!
//! Timestamps are stored as RFC 3339 strings with millisecond precision and a
//! `Z` suffix. The fixed width keeps `<`/`>` comparisons in SQL correct.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::trial::store::{ReminderQueue, StoreError, StoreResult, TrialStore};
use crate::trial::types::{NewReminder, TrialRecord, TrialState, TrialStats};

const RECORD_COLUMNS: &str =
    "id, user_id, lead_id, english_level, starts_at, ends_at, status, created_at, updated_at";

/// Repository for reading and writing trials to SQLite.
#[derive(Clone)]
pub struct TrialRepository {
    pool: SqlitePool,
}

impl TrialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_db_time(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_db_time(field: &'static str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::malformed(field, format!("'{}': {}", raw, e)))
}

fn record_from_row(row: &SqliteRow) -> StoreResult<TrialRecord> {
    let status: String = row.try_get("status")?;
    let state = status
        .parse::<TrialState>()
        .map_err(|e| StoreError::malformed("status", e.to_string()))?;

    let starts_at: String = row.try_get("starts_at")?;
    let ends_at: String = row.try_get("ends_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(TrialRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        lead_id: row.try_get("lead_id")?,
        english_level: row.try_get("english_level")?,
        starts_at: parse_db_time("starts_at", &starts_at)?,
        ends_at: parse_db_time("ends_at", &ends_at)?,
        state,
        created_at: parse_db_time("created_at", &created_at)?,
        updated_at: parse_db_time("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl TrialStore for TrialRepository {
    async fn find_current(&self, user_id: &str) -> StoreResult<Option<TrialRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trial_access
             WHERE user_id = ? AND status IN ('active', 'expired')
             ORDER BY ends_at DESC
             LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_active(&self, user_id: &str) -> StoreResult<Option<TrialRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trial_access
             WHERE user_id = ? AND status = 'active'
             ORDER BY ends_at DESC
             LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert(&self, record: &TrialRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO trial_access
             (id, user_id, lead_id, english_level, starts_at, ends_at, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.lead_id)
        .bind(&record.english_level)
        .bind(to_db_time(record.starts_at))
        .bind(to_db_time(record.ends_at))
        .bind(record.state.as_str())
        .bind(to_db_time(record.created_at))
        .bind(to_db_time(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists {
                message: format!("active trial for user {}", record.user_id),
            },
            other => StoreError::Database(other),
        })?;

        Ok(())
    }

    async fn transition(
        &self,
        user_id: &str,
        from: TrialState,
        to: TrialState,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE trial_access SET status = ?, updated_at = ?
             WHERE user_id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(to_db_time(at))
        .bind(user_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let now_str = to_db_time(now);

        let result = sqlx::query(
            "UPDATE trial_access SET status = 'expired', updated_at = ?
             WHERE status = 'active' AND ends_at <= ?",
        )
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> StoreResult<TrialStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM trial_access GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = TrialStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count = row.try_get::<i64, _>("n")?.max(0) as u64;
            stats.total_trials += count;
            match status.parse::<TrialState>() {
                Ok(TrialState::Active) => stats.active_trials = count,
                Ok(TrialState::Expired) => stats.expired_trials = count,
                Ok(TrialState::Converted) => stats.converted_trials = count,
                Ok(TrialState::Cancelled) => stats.cancelled_trials = count,
                Err(e) => tracing::warn!("Ignoring trials with {}", e),
            }
        }

        Ok(stats)
    }

    async fn active_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<TrialRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trial_access
             WHERE status = 'active' AND ends_at >= ? AND ends_at <= ?
             ORDER BY ends_at ASC",
            RECORD_COLUMNS
        ))
        .bind(to_db_time(from))
        .bind(to_db_time(to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl ReminderQueue for TrialRepository {
    async fn has_reminder(&self, trial_id: &str, kind: &str) -> StoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trial_reminders WHERE trial_id = ? AND kind = ?",
        )
        .bind(trial_id)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn enqueue(&self, reminder: &NewReminder) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO trial_reminders
             (trial_id, user_id, lead_id, kind, status, scheduled_for, created_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&reminder.trial_id)
        .bind(&reminder.user_id)
        .bind(&reminder.lead_id)
        .bind(&reminder.kind)
        .bind(to_db_time(reminder.scheduled_for))
        .bind(to_db_time(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, Utc};

    use crate::trial::types::{TrialRecord, TrialState};

    pub fn make_trial(
        id: &str,
        user_id: &str,
        ends_at: DateTime<Utc>,
        state: TrialState,
    ) -> TrialRecord {
        let starts_at = ends_at - Duration::days(7);
        TrialRecord {
            id: id.to_string(),
            user_id: user_id.to_string(),
            lead_id: Some(format!("lead-{}", user_id)),
            english_level: Some("Inter".to_string()),
            starts_at,
            ends_at,
            state,
            created_at: starts_at,
            updated_at: starts_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_trial;
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::db::create_pool;
    use crate::trial::types::EXPIRY_REMINDER;

    async fn make_repo() -> TrialRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        TrialRepository::new(pool)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_and_find_current_roundtrip() {
        let repo = make_repo().await;
        let trial = make_trial("t1", "u1", now() + Duration::days(3), TrialState::Active);

        repo.insert(&trial).await.unwrap();

        let found = repo.find_current("u1").await.unwrap();
        assert_eq!(found, Some(trial));
    }

    #[tokio::test]
    async fn find_current_returns_none_for_unknown_user() {
        let repo = make_repo().await;
        assert!(repo.find_current("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_current_skips_cancelled_and_converted() {
        let repo = make_repo().await;
        repo.insert(&make_trial("t1", "u1", now(), TrialState::Cancelled))
            .await
            .unwrap();
        repo.insert(&make_trial("t2", "u1", now(), TrialState::Converted))
            .await
            .unwrap();

        assert!(repo.find_current("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_current_prefers_latest_ending_record() {
        let repo = make_repo().await;
        repo.insert(&make_trial("old", "u1", now() - Duration::days(30), TrialState::Expired))
            .await
            .unwrap();
        repo.insert(&make_trial("new", "u1", now() + Duration::days(2), TrialState::Active))
            .await
            .unwrap();

        let found = repo.find_current("u1").await.unwrap().unwrap();
        assert_eq!(found.id, "new");
    }

    #[tokio::test]
    async fn find_active_ignores_expired() {
        let repo = make_repo().await;
        repo.insert(&make_trial("t1", "u1", now() - Duration::days(1), TrialState::Expired))
            .await
            .unwrap();

        assert!(repo.find_active("u1").await.unwrap().is_none());
        assert!(repo.find_current("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_timestamp_is_reported() {
        let repo = make_repo().await;
        sqlx::query(
            "INSERT INTO trial_access
             (id, user_id, starts_at, ends_at, status, created_at, updated_at)
             VALUES ('bad', 'u1', 'yesterday', 'tomorrow', 'active', 'x', 'x')",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        let err = repo.find_current("u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { field: "starts_at", .. }));
    }

    #[tokio::test]
    async fn second_active_trial_for_user_is_rejected() {
        let repo = make_repo().await;
        repo.insert(&make_trial("t1", "u1", now() + Duration::days(3), TrialState::Active))
            .await
            .unwrap();

        let err = repo
            .insert(&make_trial("t2", "u1", now() + Duration::days(5), TrialState::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        // Closed trials do not count against the limit.
        repo.insert(&make_trial("t3", "u1", now() - Duration::days(9), TrialState::Expired))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transition_moves_only_matching_state() {
        let repo = make_repo().await;
        repo.insert(&make_trial("t1", "u1", now() + Duration::days(3), TrialState::Active))
            .await
            .unwrap();

        let changed = repo
            .transition("u1", TrialState::Active, TrialState::Converted, now())
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let again = repo
            .transition("u1", TrialState::Active, TrialState::Cancelled, now())
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn expire_due_marks_past_and_just_ended_active_trials() {
        let repo = make_repo().await;
        repo.insert(&make_trial("past", "u1", now() - Duration::minutes(1), TrialState::Active))
            .await
            .unwrap();
        repo.insert(&make_trial("future", "u2", now() + Duration::minutes(1), TrialState::Active))
            .await
            .unwrap();
        repo.insert(&make_trial("gone", "u3", now() - Duration::days(3), TrialState::Cancelled))
            .await
            .unwrap();

        repo.insert(&make_trial("edge", "u4", now(), TrialState::Active))
            .await
            .unwrap();

        assert_eq!(repo.expire_due(now()).await.unwrap(), 2);
        assert_eq!(repo.expire_due(now()).await.unwrap(), 0);

        let edge = repo.find_current("u4").await.unwrap().unwrap();
        assert_eq!(edge.state, TrialState::Expired);
        assert!(edge.status_at(now()).is_expired);

        let u1 = repo.find_current("u1").await.unwrap().unwrap();
        assert_eq!(u1.state, TrialState::Expired);
        assert_eq!(u1.updated_at, now());
    }

    #[tokio::test]
    async fn stats_counts_each_state() {
        let repo = make_repo().await;
        let states = [
            TrialState::Active,
            TrialState::Active,
            TrialState::Expired,
            TrialState::Converted,
            TrialState::Cancelled,
        ];
        for (i, state) in states.iter().enumerate() {
            let id = format!("t{}", i);
            let user = format!("u{}", i);
            repo.insert(&make_trial(&id, &user, now(), *state)).await.unwrap();
        }

        let stats = repo.stats().await.unwrap();
        assert_eq!(
            stats,
            TrialStats {
                total_trials: 5,
                active_trials: 2,
                expired_trials: 1,
                converted_trials: 1,
                cancelled_trials: 1,
            }
        );
    }

    #[tokio::test]
    async fn active_ending_between_is_inclusive_and_ordered() {
        let repo = make_repo().await;
        let from = now() + Duration::days(1);
        let to = now() + Duration::days(3);
        repo.insert(&make_trial("late", "u1", to, TrialState::Active)).await.unwrap();
        repo.insert(&make_trial("early", "u2", from, TrialState::Active)).await.unwrap();
        repo.insert(&make_trial("outside", "u3", to + Duration::seconds(1), TrialState::Active))
            .await
            .unwrap();
        repo.insert(&make_trial("expired", "u4", from, TrialState::Expired))
            .await
            .unwrap();

        let ids: Vec<String> = repo
            .active_ending_between(from, to)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["early".to_string(), "late".to_string()]);
    }

    #[tokio::test]
    async fn enqueue_then_has_reminder() {
        let repo = make_repo().await;
        repo.insert(&make_trial("t1", "u1", now() + Duration::days(2), TrialState::Active))
            .await
            .unwrap();

        assert!(!repo.has_reminder("t1", EXPIRY_REMINDER).await.unwrap());

        repo.enqueue(&NewReminder {
            trial_id: "t1".to_string(),
            user_id: "u1".to_string(),
            lead_id: Some("lead-u1".to_string()),
            kind: EXPIRY_REMINDER.to_string(),
            scheduled_for: now() + Duration::days(1),
        })
        .await
        .unwrap();

        assert!(repo.has_reminder("t1", EXPIRY_REMINDER).await.unwrap());
        assert!(!repo.has_reminder("t1", "expiration").await.unwrap());
    }
}

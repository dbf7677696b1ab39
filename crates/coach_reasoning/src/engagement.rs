//! C7 — engagement & effectiveness tracker. Every signal this module
//! reports is recomputed from `engagement_events` rows with a
//! `WHERE timestamp >= ?` range scan, never a running counter held in
//! memory, so the numbers stay correct across a restart. Connection and
//! migration follow the same idiom as the rest of this crate's stores.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use coach_core::{
    CoreResult, DailyCaps, EffectivenessBucket, EngagementLevel, EngagementSnapshot,
    EngagementTracker, InteractionKind, UserId,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};

/// §4.7.1: weights are a fixed constant table, not an operator-tunable
/// config value.
const WEIGHT_LOGIN: f64 = 25.0;
const WEIGHT_RECORD: f64 = 25.0;
const WEIGHT_GOAL: f64 = 25.0;
const WEIGHT_INTERACTION: f64 = 25.0;

const DEFAULT_OPTIMAL_HOURS: [u32; 3] = [9, 13, 19];
const MIN_SAMPLES_FOR_OPTIMAL_HOURS: i64 = 10;

#[derive(Clone)]
pub struct SqliteEngagementTracker {
    pool: Pool<Sqlite>,
    daily_caps: DailyCaps,
}

impl SqliteEngagementTracker {
    pub async fn new(database_url: &str, daily_caps: DailyCaps) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        let tracker = Self { pool, daily_caps };
        tracker.migrate().await?;
        Ok(tracker)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engagement_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                event_kind TEXT NOT NULL,
                notification_type TEXT,
                interaction_kind TEXT,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_engagement_user_time ON engagement_events(user_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert(
        &self,
        user: UserId,
        event_kind: &str,
        notification_type: Option<&str>,
        interaction_kind: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO engagement_events (user_id, event_kind, notification_type, interaction_kind, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.0)
        .bind(event_kind)
        .bind(notification_type)
        .bind(interaction_kind)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        Ok(())
    }

    async fn distinct_days(&self, user: UserId, event_kind: &str, since: DateTime<Utc>) -> CoreResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT date(timestamp, 'unixepoch')) as days FROM engagement_events WHERE user_id = ? AND event_kind = ? AND timestamp >= ?",
        )
        .bind(user.0)
        .bind(event_kind)
        .bind(since.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        Ok(row.get::<i64, _>("days"))
    }

    async fn interaction_counts(
        &self,
        user: UserId,
        since: DateTime<Utc>,
        notification_type: Option<&str>,
    ) -> CoreResult<(i64, i64, i64, i64)> {
        let rows = if let Some(nt) = notification_type {
            sqlx::query(
                "SELECT interaction_kind, COUNT(*) as n FROM engagement_events WHERE user_id = ? AND event_kind = 'interaction' AND notification_type = ? AND timestamp >= ? GROUP BY interaction_kind",
            )
            .bind(user.0)
            .bind(nt)
            .bind(since.timestamp())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT interaction_kind, COUNT(*) as n FROM engagement_events WHERE user_id = ? AND event_kind = 'interaction' AND timestamp >= ? GROUP BY interaction_kind",
            )
            .bind(user.0)
            .bind(since.timestamp())
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        let (mut opens, mut clicks, mut dismisses, mut negatives) = (0i64, 0i64, 0i64, 0i64);
        for row in rows {
            let kind: Option<String> = row.get("interaction_kind");
            let n: i64 = row.get("n");
            match kind.as_deref() {
                Some("open") => opens = n,
                Some("click") => clicks = n,
                Some("dismiss") => dismisses = n,
                Some("negative") => negatives = n,
                _ => {}
            }
        }
        Ok((opens, clicks, dismisses, negatives))
    }

    fn interaction_kind_str(kind: InteractionKind) -> &'static str {
        match kind {
            InteractionKind::Open => "open",
            InteractionKind::Click => "click",
            InteractionKind::Dismiss => "dismiss",
            InteractionKind::Negative => "negative",
        }
    }
}

#[async_trait]
impl EngagementTracker for SqliteEngagementTracker {
    async fn record_login(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        self.insert(user, "login", None, None, now).await
    }

    async fn record_record_created(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        self.insert(user, "record", None, None, now).await
    }

    async fn record_sent(&self, user: UserId, notification_type: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.insert(user, "sent", Some(notification_type), None, now).await
    }

    async fn record_interaction(
        &self,
        user: UserId,
        notification_type: &str,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.insert(user, "interaction", Some(notification_type), Some(Self::interaction_kind_str(kind)), now)
            .await
    }

    async fn engagement_snapshot(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<EngagementSnapshot> {
        let since_7d = now - chrono::Duration::days(7);
        let since_30d = now - chrono::Duration::days(30);

        let login_days = self.distinct_days(user, "login", since_7d).await?;
        let record_days_7d = self.distinct_days(user, "record", since_7d).await?;
        // No dedicated goal-progress store exists in this core; a 30-day
        // record cadence is used as the best available on-track proxy.
        let record_days_30d = self.distinct_days(user, "record", since_30d).await?;

        let (opens, clicks, dismisses, negatives) =
            self.interaction_counts(user, since_7d, None).await?;
        let total_interactions = opens + clicks + dismisses + negatives;

        let login_rate = (login_days as f64 / 7.0).min(1.0);
        let record_rate = (record_days_7d as f64 / 7.0).min(1.0);
        let goal_progress = (record_days_30d as f64 / 30.0).min(1.0);
        let interaction_rate = if total_interactions > 0 {
            ((opens + clicks) as f64 / total_interactions as f64).min(1.0)
        } else {
            0.5
        };

        let score = login_rate * WEIGHT_LOGIN
            + record_rate * WEIGHT_RECORD
            + goal_progress * WEIGHT_GOAL
            + interaction_rate * WEIGHT_INTERACTION;

        let level = if score >= 70.0 {
            EngagementLevel::High
        } else if score >= 40.0 {
            EngagementLevel::Medium
        } else if score >= 15.0 {
            EngagementLevel::Low
        } else {
            EngagementLevel::Inactive
        };

        Ok(EngagementSnapshot { score, level })
    }

    async fn effectiveness(&self, user: UserId, notification_type: &str) -> CoreResult<EffectivenessBucket> {
        let since_30d = Utc::now() - chrono::Duration::days(30);
        let sent_row = sqlx::query(
            "SELECT COUNT(*) as n FROM engagement_events WHERE user_id = ? AND event_kind = 'sent' AND notification_type = ? AND timestamp >= ?",
        )
        .bind(user.0)
        .bind(notification_type)
        .bind(since_30d.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;
        let sent: i64 = sent_row.get("n");

        if sent == 0 {
            return Ok(EffectivenessBucket::Medium);
        }

        let (opens, clicks, _dismisses, negatives) =
            self.interaction_counts(user, since_30d, Some(notification_type)).await?;

        let ratio = (opens as f64 + 2.0 * clicks as f64 - 3.0 * negatives as f64) / sent as f64;

        Ok(if ratio >= 0.6 {
            EffectivenessBucket::High
        } else if ratio >= 0.3 {
            EffectivenessBucket::Medium
        } else if ratio >= 0.1 {
            EffectivenessBucket::Low
        } else {
            EffectivenessBucket::Negative
        })
    }

    async fn optimal_send_hours(&self, user: UserId, notification_type: &str) -> CoreResult<Vec<u8>> {
        let since_90d = Utc::now() - chrono::Duration::days(90);
        let rows = sqlx::query(
            "SELECT timestamp, interaction_kind FROM engagement_events WHERE user_id = ? AND event_kind = 'interaction' AND notification_type = ? AND timestamp >= ?",
        )
        .bind(user.0)
        .bind(notification_type)
        .bind(since_90d.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        if (rows.len() as i64) < MIN_SAMPLES_FOR_OPTIMAL_HOURS {
            return Ok(DEFAULT_OPTIMAL_HOURS.iter().map(|h| *h as u8).collect());
        }

        let mut positive_by_hour: [i64; 24] = [0; 24];
        let mut total_by_hour: [i64; 24] = [0; 24];

        for row in rows {
            let ts: i64 = row.get("timestamp");
            let interaction_kind: Option<String> = row.get("interaction_kind");
            let Some(dt) = DateTime::from_timestamp(ts, 0) else { continue };
            let hour = dt.hour() as usize;
            total_by_hour[hour] += 1;
            if matches!(interaction_kind.as_deref(), Some("open") | Some("click")) {
                positive_by_hour[hour] += 1;
            }
        }

        let mut hours: Vec<(u8, f64)> = (0..24)
            .filter(|h| total_by_hour[*h] > 0)
            .map(|h| (h as u8, positive_by_hour[h] as f64 / total_by_hour[h] as f64))
            .collect();
        hours.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hours.truncate(3);

        if hours.is_empty() {
            return Ok(DEFAULT_OPTIMAL_HOURS.iter().map(|h| *h as u8).collect());
        }

        Ok(hours.into_iter().map(|(h, _)| h).collect())
    }

    async fn last_sent_at(&self, user: UserId, notification_type: &str) -> CoreResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MAX(timestamp) as ts FROM engagement_events WHERE user_id = ? AND event_kind = 'sent' AND notification_type = ?",
        )
        .bind(user.0)
        .bind(notification_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        let ts: Option<i64> = row.get("ts");
        Ok(ts.and_then(|t| DateTime::from_timestamp(t, 0)))
    }

    async fn remaining_daily_budget(&self, user: UserId, level: EngagementLevel, now: DateTime<Utc>) -> CoreResult<u32> {
        let day_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM engagement_events WHERE user_id = ? AND event_kind = 'sent' AND timestamp >= ?",
        )
        .bind(user.0)
        .bind(day_start.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;
        let sent_today: i64 = row.get("n");

        let cap = match level {
            EngagementLevel::High => self.daily_caps.high,
            EngagementLevel::Medium => self.daily_caps.medium,
            EngagementLevel::Low => self.daily_caps.low,
            EngagementLevel::Inactive => self.daily_caps.low,
        };

        Ok((cap as i64 - sent_today).max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> (tempfile::TempDir, SqliteEngagementTracker) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/engagement.db?mode=rwc", dir.path().display());
        let caps = DailyCaps { high: 6, medium: 4, low: 2 };
        let tracker = SqliteEngagementTracker::new(&url, caps).await.unwrap();
        (dir, tracker)
    }

    #[tokio::test]
    async fn snapshot_reflects_daily_logins_and_records() {
        let (_dir, tracker) = tracker().await;
        let now = Utc::now();
        for day in 0..7 {
            let ts = now - chrono::Duration::days(day);
            tracker.record_login(UserId(1), ts).await.unwrap();
            tracker.record_record_created(UserId(1), ts).await.unwrap();
        }

        let snapshot = tracker.engagement_snapshot(UserId(1), now).await.unwrap();
        assert_eq!(snapshot.level, EngagementLevel::High);
        assert!(snapshot.score >= 70.0);
    }

    #[tokio::test]
    async fn inactive_user_gets_inactive_level() {
        let (_dir, tracker) = tracker().await;
        let snapshot = tracker.engagement_snapshot(UserId(1), Utc::now()).await.unwrap();
        assert_eq!(snapshot.level, EngagementLevel::Inactive);
    }

    #[tokio::test]
    async fn effectiveness_buckets_negative_when_mostly_negative_feedback() {
        let (_dir, tracker) = tracker().await;
        let now = Utc::now();
        tracker.record_sent(UserId(1), "hydration", now).await.unwrap();
        tracker.record_interaction(UserId(1), "hydration", InteractionKind::Negative, now).await.unwrap();

        let bucket = tracker.effectiveness(UserId(1), "hydration").await.unwrap();
        assert_eq!(bucket, EffectivenessBucket::Negative);
    }

    #[tokio::test]
    async fn optimal_send_hours_falls_back_with_few_samples() {
        let (_dir, tracker) = tracker().await;
        let hours = tracker.optimal_send_hours(UserId(1), "hydration").await.unwrap();
        assert_eq!(hours, vec![9, 13, 19]);
    }

    #[tokio::test]
    async fn last_sent_at_returns_none_before_any_send() {
        let (_dir, tracker) = tracker().await;
        assert!(tracker.last_sent_at(UserId(1), "hydration").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remaining_daily_budget_decreases_as_sends_accumulate() {
        let (_dir, tracker) = tracker().await;
        let now = Utc::now();
        for _ in 0..3 {
            tracker.record_sent(UserId(1), "hydration", now).await.unwrap();
        }
        let remaining = tracker.remaining_daily_budget(UserId(1), EngagementLevel::High, now).await.unwrap();
        assert_eq!(remaining, 3);
    }

    #[tokio::test]
    async fn medium_engagement_uses_its_own_cap_not_the_high_cap() {
        let (_dir, tracker) = tracker().await;
        let now = Utc::now();
        for _ in 0..4 {
            tracker.record_sent(UserId(1), "hydration", now).await.unwrap();
        }
        let remaining = tracker.remaining_daily_budget(UserId(1), EngagementLevel::Medium, now).await.unwrap();
        assert_eq!(remaining, 0, "medium's cap is 4, not high's 6");
    }
}

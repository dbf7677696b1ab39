//! `NotificationQueueStore` (C10 persistence). Connection/migration idiom
//! follows `coach_memory::ledger::SqliteLedgerStore`. `scheduled_hour`
//! is materialized at insert time (the same "precompute the query key
//! instead of deriving it at read time" choice `reminders.rs` makes for
//! `next_fire_at`) so the dedup lookup in §4.10 step 2 is an indexed
//! equality match rather than a per-row timestamp-truncation scan.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use coach_core::{Channel, CoreResult, NotificationQueueEntry, NotificationQueueStore, NotificationStatus, UserId};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

use crate::error::SchedulerError;

#[derive(Clone)]
pub struct SqliteNotificationQueueStore {
    pool: Pool<Sqlite>,
}

fn hour_bucket(at: DateTime<Utc>) -> String {
    at.with_minute(0).unwrap_or(at).with_second(0).unwrap_or(at).format("%Y-%m-%dT%H").to_string()
}

fn channel_str(channel: Channel) -> &'static str {
    match channel {
        Channel::Chat => "chat",
        Channel::Push => "push",
        Channel::Email => "email",
        Channel::Sms => "sms",
    }
}

fn parse_channel(s: &str) -> Channel {
    match s {
        "push" => Channel::Push,
        "email" => Channel::Email,
        "sms" => Channel::Sms,
        _ => Channel::Chat,
    }
}

fn status_str(status: NotificationStatus) -> &'static str {
    match status {
        NotificationStatus::Pending => "pending",
        NotificationStatus::Sent => "sent",
        NotificationStatus::Failed => "failed",
        NotificationStatus::Cancelled => "cancelled",
        NotificationStatus::Deduped => "deduped",
    }
}

fn parse_status(s: &str) -> NotificationStatus {
    match s {
        "sent" => NotificationStatus::Sent,
        "failed" => NotificationStatus::Failed,
        "cancelled" => NotificationStatus::Cancelled,
        "deduped" => NotificationStatus::Deduped,
        _ => NotificationStatus::Pending,
    }
}

impl SqliteNotificationQueueStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_queue (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                notification_type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                scheduled_at INTEGER NOT NULL,
                scheduled_hour TEXT NOT NULL,
                sent_at INTEGER,
                payload TEXT,
                bypass_quiet_hours INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_dedup ON notification_queue(user_id, notification_type, scheduled_hour, status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_user_status ON notification_queue(user_id, status, scheduled_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn from_row(row: sqlx::sqlite::SqliteRow) -> CoreResult<NotificationQueueEntry> {
        let id_str: String = row.get("id");
        let user_id: i64 = row.get("user_id");
        let channel_raw: String = row.get("channel");
        let status_raw: String = row.get("status");
        let scheduled_at: i64 = row.get("scheduled_at");
        let sent_at: Option<i64> = row.get("sent_at");
        let payload_raw: Option<String> = row.get("payload");
        let bypass: i64 = row.get("bypass_quiet_hours");

        Ok(NotificationQueueEntry {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            user: UserId(user_id),
            notification_type: row.get("notification_type"),
            title: row.get("title"),
            content: row.get("content"),
            channel: parse_channel(&channel_raw),
            status: parse_status(&status_raw),
            scheduled_at: DateTime::from_timestamp(scheduled_at, 0).unwrap_or_else(Utc::now),
            sent_at: sent_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            payload: payload_raw.and_then(|s| serde_json::from_str(&s).ok()),
            bypass_quiet_hours: bypass != 0,
        })
    }
}

#[async_trait]
impl NotificationQueueStore for SqliteNotificationQueueStore {
    async fn insert(&self, entry: NotificationQueueEntry) -> CoreResult<()> {
        let payload_json = entry.payload.as_ref().map(|v| v.to_string());
        sqlx::query(
            r#"
            INSERT INTO notification_queue
                (id, user_id, notification_type, title, content, channel, status, scheduled_at, scheduled_hour, sent_at, payload, bypass_quiet_hours)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.user.0)
        .bind(&entry.notification_type)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(channel_str(entry.channel))
        .bind(status_str(entry.status))
        .bind(entry.scheduled_at.timestamp())
        .bind(hour_bucket(entry.scheduled_at))
        .bind(entry.sent_at.map(|t| t.timestamp()))
        .bind(payload_json)
        .bind(entry.bypass_quiet_hours as i64)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::from)?;

        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query("UPDATE notification_queue SET status = ?, sent_at = ? WHERE id = ?")
            .bind(status_str(status))
            .bind(sent_at.map(|t| t.timestamp()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::from)?;
        Ok(())
    }

    async fn find_in_scheduled_hour(
        &self,
        user: UserId,
        notification_type: &str,
        scheduled_hour: DateTime<Utc>,
    ) -> CoreResult<Vec<NotificationQueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, notification_type, title, content, channel, status, scheduled_at, sent_at, payload, bypass_quiet_hours
            FROM notification_queue
            WHERE user_id = ? AND notification_type = ? AND scheduled_hour = ? AND status IN ('pending', 'sent')
            "#,
        )
        .bind(user.0)
        .bind(notification_type)
        .bind(hour_bucket(scheduled_hour))
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::from)?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn list_pending_for_user(&self, user: UserId) -> CoreResult<Vec<NotificationQueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, notification_type, title, content, channel, status, scheduled_at, sent_at, payload, bypass_quiet_hours
            FROM notification_queue WHERE user_id = ? AND status = 'pending'
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::from)?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<NotificationQueueEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, notification_type, title, content, channel, status, scheduled_at, sent_at, payload, bypass_quiet_hours
            FROM notification_queue WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::from)?;

        row.map(Self::from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteNotificationQueueStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/queue.db?mode=rwc", dir.path().display());
        let store = SqliteNotificationQueueStore::new(&url).await.unwrap();
        (dir, store)
    }

    fn entry(user: UserId, notification_type: &str, scheduled_at: DateTime<Utc>, status: NotificationStatus) -> NotificationQueueEntry {
        NotificationQueueEntry {
            id: Uuid::new_v4(),
            user,
            notification_type: notification_type.to_string(),
            title: "t".into(),
            content: "c".into(),
            channel: Channel::Chat,
            status,
            scheduled_at,
            sent_at: None,
            payload: Some(serde_json::json!({"score": 0.7})),
            bypass_quiet_hours: false,
        }
    }

    #[tokio::test]
    async fn find_in_scheduled_hour_matches_same_hour_bucket() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.insert(entry(UserId(1), "hydration", now, NotificationStatus::Pending)).await.unwrap();

        let same_hour = now + chrono::Duration::minutes(10);
        let found = store.find_in_scheduled_hour(UserId(1), "hydration", same_hour).await.unwrap();
        assert_eq!(found.len(), 1);

        let next_hour = now + chrono::Duration::hours(1);
        let not_found = store.find_in_scheduled_hour(UserId(1), "hydration", next_hour).await.unwrap();
        assert!(not_found.is_empty());
    }

    #[tokio::test]
    async fn update_status_transitions_to_sent() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let e = entry(UserId(1), "hydration", now, NotificationStatus::Pending);
        let id = e.id;
        store.insert(e).await.unwrap();
        store.update_status(id, NotificationStatus::Sent, Some(now)).await.unwrap();

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, NotificationStatus::Sent);
        assert!(fetched.sent_at.is_some());
    }

    #[tokio::test]
    async fn list_pending_excludes_terminal_entries() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.insert(entry(UserId(1), "a", now, NotificationStatus::Pending)).await.unwrap();
        store.insert(entry(UserId(1), "b", now, NotificationStatus::Sent)).await.unwrap();

        let pending = store.list_pending_for_user(UserId(1)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].notification_type, "a");
    }
}

//! C12 — reminder settings store. Connection/migration idiom follows
//! `ledger.rs`. `next_fire_at` is materialized on every write so
//! `list_due` stays an indexed range scan instead of re-evaluating every
//! schedule on each scheduler tick (§4.12.1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::{CoreResult, ReminderSchedule, ReminderSetting, ReminderSettingsStore, UserId};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteReminderSettingsStore {
    pool: Pool<Sqlite>,
}

impl SqliteReminderSettingsStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminder_settings (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                reminder_type TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                schedule TEXT NOT NULL,
                metadata TEXT,
                next_fire_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_reminder_user_type ON reminder_settings(user_id, reminder_type)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reminder_due ON reminder_settings(enabled, next_fire_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn from_row(row: sqlx::sqlite::SqliteRow) -> CoreResult<ReminderSetting> {
        let id_str: String = row.get("id");
        let user_id: i64 = row.get("user_id");
        let schedule_str: String = row.get("schedule");
        let metadata_str: Option<String> = row.get("metadata");
        let next_fire_at: i64 = row.get("next_fire_at");
        let enabled: i64 = row.get("enabled");

        let schedule: ReminderSchedule = serde_json::from_str(&schedule_str)
            .map_err(|e| coach_core::CoreError::storage(format!("corrupt reminder schedule: {e}")))?;

        Ok(ReminderSetting {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            user: UserId(user_id),
            reminder_type: row.get("reminder_type"),
            enabled: enabled != 0,
            schedule,
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
            next_fire_at: DateTime::from_timestamp(next_fire_at, 0).unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ReminderSettingsStore for SqliteReminderSettingsStore {
    async fn upsert(&self, setting: ReminderSetting) -> CoreResult<()> {
        let schedule_json = serde_json::to_string(&setting.schedule)
            .map_err(|e| coach_core::CoreError::validation(format!("invalid reminder schedule: {e}")))?;
        let metadata_json = setting
            .metadata
            .as_ref()
            .map(|v| v.to_string());

        sqlx::query(
            r#"
            INSERT INTO reminder_settings (id, user_id, reminder_type, enabled, schedule, metadata, next_fire_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, reminder_type) DO UPDATE SET
                enabled = excluded.enabled,
                schedule = excluded.schedule,
                metadata = excluded.metadata,
                next_fire_at = excluded.next_fire_at
            "#,
        )
        .bind(setting.id.to_string())
        .bind(setting.user.0)
        .bind(&setting.reminder_type)
        .bind(setting.enabled as i64)
        .bind(schedule_json)
        .bind(metadata_json)
        .bind(setting.next_fire_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, user: UserId, reminder_type: &str) -> CoreResult<Option<ReminderSetting>> {
        let row = sqlx::query(
            "SELECT id, user_id, reminder_type, enabled, schedule, metadata, next_fire_at FROM reminder_settings WHERE user_id = ? AND reminder_type = ?",
        )
        .bind(user.0)
        .bind(reminder_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        row.map(Self::from_row).transpose()
    }

    async fn list_for_user(&self, user: UserId) -> CoreResult<Vec<ReminderSetting>> {
        let rows = sqlx::query(
            "SELECT id, user_id, reminder_type, enabled, schedule, metadata, next_fire_at FROM reminder_settings WHERE user_id = ?",
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn list_due(&self, now: DateTime<Utc>) -> CoreResult<Vec<ReminderSetting>> {
        let rows = sqlx::query(
            "SELECT id, user_id, reminder_type, enabled, schedule, metadata, next_fire_at FROM reminder_settings WHERE enabled = 1 AND next_fire_at <= ?",
        )
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        rows.into_iter().map(Self::from_row).collect()
    }
}

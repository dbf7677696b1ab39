//! Local durable cache of `HealthRecord`s, standing in for the external
//! Record Store (§2, §6) so C6's dialogue-plus-record scan and C11's
//! streak/total evaluation have real history to read inside this core's
//! own process boundary. Connection/migration idiom follows `ledger.rs`;
//! the payload column stores `HealthPayload`'s tagged-variant JSON
//! verbatim rather than flattening it into typed columns — one
//! discriminator plus one JSON blob at the storage layer (§9), while the
//! in-memory type stays a sum type.

use crate::error::RecordsError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::{
    CoreResult, HealthPayload, HealthRecord, HealthRecordKind, HealthRecordReader,
    HealthRecordWriter, UserId,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteHealthRecordStore {
    pool: Pool<Sqlite>,
}

impl SqliteHealthRecordStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS health_records (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                notes TEXT,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_health_records_user_time ON health_records(user_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_health_records_user_kind_time ON health_records(user_id, kind, timestamp DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<HealthRecord, RecordsError> {
        let id_str: String = row.get("id");
        let user_id: i64 = row.get("user_id");
        let payload_json: String = row.get("payload");
        let notes: Option<String> = row.get("notes");
        let ts: i64 = row.get("timestamp");

        let payload: HealthPayload =
            serde_json::from_str(&payload_json).map_err(|e| RecordsError::Malformed(e.to_string()))?;

        Ok(HealthRecord {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            user: UserId(user_id),
            timestamp: DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
            payload,
            notes,
        })
    }
}

#[async_trait]
impl HealthRecordWriter for SqliteHealthRecordStore {
    async fn insert(&self, record: HealthRecord) -> CoreResult<()> {
        let payload_json = serde_json::to_string(&record.payload)
            .map_err(|e| RecordsError::Malformed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO health_records (id, user_id, kind, payload, notes, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user.0)
        .bind(record.payload.kind().as_str())
        .bind(payload_json)
        .bind(record.notes)
        .bind(record.timestamp.timestamp())
        .execute(&self.pool)
        .await
        .map_err(RecordsError::from)?;

        Ok(())
    }
}

#[async_trait]
impl HealthRecordReader for SqliteHealthRecordStore {
    async fn records_since(&self, user: UserId, since: DateTime<Utc>) -> CoreResult<Vec<HealthRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, payload, notes, timestamp FROM health_records \
             WHERE user_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(user.0)
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(RecordsError::from)?;

        rows.iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn latest_of_kind(&self, user: UserId, kind: HealthRecordKind) -> CoreResult<Option<HealthRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, kind, payload, notes, timestamp FROM health_records \
             WHERE user_id = ? AND kind = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(user.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RecordsError::from)?;

        row.as_ref().map(Self::row_to_record).transpose().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> (tempfile::TempDir, SqliteHealthRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/records.db?mode=rwc", dir.path().display());
        let store = SqliteHealthRecordStore::new(&url).await.unwrap();
        (dir, store)
    }

    fn record(user: UserId, payload: HealthPayload, ts: DateTime<Utc>) -> HealthRecord {
        HealthRecord { id: Uuid::new_v4(), user, timestamp: ts, payload, notes: None }
    }

    #[tokio::test]
    async fn records_since_returns_only_matching_user_and_window() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.insert(record(UserId(1), HealthPayload::Water { milliliters: 250 }, now)).await.unwrap();
        store.insert(record(UserId(1), HealthPayload::Water { milliliters: 250 }, now - Duration::days(10))).await.unwrap();
        store.insert(record(UserId(2), HealthPayload::Water { milliliters: 250 }, now)).await.unwrap();

        let recent = store.records_since(UserId(1), now - Duration::days(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn latest_of_kind_returns_most_recent() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.insert(record(UserId(1), HealthPayload::Weight { kg: 80.0 }, now - Duration::days(1))).await.unwrap();
        store.insert(record(UserId(1), HealthPayload::Weight { kg: 79.5 }, now)).await.unwrap();

        let latest = store.latest_of_kind(UserId(1), HealthRecordKind::Weight).await.unwrap().unwrap();
        match latest.payload {
            HealthPayload::Weight { kg } => assert_eq!(kg, 79.5),
            _ => panic!("wrong payload kind"),
        }
    }

    #[tokio::test]
    async fn inserting_same_id_twice_is_idempotent() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let r = record(UserId(1), HealthPayload::Water { milliliters: 250 }, now);
        store.insert(r.clone()).await.unwrap();
        store.insert(r).await.unwrap();

        let all = store.records_since(UserId(1), now - Duration::days(1)).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}

//! C4 — per-user vector-indexed long-term memory. Connection/migration
//! idiom matches `ledger.rs`. The search path is a per-user full-table
//! scan scored by [`crate::embedding::cosine_similarity`], not
//! `sqlite-vec`'s native ANN index — see DESIGN.md Open Question 5 for
//! why that's an acceptable match to the retention policy's expected row
//! counts.

use crate::embedding::cosine_similarity;
use crate::error::LongTermError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::{
    CompressionPolicy, CoreResult, Importance, LongTermEntry, LongTermFilter, LongTermKind,
    LongTermMatch, LongTermMetadata, LongTermStore, UserId,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteLongTermStore {
    pool: Pool<Sqlite>,
}

impl SqliteLongTermStore {
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
            CREATE TABLE IF NOT EXISTS long_term_memories (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                importance TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                retention_until INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_long_term_user_kind ON long_term_memories(user_id, kind, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn importance_str(importance: Importance) -> &'static str {
        match importance {
            Importance::High => "high",
            Importance::Medium => "medium",
            Importance::Low => "low",
        }
    }

    fn parse_importance(s: &str) -> Importance {
        match s {
            "high" => Importance::High,
            "medium" => Importance::Medium,
            _ => Importance::Low,
        }
    }

    fn kind_str(kind: LongTermKind) -> &'static str {
        match kind {
            LongTermKind::Checkin => "checkin",
            LongTermKind::DialogueSummary => "dialogue_summary",
        }
    }

    fn parse_kind(s: &str) -> LongTermKind {
        match s {
            "checkin" => LongTermKind::Checkin,
            _ => LongTermKind::DialogueSummary,
        }
    }
}

#[async_trait]
impl LongTermStore for SqliteLongTermStore {
    async fn add(&self, entry: LongTermEntry) -> CoreResult<()> {
        let embedding_blob =
            bincode::serialize(&entry.embedding).map_err(|e| LongTermError::Embedding(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO long_term_memories (id, user_id, kind, content, embedding, importance, timestamp, retention_until)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.metadata.user.0)
        .bind(Self::kind_str(entry.metadata.kind))
        .bind(&entry.content)
        .bind(embedding_blob)
        .bind(Self::importance_str(entry.metadata.importance))
        .bind(entry.metadata.timestamp.timestamp())
        .bind(entry.metadata.retention_until.timestamp())
        .execute(&self.pool)
        .await
        .map_err(LongTermError::from)?;

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: LongTermFilter,
    ) -> CoreResult<Vec<LongTermMatch>> {
        let mut query = String::from(
            "SELECT id, user_id, kind, content, embedding, importance, timestamp, retention_until FROM long_term_memories WHERE user_id = ?",
        );
        if filter.kind.is_some() {
            query.push_str(" AND kind = ?");
        }
        if filter.since.is_some() {
            query.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            query.push_str(" AND timestamp <= ?");
        }

        let mut q = sqlx::query(&query).bind(filter.user.0);
        if let Some(kind) = filter.kind {
            q = q.bind(Self::kind_str(kind));
        }
        if let Some(since) = filter.since {
            q = q.bind(since.timestamp());
        }
        if let Some(until) = filter.until {
            q = q.bind(until.timestamp());
        }

        let rows = q.fetch_all(&self.pool).await.map_err(LongTermError::from)?;

        let mut scored: Vec<LongTermMatch> = rows
            .into_iter()
            .map(|row| {
                let id_str: String = row.get("id");
                let user_id: i64 = row.get("user_id");
                let kind_str: String = row.get("kind");
                let embedding_blob: Vec<u8> = row.get("embedding");
                let embedding: Vec<f32> = bincode::deserialize(&embedding_blob).unwrap_or_default();
                let importance_str: String = row.get("importance");
                let timestamp: i64 = row.get("timestamp");
                let retention_until: i64 = row.get("retention_until");

                let score = cosine_similarity(query_embedding, &embedding);

                LongTermMatch {
                    entry: LongTermEntry {
                        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
                        content: row.get("content"),
                        embedding,
                        metadata: LongTermMetadata {
                            user: UserId(user_id),
                            kind: Self::parse_kind(&kind_str),
                            timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
                            importance: Self::parse_importance(&importance_str),
                            retention_until: DateTime::from_timestamp(retention_until, 0).unwrap_or_else(Utc::now),
                        },
                    },
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn compress(&self, user: UserId, policy: CompressionPolicy) -> CoreResult<usize> {
        let now = Utc::now().timestamp();
        let threshold_str = Self::importance_str(policy.importance_threshold);

        // §4.4: merges low-importance or old entries. With no embedding-merge
        // model wired, "merge" degrades to deletion of rows matching either
        // condition — the retention contract (expired or below threshold)
        // still holds without the document ever being retrievable again.
        let result = sqlx::query(
            r#"
            DELETE FROM long_term_memories
            WHERE user_id = ?
              AND (
                retention_until < ?
                OR (
                    (importance = 'low' AND ? != 'low')
                    OR (importance = 'medium' AND ? = 'high')
                )
              )
            "#,
        )
        .bind(user.0)
        .bind(now)
        .bind(threshold_str)
        .bind(threshold_str)
        .execute(&self.pool)
        .await
        .map_err(LongTermError::from)?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::{Importance, LongTermKind, LongTermMetadata};

    async fn store() -> (tempfile::TempDir, SqliteLongTermStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/long_term.db?mode=rwc", dir.path().display());
        let store = SqliteLongTermStore::new(&url).await.unwrap();
        (dir, store)
    }

    fn entry(user: UserId, content: &str, embedding: Vec<f32>, importance: Importance) -> LongTermEntry {
        LongTermEntry {
            id: Uuid::new_v4(),
            content: content.to_string(),
            embedding,
            metadata: LongTermMetadata {
                user,
                kind: LongTermKind::Checkin,
                timestamp: Utc::now(),
                importance,
                retention_until: Utc::now() + chrono::Duration::days(365),
            },
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let (_dir, store) = store().await;
        store.add(entry(UserId(1), "ate salad", vec![1.0, 0.0], Importance::High)).await.unwrap();
        store.add(entry(UserId(1), "ran 5k", vec![0.0, 1.0], Importance::High)).await.unwrap();

        let results = store
            .search(&[1.0, 0.0], 1, LongTermFilter { user: UserId(1), kind: None, since: None, until: None })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.content, "ate salad");
    }

    #[tokio::test]
    async fn search_is_scoped_to_user() {
        let (_dir, store) = store().await;
        store.add(entry(UserId(1), "user one", vec![1.0, 0.0], Importance::High)).await.unwrap();
        store.add(entry(UserId(2), "user two", vec![1.0, 0.0], Importance::High)).await.unwrap();

        let results = store
            .search(&[1.0, 0.0], 10, LongTermFilter { user: UserId(1), kind: None, since: None, until: None })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.content, "user one");
    }

    #[tokio::test]
    async fn compress_removes_expired_entries() {
        let (_dir, store) = store().await;
        let mut expired = entry(UserId(1), "old", vec![1.0], Importance::High);
        expired.metadata.retention_until = Utc::now() - chrono::Duration::days(1);
        store.add(expired).await.unwrap();
        store.add(entry(UserId(1), "fresh", vec![1.0], Importance::High)).await.unwrap();

        let removed = store
            .compress(UserId(1), CompressionPolicy { importance_threshold: Importance::Low })
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = store
            .search(&[1.0], 10, LongTermFilter { user: UserId(1), kind: None, since: None, until: None })
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entry.content, "fresh");
    }
}

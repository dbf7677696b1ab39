//! C2 — append-only points ledger. Connects with idempotent
//! `CREATE TABLE IF NOT EXISTS` migrations and `PRAGMA foreign_keys = ON`
//! on connect, the same shape every store in this crate uses.
//!
//! Daily-unique enforcement (I3) is a `UNIQUE(user_id, reason, award_date)`
//! index where `award_date` is only populated for reasons in
//! [`coach_core::is_daily_unique_reason`]; SQLite treats `NULL` as distinct
//! in a unique index, so non-daily-unique reasons (`award_date = NULL`)
//! never collide with each other. `balance_after` is computed inside the
//! same transaction as the insert, giving per-(user, reason, day)
//! serializability without a separate lock (§4.2.1).
//!
//! Reasons matched by [`coach_core::is_lifetime_unique_reason`] (achievement
//! rewards) reuse the same index with a fixed `award_date` sentinel instead
//! of today's date, so a repeat `earn` for an already-awarded achievement
//! hits the unique-violation path and comes back `AlreadyAwardedToday`
//! rather than paying out twice.

use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coach_core::{
    is_daily_unique_reason, is_lifetime_unique_reason, CoreResult, EarnOutcome, LedgerStore,
    PointsLedgerEntry, SpendOutcome, UserId,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

/// `award_date` sentinel used for [`is_lifetime_unique_reason`] reasons —
/// any fixed value works since it only needs to collide with itself across
/// calls for the same (user, reason).
const LIFETIME_AWARD_DATE: &str = "lifetime";

#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: Pool<Sqlite>,
}

impl SqliteLedgerStore {
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
            CREATE TABLE IF NOT EXISTS ledger (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL,
                reason TEXT NOT NULL,
                description TEXT,
                related_record TEXT,
                award_date TEXT,
                balance_after INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_daily_unique ON ledger(user_id, reason, award_date)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_user_timestamp ON ledger(user_id, timestamp DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn current_balance(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        user: UserId,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT balance_after FROM ledger WHERE user_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT 1")
            .bind(user.0)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("balance_after")).unwrap_or(0))
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn earn(
        &self,
        user: UserId,
        reason: &str,
        amount: i64,
        related_record: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> CoreResult<EarnOutcome> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount.into());
        }

        let award_date = if is_daily_unique_reason(reason) {
            Some(now.date_naive().to_string())
        } else if is_lifetime_unique_reason(reason) {
            Some(LIFETIME_AWARD_DATE.to_string())
        } else {
            None
        };

        let mut tx = self.pool.begin().await.map_err(LedgerError::from)?;
        let balance_before = Self::current_balance(&mut tx, user).await.map_err(LedgerError::from)?;
        let balance_after = balance_before + amount;

        let insert = sqlx::query(
            r#"
            INSERT INTO ledger (id, user_id, kind, amount, reason, description, related_record, award_date, balance_after, timestamp)
            VALUES (?, ?, 'earn', ?, ?, NULL, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user.0)
        .bind(amount)
        .bind(reason)
        .bind(related_record.map(|id| id.to_string()))
        .bind(&award_date)
        .bind(balance_after)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                tx.commit().await.map_err(LedgerError::from)?;
                Ok(EarnOutcome::Earned { points_earned: amount, balance_after })
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                Ok(EarnOutcome::AlreadyAwardedToday)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(LedgerError::from(e).into())
            }
        }
    }

    async fn spend(&self, user: UserId, reason: &str, amount: i64) -> CoreResult<SpendOutcome> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount.into());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(LedgerError::from)?;
        let balance_before = Self::current_balance(&mut tx, user).await.map_err(LedgerError::from)?;
        if balance_before < amount {
            tx.rollback().await.ok();
            return Ok(SpendOutcome::InsufficientFunds);
        }
        let balance_after = balance_before - amount;

        sqlx::query(
            r#"
            INSERT INTO ledger (id, user_id, kind, amount, reason, description, related_record, award_date, balance_after, timestamp)
            VALUES (?, ?, 'spend', ?, ?, NULL, NULL, NULL, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user.0)
        .bind(amount)
        .bind(reason)
        .bind(balance_after)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(LedgerError::from)?;

        tx.commit().await.map_err(LedgerError::from)?;
        Ok(SpendOutcome::Spent { balance_after })
    }

    async fn history(&self, user: UserId, limit: u32, offset: u32) -> CoreResult<(Vec<PointsLedgerEntry>, u64)> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, amount, reason, description, related_record, balance_after, timestamp FROM ledger WHERE user_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(user.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from)?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM ledger WHERE user_id = ?")
            .bind(user.0)
            .fetch_one(&self.pool)
            .await
            .map_err(LedgerError::from)?
            .get("c");

        let entries = rows
            .into_iter()
            .map(|row| {
                let kind_str: String = row.get("kind");
                let id_str: String = row.get("id");
                let related: Option<String> = row.get("related_record");
                let ts: i64 = row.get("timestamp");
                PointsLedgerEntry {
                    id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
                    user,
                    kind: if kind_str == "earn" {
                        coach_core::LedgerEntryKind::Earn
                    } else {
                        coach_core::LedgerEntryKind::Spend
                    },
                    amount: row.get("amount"),
                    reason: row.get("reason"),
                    description: row.get("description"),
                    related_record: related.and_then(|s| Uuid::parse_str(&s).ok()),
                    balance_after: row.get("balance_after"),
                    timestamp: DateTime::from_timestamp(ts, 0).unwrap_or(now_fallback()),
                }
            })
            .collect();

        Ok((entries, total.max(0) as u64))
    }

    async fn balance(&self, user: UserId) -> CoreResult<i64> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from)?;
        let balance = Self::current_balance(&mut tx, user).await.map_err(LedgerError::from)?;
        tx.rollback().await.ok();
        Ok(balance)
    }
}

fn now_fallback() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteLedgerStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/ledger.db?mode=rwc", dir.path().display());
        let store = SqliteLedgerStore::new(&url).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn daily_login_grants_once() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let first = store.earn(UserId(42), "daily_login", 5, None, now).await.unwrap();
        assert_eq!(first, EarnOutcome::Earned { points_earned: 5, balance_after: 5 });

        let second = store.earn(UserId(42), "daily_login", 5, None, now).await.unwrap();
        assert_eq!(second, EarnOutcome::AlreadyAwardedToday);
        assert_eq!(store.balance(UserId(42)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn non_daily_unique_reasons_stack() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.earn(UserId(7), "record_weight", 10, None, now).await.unwrap();
        store.earn(UserId(7), "record_weight", 10, None, now).await.unwrap();
        assert_eq!(store.balance(UserId(7)).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn spend_rejects_when_balance_insufficient() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.earn(UserId(1), "first_record", 10, None, now).await.unwrap();
        let outcome = store.spend(UserId(1), "reward_redeem", 50).await.unwrap();
        assert_eq!(outcome, SpendOutcome::InsufficientFunds);
        assert_eq!(store.balance(UserId(1)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn balance_equals_sum_of_earn_minus_spend() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.earn(UserId(3), "record_weight", 10, None, now).await.unwrap();
        store.earn(UserId(3), "first_record", 10, None, now).await.unwrap();
        store.spend(UserId(3), "reward_redeem", 5).await.unwrap();
        assert_eq!(store.balance(UserId(3)).await.unwrap(), 15);

        let (entries, total) = store.history(UserId(3), 10, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].reason, "reward_redeem");
    }

    #[tokio::test]
    async fn achievement_reward_grants_once_lifetime_even_across_days() {
        let (_dir, store) = store().await;
        let day_one = Utc::now();
        let first = store.earn(UserId(9), "achievement:first_record", 10, None, day_one).await.unwrap();
        assert_eq!(first, EarnOutcome::Earned { points_earned: 10, balance_after: 10 });

        let day_two = day_one + chrono::Duration::days(1);
        let second = store.earn(UserId(9), "achievement:first_record", 10, None, day_two).await.unwrap();
        assert_eq!(second, EarnOutcome::AlreadyAwardedToday);
        assert_eq!(store.balance(UserId(9)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn earn_rejects_non_positive_amount() {
        let (_dir, store) = store().await;
        let result = store.earn(UserId(1), "record_weight", 0, None, Utc::now()).await;
        assert!(result.is_err());
    }
}

//! User profile store backing every component that reads or mutates
//! `UserProfile` (§3): C5's context highlights, C8's decision_mode/
//! quiet_hours, C9's motivation_type/communication_style, C11's points and
//! achievement set. Connection/migration idiom follows `ledger.rs`.

use async_trait::async_trait;
use coach_core::{
    CoreResult, DecisionMode, MotivationType, QuietHours, UserId, UserProfile, UserProfileStore,
};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::collections::HashSet;

#[derive(Clone)]
pub struct SqliteUserProfileStore {
    pool: Pool<Sqlite>,
}

impl SqliteUserProfileStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id INTEGER PRIMARY KEY,
                age INTEGER,
                sex TEXT,
                height_cm REAL,
                basal_metabolic_rate REAL,
                preferences TEXT NOT NULL DEFAULT '{}',
                motivation_type TEXT NOT NULL,
                communication_style TEXT NOT NULL,
                decision_mode TEXT NOT NULL,
                points INTEGER NOT NULL DEFAULT 0,
                points_earned_total INTEGER NOT NULL DEFAULT 0,
                points_spent_total INTEGER NOT NULL DEFAULT 0,
                achievements TEXT NOT NULL DEFAULT '[]',
                quiet_hours_start INTEGER NOT NULL DEFAULT 22,
                quiet_hours_end INTEGER NOT NULL DEFAULT 8,
                timezone_offset_minutes INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn motivation_str(m: MotivationType) -> &'static str {
        match m {
            MotivationType::DataDriven => "data_driven",
            MotivationType::EmotionalSupport => "emotional_support",
            MotivationType::GoalOriented => "goal_oriented",
        }
    }

    fn parse_motivation(s: &str) -> MotivationType {
        match s {
            "emotional_support" => MotivationType::EmotionalSupport,
            "goal_oriented" => MotivationType::GoalOriented,
            _ => MotivationType::DataDriven,
        }
    }

    fn default_profile(user: UserId) -> UserProfile {
        UserProfile {
            user,
            age: None,
            sex: None,
            height_cm: None,
            basal_metabolic_rate: None,
            preferences: serde_json::json!({}),
            motivation_type: MotivationType::DataDriven,
            communication_style: "neutral".to_string(),
            decision_mode: DecisionMode::Balanced,
            points: 0,
            points_earned_total: 0,
            points_spent_total: 0,
            achievements: HashSet::new(),
            quiet_hours: QuietHours { start_hour: 22, end_hour: 8 },
            timezone_offset_minutes: 0,
        }
    }
}

#[async_trait]
impl UserProfileStore for SqliteUserProfileStore {
    async fn get(&self, user: UserId) -> CoreResult<UserProfile> {
        let row = sqlx::query(
            r#"
            SELECT age, sex, height_cm, basal_metabolic_rate, preferences, motivation_type,
                   communication_style, decision_mode, points, points_earned_total,
                   points_spent_total, achievements, quiet_hours_start, quiet_hours_end,
                   timezone_offset_minutes
            FROM user_profiles WHERE user_id = ?
            "#,
        )
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(Self::default_profile(user));
        };

        let decision_mode_str: String = row.get("decision_mode");
        let motivation_str: String = row.get("motivation_type");
        let preferences_str: String = row.get("preferences");
        let achievements_str: String = row.get("achievements");

        Ok(UserProfile {
            user,
            age: row.get::<Option<i64>, _>("age").map(|v| v as u8),
            sex: row.get("sex"),
            height_cm: row.get("height_cm"),
            basal_metabolic_rate: row.get("basal_metabolic_rate"),
            preferences: serde_json::from_str(&preferences_str).unwrap_or(serde_json::json!({})),
            motivation_type: Self::parse_motivation(&motivation_str),
            communication_style: row.get("communication_style"),
            decision_mode: DecisionMode::parse_str(&decision_mode_str).unwrap_or(DecisionMode::Balanced),
            points: row.get("points"),
            points_earned_total: row.get("points_earned_total"),
            points_spent_total: row.get("points_spent_total"),
            achievements: serde_json::from_str::<Vec<String>>(&achievements_str)
                .unwrap_or_default()
                .into_iter()
                .collect(),
            quiet_hours: QuietHours {
                start_hour: row.get::<i64, _>("quiet_hours_start") as u8,
                end_hour: row.get::<i64, _>("quiet_hours_end") as u8,
            },
            timezone_offset_minutes: row.get("timezone_offset_minutes"),
        })
    }

    async fn save(&self, profile: UserProfile) -> CoreResult<()> {
        let achievements: Vec<&String> = profile.achievements.iter().collect();
        sqlx::query(
            r#"
            INSERT INTO user_profiles (
                user_id, age, sex, height_cm, basal_metabolic_rate, preferences, motivation_type,
                communication_style, decision_mode, points, points_earned_total, points_spent_total,
                achievements, quiet_hours_start, quiet_hours_end, timezone_offset_minutes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                age = excluded.age,
                sex = excluded.sex,
                height_cm = excluded.height_cm,
                basal_metabolic_rate = excluded.basal_metabolic_rate,
                preferences = excluded.preferences,
                motivation_type = excluded.motivation_type,
                communication_style = excluded.communication_style,
                decision_mode = excluded.decision_mode,
                points = excluded.points,
                points_earned_total = excluded.points_earned_total,
                points_spent_total = excluded.points_spent_total,
                achievements = excluded.achievements,
                quiet_hours_start = excluded.quiet_hours_start,
                quiet_hours_end = excluded.quiet_hours_end,
                timezone_offset_minutes = excluded.timezone_offset_minutes
            "#,
        )
        .bind(profile.user.0)
        .bind(profile.age.map(|v| v as i64))
        .bind(&profile.sex)
        .bind(profile.height_cm)
        .bind(profile.basal_metabolic_rate)
        .bind(profile.preferences.to_string())
        .bind(Self::motivation_str(profile.motivation_type))
        .bind(&profile.communication_style)
        .bind(profile.decision_mode.as_str())
        .bind(profile.points)
        .bind(profile.points_earned_total)
        .bind(profile.points_spent_total)
        .bind(serde_json::to_string(&achievements).unwrap_or_else(|_| "[]".to_string()))
        .bind(profile.quiet_hours.start_hour as i64)
        .bind(profile.quiet_hours.end_hour as i64)
        .bind(profile.timezone_offset_minutes)
        .execute(&self.pool)
        .await
        .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;

        Ok(())
    }

    async fn list_all(&self) -> CoreResult<Vec<UserId>> {
        let rows = sqlx::query("SELECT user_id FROM user_profiles ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| coach_core::CoreError::storage(e.to_string()))?;
        Ok(rows.into_iter().map(|row| UserId(row.get("user_id"))).collect())
    }
}

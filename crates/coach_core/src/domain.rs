//! Entity types (§3). Storage form is left to `coach_memory`; these are
//! the design-level shapes every component agrees on.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-user identifier. A newtype over `i64` round-trips cleanly
/// through `sqlx`'s `INTEGER PRIMARY KEY` without a UUID detour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_auth_id: String,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotivationType {
    DataDriven,
    EmotionalSupport,
    GoalOriented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    Conservative,
    Balanced,
    Intelligent,
}

impl DecisionMode {
    /// Weight given to the rule-based score vs the LLM score (§4.8 step 3).
    pub fn alpha(self) -> f64 {
        match self {
            DecisionMode::Conservative => 0.8,
            DecisionMode::Balanced => 0.5,
            DecisionMode::Intelligent => 0.2,
        }
    }

    /// Whether the LLM layer is consulted at all for this mode (the
    /// `conservative` mode omits `llm_score` per §4.8 step 3).
    pub fn uses_llm(self) -> bool {
        !matches!(self, DecisionMode::Conservative)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionMode::Conservative => "conservative",
            DecisionMode::Balanced => "balanced",
            DecisionMode::Intelligent => "intelligent",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "conservative" => Some(DecisionMode::Conservative),
            "balanced" => Some(DecisionMode::Balanced),
            "intelligent" => Some(DecisionMode::Intelligent),
            _ => None,
        }
    }
}

/// A user's local quiet-hours window, e.g. 22:00–08:00. `start_hour >
/// end_hour` means the window wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl QuietHours {
    pub fn contains_hour(&self, hour: u8) -> bool {
        if self.start_hour == self.end_hour {
            // zero-width window configured: never in quiet hours.
            return false;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user: UserId,
    pub age: Option<u8>,
    pub sex: Option<String>,
    pub height_cm: Option<f32>,
    pub basal_metabolic_rate: Option<f32>,
    /// Free-form structured diet/exercise preferences.
    #[serde(default)]
    pub preferences: serde_json::Value,
    pub motivation_type: MotivationType,
    pub communication_style: String,
    pub decision_mode: DecisionMode,
    pub points: i64,
    pub points_earned_total: i64,
    pub points_spent_total: i64,
    #[serde(default)]
    pub achievements: std::collections::HashSet<String>,
    pub quiet_hours: QuietHours,
    /// Offset from UTC in minutes, used to evaluate quiet hours and
    /// weekday schedules in the user's own local time.
    pub timezone_offset_minutes: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthRecordKind {
    Weight,
    Meal,
    Exercise,
    Water,
    Sleep,
}

impl HealthRecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthRecordKind::Weight => "weight",
            HealthRecordKind::Meal => "meal",
            HealthRecordKind::Exercise => "exercise",
            HealthRecordKind::Water => "water",
            HealthRecordKind::Sleep => "sleep",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "weight" => Some(HealthRecordKind::Weight),
            "meal" => Some(HealthRecordKind::Meal),
            "exercise" => Some(HealthRecordKind::Exercise),
            "water" => Some(HealthRecordKind::Water),
            "sleep" => Some(HealthRecordKind::Sleep),
            _ => None,
        }
    }
}

/// Polymorphic health record payload, modeled as a sum type (tagged
/// variants) rather than a string-discriminated blob dispatched on
/// `record_type`. Persistence may still use a discriminator column
/// alongside a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthPayload {
    Weight { kg: f32 },
    Meal { calories: Option<f32>, description: Option<String> },
    Exercise {
        minutes: u32,
        exercise_kind: Option<String>,
        calories_burned: Option<f32>,
    },
    Water { milliliters: u32 },
    /// `duration_seconds = None` models an unset duration; §4.11.1
    /// resolves this to count as a broken `sleep_streak` day, same as a
    /// missing record.
    Sleep {
        duration_seconds: Option<i64>,
        quality: Option<u8>,
    },
}

impl HealthPayload {
    pub fn kind(&self) -> HealthRecordKind {
        match self {
            HealthPayload::Weight { .. } => HealthRecordKind::Weight,
            HealthPayload::Meal { .. } => HealthRecordKind::Meal,
            HealthPayload::Exercise { .. } => HealthRecordKind::Exercise,
            HealthPayload::Water { .. } => HealthRecordKind::Water,
            HealthPayload::Sleep { .. } => HealthRecordKind::Sleep,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: Uuid,
    pub user: UserId,
    pub timestamp: DateTime<Utc>,
    pub payload: HealthPayload,
    pub notes: Option<String>,
}

impl HealthRecord {
    /// Canonical one-line description fed to the Memory Manager's §4.5
    /// check-in step, e.g. "[meal] at 08:00, ate oatmeal, ~320 kcal".
    pub fn canonical_sentence(&self) -> String {
        let at = self.timestamp.format("%H:%M");
        let body = match &self.payload {
            HealthPayload::Weight { kg } => format!("weighed in at {kg:.1}kg"),
            HealthPayload::Meal { calories, description } => {
                let desc = description.as_deref().unwrap_or("a meal");
                match calories {
                    Some(kcal) => format!("ate {desc}, ~{kcal:.0} kcal"),
                    None => format!("ate {desc}"),
                }
            }
            HealthPayload::Exercise { minutes, exercise_kind, calories_burned } => {
                let kind = exercise_kind.as_deref().unwrap_or("exercise");
                match calories_burned {
                    Some(kcal) => format!("did {minutes} min of {kind}, ~{kcal:.0} kcal burned"),
                    None => format!("did {minutes} min of {kind}"),
                }
            }
            HealthPayload::Water { milliliters } => format!("drank {milliliters}ml of water"),
            HealthPayload::Sleep { duration_seconds, quality } => {
                let duration = duration_seconds
                    .map(|s| format!("{:.1}h", s as f64 / 3600.0))
                    .unwrap_or_else(|| "an unspecified amount of".to_string());
                match quality {
                    Some(q) => format!("slept {duration}, quality {q}/10"),
                    None => format!("slept {duration}"),
                }
            }
        };
        let mut sentence = format!("[{}] at {}, {}", self.payload.kind().as_str(), at, body);
        if let Some(notes) = &self.notes {
            sentence.push_str(&format!(" (notes: {notes})"));
        }
        sentence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Earn,
    Spend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsLedgerEntry {
    pub id: Uuid,
    pub user: UserId,
    pub kind: LedgerEntryKind,
    /// Always > 0; direction is carried by `kind`, not sign.
    pub amount: i64,
    pub reason: String,
    pub description: Option<String>,
    pub related_record: Option<Uuid>,
    pub balance_after: i64,
    pub timestamp: DateTime<Utc>,
}

/// Reasons in this set are subject to I3: at most one `earn` entry per
/// (user, reason, calendar day).
pub fn is_daily_unique_reason(reason: &str) -> bool {
    reason == "daily_login"
        || reason == "water_goal_met"
        || reason.starts_with("streak_") && reason.ends_with("_bonus")
}

/// Reasons in this set grant at most once per user, ever, rather than once
/// per calendar day. `LedgerStore::earn` enforces this the same way it
/// enforces daily uniqueness: a fixed `award_date` sentinel feeds the same
/// `(user, reason, award_date)` unique index, so a repeat `earn` call for an
/// already-awarded achievement is a no-op (`EarnOutcome::AlreadyAwardedToday`)
/// rather than a duplicate payout, even if the caller re-evaluates the same
/// achievement after a crash.
pub fn is_lifetime_unique_reason(reason: &str) -> bool {
    reason.starts_with("achievement:")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// Tagged unlock predicate, static at build time (§3 catalog).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AchievementPredicate {
    Streak { days: u32 },
    TotalRecords { n: u32 },
    TotalOfKind { kind: HealthRecordKind, n: u32 },
    FirstRecord,
    GoalReached,
    WaterStreak { days: u32 },
    CalorieStreak { days: u32 },
    SleepStreak { days: u32 },
    EarlyMorningStreak { days: u32 },
    PerfectWeek,
    SocialShares { n: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub category: String,
    pub icon: String,
    pub points_reward: i64,
    pub rarity: Rarity,
    pub predicate: AchievementPredicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderSchedule {
    TimeOfDay {
        hour: u8,
        minute: u8,
        weekdays: Vec<Weekday>,
    },
    Interval {
        every_minutes: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderSetting {
    pub id: Uuid,
    pub user: UserId,
    pub reminder_type: String,
    pub enabled: bool,
    pub schedule: ReminderSchedule,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Materialized next-fire time, recomputed on every write so
    /// `list_due` stays an indexed range scan (§4.12.1).
    pub next_fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user: UserId,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Checkin,
    Dialogue,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::Checkin => "checkin",
            MemoryKind::Dialogue => "dialogue",
        }
    }
}

/// Short-term buffer entry (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub user: UserId,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongTermKind {
    Checkin,
    DialogueSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermMetadata {
    pub user: UserId,
    pub kind: LongTermKind,
    pub timestamp: DateTime<Utc>,
    pub importance: Importance,
    pub retention_until: DateTime<Utc>,
}

/// Long-term memory document (C4), embedding carried alongside content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub metadata: LongTermMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEventKind {
    Illness,
    Travel,
    SocialEngagement,
    HighStress,
}

impl ContextEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextEventKind::Illness => "illness",
            ContextEventKind::Travel => "travel",
            ContextEventKind::SocialEngagement => "social_engagement",
            ContextEventKind::HighStress => "high_stress",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEvent {
    pub id: Uuid,
    pub user: UserId,
    pub kind: ContextEventKind,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
    pub evidence: Option<String>,
    /// Travel events carry an explicit end date instead of a fixed TTL;
    /// other kinds set this from `detected_at + kind TTL`.
    pub expires_at: DateTime<Utc>,
}

impl ContextEvent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Chat,
    Push,
    Email,
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
    Deduped,
}

impl NotificationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationQueueEntry {
    pub id: Uuid,
    pub user: UserId,
    pub notification_type: String,
    pub title: String,
    pub content: String,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// High-priority escalations may bypass quiet hours (§5 cancellation
    /// rules).
    pub bypass_quiet_hours: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbVariant {
    pub key: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: String,
    pub name: String,
    pub variants: Vec<AbVariant>,
}

impl AbTest {
    pub fn weights_sum_to_one(&self) -> bool {
        let sum: f64 = self.variants.iter().map(|v| v.weight).sum();
        (sum - 1.0).abs() < 1e-6
    }

    /// Stable per-user variant assignment: hash `(test_id, user)` into
    /// `[0, 1)` and walk the cumulative weight table.
    pub fn assign(&self, user: UserId) -> Option<&str> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.id.hash(&mut hasher);
        user.hash(&mut hasher);
        let bucket = (hasher.finish() as f64) / (u64::MAX as f64);

        let mut cumulative = 0.0;
        for variant in &self.variants {
            cumulative += variant.weight;
            if bucket < cumulative {
                return Some(&variant.key);
            }
        }
        self.variants.last().map(|v| v.key.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbResult {
    pub test_id: String,
    pub user: UserId,
    pub variant: String,
    pub outcome: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quiet_hours_same_day_window() {
        let qh = QuietHours { start_hour: 9, end_hour: 17 };
        assert!(qh.contains_hour(12));
        assert!(!qh.contains_hour(8));
        assert!(!qh.contains_hour(17));
    }

    #[test]
    fn quiet_hours_wraps_midnight() {
        let qh = QuietHours { start_hour: 22, end_hour: 8 };
        assert!(qh.contains_hour(23));
        assert!(qh.contains_hour(0));
        assert!(qh.contains_hour(7));
        assert!(!qh.contains_hour(8));
        assert!(!qh.contains_hour(21));
    }

    #[test]
    fn decision_mode_alpha_and_llm_usage() {
        assert_eq!(DecisionMode::Conservative.alpha(), 0.8);
        assert!(!DecisionMode::Conservative.uses_llm());
        assert!(DecisionMode::Balanced.uses_llm());
        assert!(DecisionMode::Intelligent.uses_llm());
    }

    #[test]
    fn decision_mode_round_trips_through_str() {
        for mode in [
            DecisionMode::Conservative,
            DecisionMode::Balanced,
            DecisionMode::Intelligent,
        ] {
            assert_eq!(DecisionMode::parse_str(mode.as_str()), Some(mode));
        }
        assert_eq!(DecisionMode::parse_str("unknown"), None);
    }

    #[test]
    fn canonical_sentence_names_kind_and_payload() {
        let record = HealthRecord {
            id: Uuid::new_v4(),
            user: UserId(1),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap(),
            payload: HealthPayload::Meal { calories: Some(320.0), description: Some("oatmeal".into()) },
            notes: None,
        };
        let sentence = record.canonical_sentence();
        assert!(sentence.starts_with("[meal] at 08:00"));
        assert!(sentence.contains("oatmeal"));
        assert!(sentence.contains("320"));
    }

    #[test]
    fn canonical_sentence_appends_notes() {
        let record = HealthRecord {
            id: Uuid::new_v4(),
            user: UserId(1),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap(),
            payload: HealthPayload::Water { milliliters: 250 },
            notes: Some("after workout".into()),
        };
        assert!(record.canonical_sentence().contains("notes: after workout"));
    }

    #[test]
    fn daily_unique_reason_matches_expected_set() {
        assert!(is_daily_unique_reason("daily_login"));
        assert!(is_daily_unique_reason("water_goal_met"));
        assert!(is_daily_unique_reason("streak_7_bonus"));
        assert!(!is_daily_unique_reason("record_weight"));
    }

    #[test]
    fn lifetime_unique_reason_matches_achievement_rewards_only() {
        assert!(is_lifetime_unique_reason("achievement:first_record"));
        assert!(!is_lifetime_unique_reason("daily_login"));
        assert!(!is_lifetime_unique_reason("record_weight"));
    }

    #[test]
    fn ab_test_assignment_is_stable() {
        let test = AbTest {
            id: "t1".into(),
            name: "test".into(),
            variants: vec![
                AbVariant { key: "a".into(), weight: 0.5 },
                AbVariant { key: "b".into(), weight: 0.5 },
            ],
        };
        assert!(test.weights_sum_to_one());
        let first = test.assign(UserId(42));
        let second = test.assign(UserId(42));
        assert_eq!(first, second);
    }
}

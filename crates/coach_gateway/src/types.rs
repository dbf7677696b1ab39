//! Inbound/outbound wire shapes for the HTTP surface (§6.1). DTO-to-domain
//! conversion lives on each type rather than in the handler, keeping
//! the axum handlers themselves free of parsing logic.

use chrono::{DateTime, Utc};
use coach_core::{ChatRole, DecisionMode, HealthPayload, HealthRecord, QuietHours, ReminderSchedule, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RecordCreatedRequest {
    pub user_id: i64,
    #[serde(flatten)]
    pub payload: HealthPayload,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordCreatedRequest {
    pub fn into_record(self, now: DateTime<Utc>) -> HealthRecord {
        HealthRecord {
            id: Uuid::new_v4(),
            user: UserId(self.user_id),
            timestamp: self.timestamp.unwrap_or(now),
            payload: self.payload,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DialogueMessageRequest {
    pub user_id: i64,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub reminder_type: String,
    pub enabled: bool,
    pub schedule: ReminderSchedule,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PreferencesPatch {
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub decision_mode: Option<DecisionMode>,
    #[serde(default)]
    pub communication_style: Option<String>,
    #[serde(default)]
    pub preferences: Option<serde_json::Value>,
    #[serde(default)]
    pub timezone_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRateLimitsQuery {
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub accepted: bool,
}

impl Accepted {
    pub fn new() -> Self {
        Self { accepted: true }
    }
}

impl Default for Accepted {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

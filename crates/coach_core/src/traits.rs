//! Shared async trait contracts implemented by `coach_memory`,
//! `coach_reasoning`, `coach_scheduler` and `coach_gateway`. Keeping these
//! here (rather than in the crate that happens to implement them first)
//! is what lets the composition root in `coach_cli` wire concrete types
//! behind `Arc<dyn Trait>` without a dependency cycle.

use crate::clock::Clock;
use crate::domain::*;
use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------
// C2 — Ledger Store
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum EarnOutcome {
    Earned { points_earned: i64, balance_after: i64 },
    AlreadyAwardedToday,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpendOutcome {
    Spent { balance_after: i64 },
    InsufficientFunds,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn earn(
        &self,
        user: UserId,
        reason: &str,
        amount: i64,
        related_record: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> CoreResult<EarnOutcome>;

    async fn spend(&self, user: UserId, reason: &str, amount: i64) -> CoreResult<SpendOutcome>;

    async fn history(
        &self,
        user: UserId,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<PointsLedgerEntry>, u64)>;

    async fn balance(&self, user: UserId) -> CoreResult<i64>;
}

// ---------------------------------------------------------------------
// C3 — Short-Term Buffer
// ---------------------------------------------------------------------

#[async_trait]
pub trait ShortTermBuffer: Send + Sync {
    async fn add(&self, user: UserId, kind: MemoryKind, entry: MemoryEntry) -> CoreResult<()>;

    /// Newest-last merged sequence respecting per-kind limits.
    async fn combined_context(
        &self,
        user: UserId,
        checkin_limit: usize,
        dialogue_limit: usize,
    ) -> CoreResult<Vec<MemoryEntry>>;

    async fn checkin_count(&self, user: UserId) -> CoreResult<usize>;
    async fn dialogue_count(&self, user: UserId) -> CoreResult<usize>;
}

// ---------------------------------------------------------------------
// C4 — Long-Term Store
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LongTermFilter {
    pub user: UserId,
    pub kind: Option<LongTermKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LongTermMatch {
    pub entry: LongTermEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionPolicy {
    pub importance_threshold: Importance,
}

#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn add(&self, entry: LongTermEntry) -> CoreResult<()>;

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: LongTermFilter,
    ) -> CoreResult<Vec<LongTermMatch>>;

    async fn compress(&self, user: UserId, policy: CompressionPolicy) -> CoreResult<usize>;
}

// ---------------------------------------------------------------------
// User profile store (backs C5's profile-highlight step, C8's
// decision_mode/quiet_hours lookups, C9's motivation_type/communication_style,
// C11's points/achievement mutation). UserProfile itself is part of the §3
// data model; this is the store contract every component reads/writes it
// through, mirroring how LedgerStore gives C2 a store contract.
// ---------------------------------------------------------------------

#[async_trait]
pub trait UserProfileStore: Send + Sync {
    async fn get(&self, user: UserId) -> CoreResult<UserProfile>;
    async fn save(&self, profile: UserProfile) -> CoreResult<()>;

    /// Every user with a stored profile, for the Achievement Evaluator's
    /// daily midnight tick (§4.11) which must sweep every user rather
    /// than just the one that triggered a record-created event.
    async fn list_all(&self) -> CoreResult<Vec<UserId>>;
}

// ---------------------------------------------------------------------
// C5 — Memory Manager
// ---------------------------------------------------------------------

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a dialogue span into one long-term entry's worth of
    /// text. Must never fail the caller — implementations fall back to a
    /// naive truncation/concatenation on LLM failure.
    async fn summarize_dialogue(&self, turns: &[MemoryEntry]) -> String;
}

#[derive(Debug, Clone)]
pub struct MemoryContextRequest {
    pub user: UserId,
    pub query: Option<String>,
    pub checkin_limit: usize,
    pub dialogue_limit: usize,
    pub include_long_term: bool,
}

impl MemoryContextRequest {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            query: None,
            checkin_limit: 15,
            dialogue_limit: 20,
            include_long_term: true,
        }
    }
}

#[async_trait]
pub trait MemoryManager: Send + Sync {
    async fn record_checkin(
        &self,
        user: UserId,
        canonical_sentence: String,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> CoreResult<()>;

    async fn record_dialogue(
        &self,
        user: UserId,
        role: ChatRole,
        content: String,
        now: DateTime<Utc>,
    ) -> CoreResult<()>;

    async fn get_context(&self, request: MemoryContextRequest) -> CoreResult<String>;
}

// ---------------------------------------------------------------------
// C6 — Event Detector
// ---------------------------------------------------------------------

#[async_trait]
pub trait EventDetector: Send + Sync {
    async fn detect(
        &self,
        user: UserId,
        decision_mode: DecisionMode,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<ContextEvent>>;
}

// ---------------------------------------------------------------------
// C7 — Engagement & Effectiveness Tracker
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectivenessBucket {
    High,
    Medium,
    Low,
    Negative,
}

#[derive(Debug, Clone, Copy)]
pub struct EngagementSnapshot {
    pub score: f64,
    pub level: EngagementLevel,
}

#[async_trait]
pub trait EngagementTracker: Send + Sync {
    async fn record_login(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<()>;
    async fn record_record_created(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<()>;
    /// Recorded by the scheduler (C10) at dispatch time, ahead of any
    /// interaction response, so `remaining_daily_budget` can count
    /// today's sends without waiting on an open/click/dismiss that may
    /// never arrive.
    async fn record_sent(&self, user: UserId, notification_type: &str, now: DateTime<Utc>) -> CoreResult<()>;
    async fn record_interaction(
        &self,
        user: UserId,
        notification_type: &str,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> CoreResult<()>;

    async fn engagement_snapshot(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<EngagementSnapshot>;
    async fn effectiveness(&self, user: UserId, notification_type: &str) -> CoreResult<EffectivenessBucket>;
    async fn optimal_send_hours(&self, user: UserId, notification_type: &str) -> CoreResult<Vec<u8>>;
    async fn remaining_daily_budget(&self, user: UserId, level: EngagementLevel, now: DateTime<Utc>) -> CoreResult<u32>;
    /// Most recent `record_sent` timestamp for this type, backing the
    /// decision engine's min-interval-since-last-send hard gate (§4.8).
    async fn last_sent_at(&self, user: UserId, notification_type: &str) -> CoreResult<Option<DateTime<Utc>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Open,
    Click,
    Dismiss,
    Negative,
}

// ---------------------------------------------------------------------
// C8 — Decision Engine
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Send,
    Defer { until: DateTime<Utc> },
    Drop { reason: String },
}

#[derive(Debug, Clone)]
pub struct DecisionFactor {
    pub name: String,
    pub contribution: f64,
}

#[derive(Debug, Clone)]
pub struct DecisionRationale {
    pub factors: Vec<DecisionFactor>,
    pub score: f64,
    pub mode: DecisionMode,
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub verdict: Verdict,
    pub rationale: DecisionRationale,
}

#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub user: UserId,
    pub notification_type: String,
    pub now: DateTime<Utc>,
    pub bypass_quiet_hours: bool,
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, input: DecisionInput) -> CoreResult<DecisionOutcome>;
}

// ---------------------------------------------------------------------
// C9 — Message Generator
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RichActionKind {
    Text,
    Card,
    QuickReply,
    Form,
}

#[derive(Debug, Clone)]
pub struct GeneratedMessage {
    pub title: String,
    pub body: String,
    pub rich_actions: Vec<RichActionKind>,
    pub channel_hint: Channel,
}

#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub user: UserId,
    pub notification_type: String,
    pub rationale: DecisionRationale,
    pub plan_payload: Option<serde_json::Value>,
}

#[async_trait]
pub trait MessageGenerator: Send + Sync {
    async fn generate(&self, request: MessageRequest) -> CoreResult<GeneratedMessage>;
}

// ---------------------------------------------------------------------
// C10 — channel adapters (delivery side, implemented in coach_gateway)
// ---------------------------------------------------------------------

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;
    async fn deliver(&self, entry: &NotificationQueueEntry) -> CoreResult<()>;
}

// ---------------------------------------------------------------------
// Record store read client (§2's "Record Store (external)" — this core
// never owns health-record writes, but C6 and C11 both need a read path
// into it; this is that boundary, the same role `LlmClient` plays for
// the external LLM dependency).
// ---------------------------------------------------------------------

#[async_trait]
pub trait HealthRecordReader: Send + Sync {
    async fn records_since(&self, user: UserId, since: DateTime<Utc>) -> CoreResult<Vec<HealthRecord>>;
    async fn latest_of_kind(&self, user: UserId, kind: HealthRecordKind) -> CoreResult<Option<HealthRecord>>;
}

/// The write side of the same boundary, needed because this core, unlike
/// the full application, owns no Intake API of its own; the composition
/// root needs a local durable record store to
/// feed `HealthRecordReader` so C6/C11 have real history to evaluate
/// against, so `coach_scheduler`'s event producer writes here on every
/// `record_created` bus event before invoking C5/C11 on it.
#[async_trait]
pub trait HealthRecordWriter: Send + Sync {
    async fn insert(&self, record: HealthRecord) -> CoreResult<()>;
}

// ---------------------------------------------------------------------
// C10 — Notification queue persistence (the store `coach_scheduler`
// writes `NotificationQueueEntry` state transitions through; same role
// `LedgerStore` plays for the points ledger). Decision rationale (§4.8's
// audit requirement, I7/P5) rides along in `NotificationQueueEntry.payload`
// rather than a separate verdict store, since a verdict is only persisted
// once a queue entry is actually written (a `drop` before that point never
// materializes one).
// ---------------------------------------------------------------------

#[async_trait]
pub trait NotificationQueueStore: Send + Sync {
    async fn insert(&self, entry: NotificationQueueEntry) -> CoreResult<()>;

    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;

    /// Entries for `(user, notification_type)` whose `scheduled_at` falls
    /// in the same local hour as `scheduled_hour`, in status `pending` or
    /// `sent` — the dedup check in §4.10 step 2.
    async fn find_in_scheduled_hour(
        &self,
        user: UserId,
        notification_type: &str,
        scheduled_hour: DateTime<Utc>,
    ) -> CoreResult<Vec<NotificationQueueEntry>>;

    async fn list_pending_for_user(&self, user: UserId) -> CoreResult<Vec<NotificationQueueEntry>>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<NotificationQueueEntry>>;
}

// ---------------------------------------------------------------------
// C11 — Achievement Evaluator
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AchievementUnlock {
    pub user: UserId,
    pub achievement: String,
    pub reward_amount: i64,
}

#[async_trait]
pub trait AchievementEvaluator: Send + Sync {
    async fn evaluate_on_record(
        &self,
        user: UserId,
        record: &HealthRecord,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<AchievementUnlock>>;

    async fn evaluate_daily(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<Vec<AchievementUnlock>>;
}

// ---------------------------------------------------------------------
// C12 — Reminder Settings Store
// ---------------------------------------------------------------------

#[async_trait]
pub trait ReminderSettingsStore: Send + Sync {
    async fn upsert(&self, setting: ReminderSetting) -> CoreResult<()>;
    async fn get(&self, user: UserId, reminder_type: &str) -> CoreResult<Option<ReminderSetting>>;
    async fn list_for_user(&self, user: UserId) -> CoreResult<Vec<ReminderSetting>>;
    async fn list_due(&self, now: DateTime<Utc>) -> CoreResult<Vec<ReminderSetting>>;
}

// ---------------------------------------------------------------------
// LLM client contract (§9 design note: single chat_completion contract)
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LlmParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self { max_tokens: 512, temperature: 0.3 }
    }
}

#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub text: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        params: LlmParams,
    ) -> anyhow::Result<LlmCompletion>;
}


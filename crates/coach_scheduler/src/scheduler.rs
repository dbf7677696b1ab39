//! C10 — scheduler & delivery loop. Two producers (timer, event) feed a
//! shared `mpsc` that a fixed worker pool drains; each worker claims a
//! user's [`crate::mailbox::UserRegistry`] lock before running that
//! user's candidate through dedup → decide → generate → deliver, so two
//! workers can never touch the same user concurrently while different
//! users proceed fully in parallel (§4.10.1). Producer/shutdown shape is
//! a `tokio::select!` loop over ticks, bus events, and a cancellation
//! token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use coach_core::{
    AchievementEvaluator, Channel, ChannelAdapter, Clock, CoreResult, DecisionEngine,
    DecisionInput, EngagementTracker, HealthPayload, HealthRecord, HealthRecordReader,
    LedgerStore, MessageGenerator, MessageRequest, NotificationQueueEntry,
    NotificationQueueStore, NotificationStatus, PointsConfig, ReminderSettingsStore, UserId,
    UserProfileStore, Verdict,
};
use coach_reasoning::retry::{with_retry, RetryConfig};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{BusEvent, EventBus};
use crate::candidate::{Candidate, CandidateSource};
use crate::mailbox::UserRegistry;
use crate::timer;

const QUEUE_CAPACITY: usize = 4096;
const MAX_DELIVERY_RETRIES: u32 = 3;

pub struct SchedulerDeps {
    pub clock: Arc<dyn Clock>,
    pub decision: Arc<dyn DecisionEngine>,
    pub message_generator: Arc<dyn MessageGenerator>,
    pub engagement: Arc<dyn EngagementTracker>,
    pub profiles: Arc<dyn UserProfileStore>,
    pub queue: Arc<dyn NotificationQueueStore>,
    pub reminders: Arc<dyn ReminderSettingsStore>,
    pub achievements: Arc<dyn AchievementEvaluator>,
    pub ledger: Arc<dyn LedgerStore>,
    pub records: Arc<dyn HealthRecordReader>,
    pub points: PointsConfig,
    pub bus: EventBus,
    pub channel_adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    pub retry_config: RetryConfig,
    pub worker_count: usize,
}

pub struct SchedulerService {
    deps: SchedulerDeps,
    registry: UserRegistry,
    tx: mpsc::Sender<Candidate>,
    rx: Mutex<Option<mpsc::Receiver<Candidate>>>,
}

impl SchedulerService {
    pub fn new(deps: SchedulerDeps) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Arc::new(Self { deps, registry: UserRegistry::new(), tx, rx: Mutex::new(Some(rx)) })
    }

    pub fn enqueue(&self, candidate: Candidate) {
        if self.tx.try_send(candidate).is_err() {
            tracing::warn!("scheduler queue full or closed, dropping candidate");
        }
    }

    fn cancel_user(&self, user: UserId) {
        self.registry.cancel_user(user);
    }

    /// Quiet-hour entry / user deactivation: cancel every still-pending
    /// candidate for this user that doesn't carry `bypass_quiet_hours`
    /// (§5, B2). High-priority escalations already in flight are left
    /// alone.
    pub async fn cancel_pending_for_user(&self, user: UserId) -> CoreResult<usize> {
        self.cancel_user(user);
        let pending = self.deps.queue.list_pending_for_user(user).await?;
        let mut cancelled = 0;
        for entry in pending {
            if entry.bypass_quiet_hours {
                continue;
            }
            self.deps.queue.update_status(entry.id, NotificationStatus::Cancelled, None).await?;
            cancelled += 1;
        }
        metric("notification.cancelled.quiet_hours_or_deactivation", cancelled as f64, user);
        Ok(cancelled)
    }

    /// Runs the timer producer, event producer, and worker pool until
    /// `shutdown` fires. In-flight candidates are given `shutdown_grace`
    /// (default 5s, §5) before the loop returns regardless.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let shutdown_grace = std::time::Duration::from_secs(5);

        let mut handles = Vec::new();

        {
            let this = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { this.run_timer_producer(shutdown).await }));
        }
        {
            let this = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { this.run_event_producer(shutdown).await }));
        }
        {
            let this = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { this.run_daily_achievement_sweep(shutdown).await }));
        }

        let rx = self.rx.lock().await.take().expect("run() called more than once");
        let worker_count = self.deps.worker_count.max(1);
        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..worker_count {
            let this = self.clone();
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { this.run_worker(rx, shutdown).await }));
        }

        shutdown.cancelled().await;
        tracing::info!("scheduler shutdown signal received, draining in-flight work");
        self.registry.cancel_all();

        let drain = futures_join_all(handles);
        if tokio::time::timeout(shutdown_grace, drain).await.is_err() {
            tracing::warn!("scheduler shutdown grace period elapsed, forcing exit");
        }
    }

    async fn run_timer_producer(&self, shutdown: CancellationToken) {
        loop {
            let now = self.deps.clock.now();
            let next_tick = now + ChronoDuration::minutes(1);

            let due = self.deps.reminders.list_due(now).await.unwrap_or_default();
            for setting in due {
                let profile = match self.deps.profiles.get(setting.user).await {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::warn!(error = %err, user = %setting.user, "skipping due reminder, profile unavailable");
                        continue;
                    }
                };
                self.enqueue(Candidate::new(setting.user, setting.reminder_type.clone(), now, CandidateSource::Timer));

                let mut updated = setting;
                updated.next_fire_at = timer::next_fire_after(&updated.schedule, now, profile.timezone_offset_minutes);
                if let Err(err) = self.deps.reminders.upsert(updated).await {
                    tracing::warn!(error = %err, "failed to materialize next reminder fire time");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.deps.clock.sleep_until(next_tick) => {}
            }
        }
    }

    async fn run_event_producer(&self, shutdown: CancellationToken) {
        let mut rx = self.deps.bus.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = rx.recv() => {
                    match event {
                        Ok(event) => self.handle_bus_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event producer lagged, some bus events were dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    /// §4.11 "on every record-created event and on daily midnight tick":
    /// the record-created half is `handle_bus_event`; this covers the
    /// tick, sweeping every user so streak/perfect-week predicates that
    /// depend on "today" still ending don't wait for the user's next
    /// record to be (re-)evaluated.
    async fn run_daily_achievement_sweep(&self, shutdown: CancellationToken) {
        loop {
            let now = self.deps.clock.now();
            let next_midnight = (now + ChronoDuration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
                .unwrap_or(now + ChronoDuration::days(1));

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.deps.clock.sleep_until(next_midnight) => {}
            }

            let tick_now = self.deps.clock.now();
            let users = match self.deps.profiles.list_all().await {
                Ok(users) => users,
                Err(err) => {
                    tracing::warn!(error = %err, "daily achievement sweep: failed to list users");
                    continue;
                }
            };
            for user in users {
                if let Err(err) = self.award_streak_bonus(user, tick_now).await {
                    tracing::warn!(error = %err, %user, "daily streak bonus evaluation failed");
                }
                match self.deps.achievements.evaluate_daily(user, tick_now).await {
                    Ok(unlocks) => {
                        for unlock in unlocks {
                            self.deps.bus.publish(BusEvent::AchievementUnlocked { unlock });
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, %user, "daily achievement evaluation failed"),
                }
            }
        }
    }

    /// Base per-record points (§1 "writes an append-only points ledger on
    /// every logged health event"). Runs before achievement evaluation so a
    /// record that also unlocks an achievement produces the base-points
    /// entry first, matching the order the two kinds of reward occur in.
    async fn award_record_points(&self, record: &HealthRecord, now: DateTime<Utc>) {
        let reason = format!("record_{}", record.payload.kind().as_str());
        if let Err(err) = self
            .deps
            .ledger
            .earn(record.user, &reason, self.deps.points.record_base_points, Some(record.id), now)
            .await
        {
            tracing::warn!(error = %err, user = %record.user, "failed to award base record points");
        }
    }

    /// Every record-created event is a production "the user is here today"
    /// signal (§1's `daily_login` reason, §4.11's daily-unique reasons) —
    /// there's no separate session/auth surface in this core, so the
    /// record-created path doubles as the login hook. `daily_login` is
    /// daily-unique, so repeated records on the same day are no-ops after
    /// the first.
    async fn award_daily_login(&self, record: &HealthRecord, now: DateTime<Utc>) {
        if let Err(err) = self
            .deps
            .ledger
            .earn(record.user, "daily_login", self.deps.points.daily_login_points, None, now)
            .await
        {
            tracing::warn!(error = %err, user = %record.user, "failed to award daily login points");
        }
    }

    async fn water_intake_today(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<u32> {
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
            .unwrap_or(now);
        let today = self.deps.records.records_since(user, day_start).await?;
        Ok(today
            .iter()
            .filter_map(|r| match r.payload {
                HealthPayload::Water { milliliters } => Some(milliliters),
                _ => None,
            })
            .sum())
    }

    /// `water_goal_met` (§4.11's daily-unique reasons): awarded the first
    /// time a user's cumulative water intake for the day crosses the
    /// configured goal. Re-checked on every water record for the day, but
    /// the daily-unique reason means only the crossing record actually
    /// earns.
    async fn award_water_goal(&self, record: &HealthRecord, now: DateTime<Utc>) {
        if !matches!(record.payload, HealthPayload::Water { .. }) {
            return;
        }
        let total_ml = match self.water_intake_today(record.user, now).await {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(error = %err, user = %record.user, "failed to read today's water intake");
                return;
            }
        };
        if total_ml < self.deps.points.daily_water_goal_ml {
            return;
        }
        if let Err(err) = self
            .deps
            .ledger
            .earn(record.user, "water_goal_met", self.deps.points.water_goal_points, None, now)
            .await
        {
            tracing::warn!(error = %err, user = %record.user, "failed to award water goal points");
        }
    }

    /// `streak_N_bonus` (§4.11's daily-unique reasons): a recurring daily
    /// bonus distinct from the one-time `streak_7` catalog achievement —
    /// awarded every day the user's current any-record streak reaches the
    /// configured length, not just once at the milestone.
    async fn award_streak_bonus(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        let days = self.deps.points.streak_bonus_days;
        let since = now - ChronoDuration::days(days as i64 + 3);
        let history = self.deps.records.records_since(user, since).await?;
        let active_days: std::collections::HashSet<_> =
            history.iter().map(|r| r.timestamp.date_naive()).collect();

        let mut streak = 0u32;
        let mut cursor = now.date_naive();
        while active_days.contains(&cursor) {
            streak += 1;
            cursor -= ChronoDuration::days(1);
        }
        if streak < days {
            return Ok(());
        }

        let reason = format!("streak_{days}_bonus");
        self.deps.ledger.earn(user, &reason, self.deps.points.streak_bonus_points, None, now).await?;
        Ok(())
    }

    async fn handle_bus_event(&self, event: BusEvent) {
        let now = self.deps.clock.now();
        let candidate = match event {
            BusEvent::RecordCreated { record } => {
                self.award_record_points(&record, now).await;
                self.award_daily_login(&record, now).await;
                self.award_water_goal(&record, now).await;
                if let Err(err) = self.award_streak_bonus(record.user, now).await {
                    tracing::warn!(error = %err, user = %record.user, "streak bonus evaluation failed");
                }

                if let Err(err) = self.deps.engagement.record_record_created(record.user, now).await {
                    tracing::warn!(error = %err, user = %record.user, "failed to record engagement for created record");
                }
                match self.deps.achievements.evaluate_on_record(record.user, &record, now).await {
                    Ok(unlocks) => {
                        for unlock in unlocks {
                            self.deps.bus.publish(BusEvent::AchievementUnlocked { unlock });
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, user = %record.user, "achievement evaluation failed"),
                }
                return;
            }
            BusEvent::AchievementUnlocked { unlock } => {
                Candidate::new(unlock.user, "achievement_unlocked", now, CandidateSource::Event)
            }
            BusEvent::GoalThresholdCrossed { user, .. } => {
                Candidate::new(user, "goal_threshold", now, CandidateSource::Event)
            }
            BusEvent::AnomalyDetected { user, .. } => {
                Candidate::new(user, "anomaly_alert", now, CandidateSource::Event).with_bypass_quiet_hours(true)
            }
        };
        self.enqueue(candidate);
    }

    async fn run_worker(&self, rx: Arc<Mutex<mpsc::Receiver<Candidate>>>, shutdown: CancellationToken) {
        loop {
            let candidate = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    next = rx.recv() => next,
                }
            };
            let Some(candidate) = candidate else { return };

            let lock = self.registry.lock_for(candidate.user);
            let _guard = lock.lock().await;
            let cancel_token = self.registry.cancel_token_for(candidate.user);
            if cancel_token.is_cancelled() {
                continue;
            }

            if let Err(err) = self.process_candidate(candidate).await {
                tracing::error!(error = %err, "candidate processing failed");
            }
        }
    }

    /// The per-user loop body from §4.10, steps 1-6, run with the caller
    /// already holding that user's single-flight lock.
    pub async fn process_candidate(&self, candidate: Candidate) -> CoreResult<()> {
        let cancel_token = self.registry.cancel_token_for(candidate.user);

        // Step 2 — dedup.
        let existing = self
            .deps
            .queue
            .find_in_scheduled_hour(candidate.user, &candidate.notification_type, candidate.scheduled_at)
            .await?;
        if !existing.is_empty() {
            self.deps
                .queue
                .insert(dedup_entry(&candidate))
                .await?;
            metric("notification.deduped", 1.0, candidate.user);
            return Ok(());
        }

        // Step 3 — decide.
        let outcome = self
            .deps
            .decision
            .decide(DecisionInput {
                user: candidate.user,
                notification_type: candidate.notification_type.clone(),
                now: self.deps.clock.now(),
                bypass_quiet_hours: candidate.bypass_quiet_hours,
            })
            .await?;

        let entry = match outcome.verdict {
            Verdict::Drop { reason } => {
                tracing::info!(user = %candidate.user, notification_type = %candidate.notification_type, reason = %reason, "decision: drop");
                if reason.contains("quiet_hours") {
                    metric("notification.dropped.quiet_hours", 1.0, candidate.user);
                } else {
                    metric("notification.dropped", 1.0, candidate.user);
                }
                return Ok(());
            }
            Verdict::Defer { until } => {
                tracing::info!(user = %candidate.user, notification_type = %candidate.notification_type, until = %until, "decision: defer");
                metric("notification.deferred", 1.0, candidate.user);
                let mut deferred = candidate;
                deferred.scheduled_at = until;
                self.enqueue(deferred);
                return Ok(());
            }
            Verdict::Send => {
                if cancel_token.is_cancelled() {
                    return Ok(());
                }

                // Step 4 — generate.
                let message = self
                    .deps
                    .message_generator
                    .generate(MessageRequest {
                        user: candidate.user,
                        notification_type: candidate.notification_type.clone(),
                        rationale: outcome.rationale.clone(),
                        plan_payload: None,
                    })
                    .await?;

                NotificationQueueEntry {
                    id: Uuid::new_v4(),
                    user: candidate.user,
                    notification_type: candidate.notification_type.clone(),
                    title: message.title,
                    content: message.body,
                    channel: message.channel_hint,
                    status: NotificationStatus::Pending,
                    scheduled_at: candidate.scheduled_at,
                    sent_at: None,
                    payload: Some(rationale_payload(&outcome.rationale)),
                    bypass_quiet_hours: candidate.bypass_quiet_hours,
                }
            }
        };

        // Step 5 — write pending, hand to channel adapter, retry with
        // backoff, then dead-letter.
        let id = entry.id;
        let channel = entry.channel;
        self.deps.queue.insert(entry.clone()).await?;

        if cancel_token.is_cancelled() {
            self.deps.queue.update_status(id, NotificationStatus::Cancelled, None).await?;
            return Ok(());
        }

        let Some(adapter) = self.deps.channel_adapters.get(&channel).cloned() else {
            tracing::warn!(?channel, "no channel adapter configured, marking failed");
            self.deps.queue.update_status(id, NotificationStatus::Failed, None).await?;
            return Ok(());
        };

        let retry_config = RetryConfig { max_attempts: MAX_DELIVERY_RETRIES, ..self.deps.retry_config };
        let delivery = with_retry(&retry_config, "scheduler.deliver", |_: &coach_core::CoreError| true, {
            let adapter = adapter.clone();
            let entry = entry.clone();
            move || {
                let adapter = adapter.clone();
                let entry = entry.clone();
                async move { adapter.deliver(&entry).await }
            }
        })
        .await;

        match delivery {
            Ok(()) => {
                let now = self.deps.clock.now();
                self.deps.queue.update_status(id, NotificationStatus::Sent, Some(now)).await?;
                self.deps.engagement.record_sent(candidate.user, &candidate.notification_type, now).await?;
                metric("notification.sent", 1.0, candidate.user);
            }
            Err(err) => {
                tracing::warn!(error = %err, user = %candidate.user, "delivery failed after retries, dead-lettering");
                self.deps.queue.update_status(id, NotificationStatus::Failed, None).await?;
                metric("notification.failed", 1.0, candidate.user);
            }
        }

        Ok(())
    }
}

fn dedup_entry(candidate: &Candidate) -> NotificationQueueEntry {
    NotificationQueueEntry {
        id: Uuid::new_v4(),
        user: candidate.user,
        notification_type: candidate.notification_type.clone(),
        title: String::new(),
        content: String::new(),
        channel: Channel::Chat,
        status: NotificationStatus::Deduped,
        scheduled_at: candidate.scheduled_at,
        sent_at: None,
        payload: None,
        bypass_quiet_hours: candidate.bypass_quiet_hours,
    }
}

fn rationale_payload(rationale: &coach_core::DecisionRationale) -> serde_json::Value {
    serde_json::json!({
        "score": rationale.score,
        "mode": rationale.mode.as_str(),
        "factors": rationale.factors.iter().map(|f| serde_json::json!({"name": f.name, "contribution": f.contribution})).collect::<Vec<_>>(),
    })
}

/// Outbound `metrics(name, value, tags)` (§6) — observability sink stub.
/// A real deployment wires this to whatever `tracing` subscriber layer
/// exports counters; here it's a structured log event carrying the same
/// three fields the interface names.
fn metric(name: &str, value: f64, user: UserId) {
    tracing::info!(metric = name, value, user = %user, "metric");
}

async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

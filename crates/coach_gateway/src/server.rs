//! Inbound HTTP surface (§6.1): an `axum::Router` wrapped in a
//! `CorsLayer`, started via a `start()` that returns a `JoinHandle` so
//! the composition root can await it alongside the scheduler. Every
//! route either publishes
//! onto the event bus or performs a direct, cheap store read-modify-write
//! and returns without waiting on a decision or a delivery attempt (§5).
//!
//! `reminder-setting-changed` and `user-preferences-changed` are plain CRUD
//! against their stores rather than bus events — `BusEvent` only carries
//! the four event kinds the scheduler and engagement tracker actually
//! consume (record creation, achievement unlock, goal crossing, anomaly),
//! and a settings/preferences write has no downstream subscriber. They
//! return `200` with the stored resource instead of `202`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use coach_core::{
    Clock, CoreError, HealthRecordWriter, MemoryContextRequest, MemoryManager,
    ReminderSettingsStore, UserId, UserProfileStore,
};
use coach_scheduler::{timer, BusEvent, EventBus};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::types::{
    Accepted, DialogueMessageRequest, ErrorBody, PreferencesPatch, RecordCreatedRequest,
    ReminderRequest, ResetRateLimitsQuery,
};

#[derive(Clone)]
struct AppState {
    clock: Arc<dyn Clock>,
    bus: EventBus,
    profiles: Arc<dyn UserProfileStore>,
    reminders: Arc<dyn ReminderSettingsStore>,
    memory: Arc<dyn MemoryManager>,
    records: Arc<dyn HealthRecordWriter>,
    shutdown: CancellationToken,
}

pub struct GatewayServer {
    state: AppState,
    host: String,
    port: u16,
}

impl GatewayServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        bus: EventBus,
        profiles: Arc<dyn UserProfileStore>,
        reminders: Arc<dyn ReminderSettingsStore>,
        memory: Arc<dyn MemoryManager>,
        records: Arc<dyn HealthRecordWriter>,
        shutdown: CancellationToken,
        host: &str,
        port: u16,
    ) -> Self {
        Self {
            state: AppState { clock, bus, profiles, reminders, memory, records, shutdown },
            host: host.to_string(),
            port,
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/events/record-created", post(record_created))
            .route("/events/dialogue-message", post(dialogue_message))
            .route("/reminders/:user_id", post(upsert_reminder))
            .route("/users/:user_id/preferences", patch(patch_preferences))
            .route("/admin/shutdown", post(admin_shutdown))
            .route("/admin/reset-rate-limits", post(admin_reset_rate_limits))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Spawns the HTTP server in the background, returning its join handle
    /// so the composition root can await it alongside the scheduler.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.host, self.port);

        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("gateway failed to bind {}: {}", addr, e);
                    return;
                }
            };
            tracing::info!("gateway listening on {}", addr);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("gateway server error: {}", e);
            }
        })
    }
}

fn core_error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Precondition(_) => StatusCode::CONFLICT,
        CoreError::External(_) => StatusCode::BAD_GATEWAY,
        CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: CoreError) -> (StatusCode, Json<ErrorBody>) {
    let status = core_error_status(&err);
    (status, Json(ErrorBody { error: err.to_string() }))
}

async fn health() -> &'static str {
    "ok"
}

/// §2's data-flow: Intake API -> Record Store -> Memory Manager write ->
/// (bus) -> Achievement Evaluator / Scheduler. This handler owns the
/// first two steps synchronously (so a reader of the record immediately
/// after the 202 sees it) and hands the rest to the bus so the edge never
/// waits on a decision or a delivery attempt (§5).
async fn record_created(
    State(state): State<AppState>,
    Json(body): Json<RecordCreatedRequest>,
) -> impl IntoResponse {
    let now = state.clock.now();
    let record = body.into_record(now);

    if let Err(err) = state.records.insert(record.clone()).await {
        return error_response(err).into_response();
    }

    let canonical = record.canonical_sentence();
    if let Err(err) = state
        .memory
        .record_checkin(record.user, canonical, serde_json::json!({"kind": record.payload.kind()}), now)
        .await
    {
        tracing::warn!(error = %err, user = %record.user, "failed to record check-in in memory manager");
    }

    state.bus.publish(BusEvent::RecordCreated { record });
    (StatusCode::ACCEPTED, Json(Accepted::new())).into_response()
}

async fn dialogue_message(
    State(state): State<AppState>,
    Json(body): Json<DialogueMessageRequest>,
) -> impl IntoResponse {
    let now = state.clock.now();
    match state
        .memory
        .record_dialogue(UserId(body.user_id), body.role, body.content, now)
        .await
    {
        Ok(()) => (StatusCode::ACCEPTED, Json(Accepted::new())).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

async fn upsert_reminder(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<ReminderRequest>,
) -> impl IntoResponse {
    let user = UserId(user_id);
    let now = state.clock.now();

    let profile = match state.profiles.get(user).await {
        Ok(p) => p,
        Err(err) => return error_response(err).into_response(),
    };

    let existing = match state.reminders.get(user, &body.reminder_type).await {
        Ok(existing) => existing,
        Err(err) => return error_response(err).into_response(),
    };

    let next_fire_at = timer::next_fire_after(&body.schedule, now, profile.timezone_offset_minutes);
    let setting = coach_core::ReminderSetting {
        id: existing.map(|e| e.id).unwrap_or_else(Uuid::new_v4),
        user,
        reminder_type: body.reminder_type,
        enabled: body.enabled,
        schedule: body.schedule,
        metadata: body.metadata,
        next_fire_at,
    };

    match state.reminders.upsert(setting.clone()).await {
        Ok(()) => (StatusCode::OK, Json(setting)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

async fn patch_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(patch): Json<PreferencesPatch>,
) -> impl IntoResponse {
    let user = UserId(user_id);
    let mut profile = match state.profiles.get(user).await {
        Ok(p) => p,
        Err(err) => return error_response(err).into_response(),
    };

    if let Some(quiet_hours) = patch.quiet_hours {
        profile.quiet_hours = quiet_hours;
    }
    if let Some(decision_mode) = patch.decision_mode {
        profile.decision_mode = decision_mode;
    }
    if let Some(style) = patch.communication_style {
        profile.communication_style = style;
    }
    if let Some(preferences) = patch.preferences {
        profile.preferences = preferences;
    }
    if let Some(offset) = patch.timezone_offset_minutes {
        profile.timezone_offset_minutes = offset;
    }

    match state.profiles.save(profile.clone()).await {
        Ok(()) => (StatusCode::OK, Json(profile)).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

async fn admin_shutdown(State(state): State<AppState>) -> impl IntoResponse {
    tracing::info!("admin shutdown requested");
    state.shutdown.cancel();
    (StatusCode::ACCEPTED, Json(Accepted::new()))
}

/// Rate limits (`remaining_daily_budget`) are derived from the
/// `engagement_events` audit trail rather than a resettable counter
/// (§4.7.1, §7's append-only ledger philosophy) — resetting them would
/// mean deleting today's `sent` rows, which would also erase the audit
/// trail P5 requires. This endpoint is accepted and logged for operator
/// visibility but intentionally performs no mutation.
async fn admin_reset_rate_limits(
    State(_state): State<AppState>,
    Query(query): Query<ResetRateLimitsQuery>,
) -> impl IntoResponse {
    match query.user_id {
        Some(user_id) => tracing::info!(user_id, "admin reset-rate-limits requested (no-op by design)"),
        None => tracing::info!("admin reset-rate-limits requested for all users (no-op by design)"),
    }
    (StatusCode::ACCEPTED, Json(Accepted::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use coach_core::{
        CoreResult, DecisionMode, MemoryContextRequest as _, MotivationType, QuietHours,
        ReminderSetting, SystemClock, UserProfile,
    };
    use tower::ServiceExt;

    struct StubProfiles;
    #[async_trait]
    impl UserProfileStore for StubProfiles {
        async fn get(&self, user: UserId) -> CoreResult<UserProfile> {
            Ok(UserProfile {
                user,
                age: None,
                sex: None,
                height_cm: None,
                basal_metabolic_rate: None,
                preferences: serde_json::json!({}),
                motivation_type: MotivationType::GoalOriented,
                communication_style: "friendly".into(),
                decision_mode: DecisionMode::Balanced,
                points: 0,
                points_earned_total: 0,
                points_spent_total: 0,
                achievements: Default::default(),
                quiet_hours: QuietHours { start_hour: 22, end_hour: 8 },
                timezone_offset_minutes: 0,
            })
        }
        async fn save(&self, _profile: UserProfile) -> CoreResult<()> {
            Ok(())
        }
        async fn list_all(&self) -> CoreResult<Vec<UserId>> {
            Ok(vec![])
        }
    }

    struct StubReminders;
    #[async_trait]
    impl ReminderSettingsStore for StubReminders {
        async fn upsert(&self, _setting: ReminderSetting) -> CoreResult<()> {
            Ok(())
        }
        async fn get(&self, _user: UserId, _reminder_type: &str) -> CoreResult<Option<ReminderSetting>> {
            Ok(None)
        }
        async fn list_for_user(&self, _user: UserId) -> CoreResult<Vec<ReminderSetting>> {
            Ok(vec![])
        }
        async fn list_due(&self, _now: DateTime<Utc>) -> CoreResult<Vec<ReminderSetting>> {
            Ok(vec![])
        }
    }

    struct StubMemory;
    #[async_trait]
    impl MemoryManager for StubMemory {
        async fn record_checkin(
            &self,
            _user: UserId,
            _canonical_sentence: String,
            _metadata: serde_json::Value,
            _now: DateTime<Utc>,
        ) -> CoreResult<()> {
            Ok(())
        }
        async fn record_dialogue(
            &self,
            _user: UserId,
            _role: coach_core::ChatRole,
            _content: String,
            _now: DateTime<Utc>,
        ) -> CoreResult<()> {
            Ok(())
        }
        async fn get_context(&self, _request: MemoryContextRequest) -> CoreResult<String> {
            Ok(String::new())
        }
    }

    struct StubRecords;
    #[async_trait]
    impl HealthRecordWriter for StubRecords {
        async fn insert(&self, _record: coach_core::HealthRecord) -> CoreResult<()> {
            Ok(())
        }
    }

    fn test_server() -> GatewayServer {
        GatewayServer::new(
            Arc::new(SystemClock),
            EventBus::new(),
            Arc::new(StubProfiles),
            Arc::new(StubReminders),
            Arc::new(StubMemory),
            Arc::new(StubRecords),
            CancellationToken::new(),
            "127.0.0.1",
            0,
        )
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_server().router();
        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn record_created_returns_202_and_publishes_to_bus() {
        let server = test_server();
        let mut rx = server.state.bus.subscribe();
        let app = server.router();

        let body = serde_json::json!({"user_id": 1, "kind": "weight", "kg": 80.0});
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/events/record-created")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user(), UserId(1));
    }

    #[tokio::test]
    async fn admin_shutdown_cancels_token() {
        let server = test_server();
        let shutdown = server.state.shutdown.clone();
        let app = server.router();

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/admin/shutdown")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(shutdown.is_cancelled());
    }
}

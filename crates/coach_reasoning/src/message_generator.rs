//! C9 — message generator. Layered prompt assembly: system role, config
//! block, context block, instruction block, concatenated with explicit
//! separators. The provider call goes through `retry::with_retry`
//! (§7 backoff policy); a failure there falls back to a static template
//! keyed by (type, motivation_type) — the same "never let an
//! external-dependency failure reach the caller" idiom used throughout
//! this crate.

use async_trait::async_trait;
use coach_core::{
    Channel, CoreResult, DecisionMode, EventDetector, GeneratedMessage, LlmClient, LlmMessage,
    LlmParams, MemoryContextRequest, MemoryManager, MessageGenerator, MessageRequest, MotivationType,
    RichActionKind, UserProfileStore,
};
use std::sync::Arc;

use crate::retry::{with_retry, RetryConfig};

/// Mirrors `coach_memory::manager::MemoryManagerConfig`'s local-config
/// pattern: no dedicated config knob for this exists in `CoachConfig`, so
/// it lives next to the component that owns it.
#[derive(Debug, Clone)]
pub struct MessageGeneratorConfig {
    pub max_body_chars: usize,
}

impl Default for MessageGeneratorConfig {
    fn default() -> Self {
        Self { max_body_chars: 400 }
    }
}

pub struct TemplateMessageGenerator {
    memory: Arc<dyn MemoryManager>,
    profiles: Arc<dyn UserProfileStore>,
    event_detector: Arc<dyn EventDetector>,
    llm: Arc<dyn LlmClient>,
    retry_config: RetryConfig,
    config: MessageGeneratorConfig,
}

impl TemplateMessageGenerator {
    pub fn new(
        memory: Arc<dyn MemoryManager>,
        profiles: Arc<dyn UserProfileStore>,
        event_detector: Arc<dyn EventDetector>,
        llm: Arc<dyn LlmClient>,
        retry_config: RetryConfig,
        config: MessageGeneratorConfig,
    ) -> Self {
        Self { memory, profiles, event_detector, llm, retry_config, config }
    }

    fn system_prompt(&self, communication_style: &str, motivation_type: MotivationType) -> String {
        format!(
            "You are a health coach with a {communication_style} communication style, \
             speaking to someone who responds best to {motivation:?} motivation. \
             Keep responses under {max_chars} characters, plain text unless a card or \
             quick reply is clearly warranted.",
            communication_style = communication_style,
            motivation = motivation_type,
            max_chars = self.config.max_body_chars,
        )
    }

    fn config_block(&self) -> String {
        format!(
            "## Constraints\nmax_length={}\nallowed_rich_kinds=text,card,quick_reply,form",
            self.config.max_body_chars
        )
    }

    fn instruction_block(&self, notification_type: &str, active_event: Option<&str>) -> String {
        let mut block = format!("## Instruction\nCompose a {notification_type} notification.");
        if let Some(event) = active_event {
            block.push_str(&format!(
                "\nThe user currently has an active context event: {event}. Adapt the suggestion accordingly \
                 (e.g. travel -> suggest a bodyweight or no-equipment alternative; illness -> suggest rest)."
            ));
        }
        block
    }

    fn static_template(notification_type: &str, motivation_type: MotivationType) -> (String, String) {
        let title = match notification_type {
            t if t.contains("hydration") => "Time to hydrate",
            t if t.contains("exercise") || t.contains("workout") => "Movement check-in",
            t if t.contains("sleep") => "Wind-down reminder",
            t if t.contains("achievement") => "You unlocked something",
            _ => "Checking in",
        };

        let body = match motivation_type {
            MotivationType::DataDriven => {
                format!("Your recent trend suggests it's a good time for a {notification_type} update. A quick log keeps your data complete.")
            }
            MotivationType::EmotionalSupport => {
                format!("Just checking in about {notification_type} — no pressure, whenever you're ready.")
            }
            MotivationType::GoalOriented => {
                format!("A small step toward your goal: a quick {notification_type} moment right now.")
            }
        };

        (title.to_string(), body)
    }
}

#[async_trait]
impl MessageGenerator for TemplateMessageGenerator {
    async fn generate(&self, request: MessageRequest) -> CoreResult<GeneratedMessage> {
        let profile = self.profiles.get(request.user).await?;

        let mut context_request = MemoryContextRequest::new(request.user);
        context_request.query = Some(format!("{} plan intent", request.notification_type));
        let context = self.memory.get_context(context_request).await?;

        let active_events = self
            .event_detector
            .detect(request.user, profile.decision_mode, chrono::Utc::now())
            .await
            .unwrap_or_default();
        let active_event_desc = active_events.first().map(|e| e.kind.as_str().to_string());

        let system = self.system_prompt(&profile.communication_style, profile.motivation_type);
        let prompt = format!(
            "{}\n\n## Context\n{}\n\n{}",
            self.config_block(),
            context,
            self.instruction_block(&request.notification_type, active_event_desc.as_deref())
        );

        let llm = self.llm.clone();
        let result = with_retry(
            &self.retry_config,
            "message_generator.complete",
            |_: &anyhow::Error| true,
            || {
                let llm = llm.clone();
                let system = system.clone();
                let prompt = prompt.clone();
                async move { llm.complete(&system, vec![LlmMessage { role: coach_core::ChatRole::User, content: prompt }], LlmParams::default()).await }
            },
        )
        .await;

        let (title, body) = match result {
            Ok(completion) => {
                let mut lines = completion.text.splitn(2, '\n');
                let first = lines.next().unwrap_or("").trim().to_string();
                let rest = lines.next().unwrap_or("").trim().to_string();
                if rest.is_empty() {
                    Self::static_template(&request.notification_type, profile.motivation_type)
                } else {
                    (first, rest)
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, notification_type = %request.notification_type, "message generator llm call failed, using static template");
                Self::static_template(&request.notification_type, profile.motivation_type)
            }
        };

        let body: String = body.chars().take(self.config.max_body_chars).collect();

        Ok(GeneratedMessage {
            title,
            body,
            rich_actions: vec![RichActionKind::Text],
            channel_hint: Channel::Chat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::{ContextEvent, DecisionRationale, UserId, UserProfile};
    use std::sync::Arc as StdArc;

    struct StubMemory;
    #[async_trait]
    impl MemoryManager for StubMemory {
        async fn record_checkin(&self, _user: UserId, _s: String, _m: serde_json::Value, _now: chrono::DateTime<chrono::Utc>) -> coach_core::CoreResult<()> {
            Ok(())
        }
        async fn record_dialogue(&self, _user: UserId, _role: coach_core::ChatRole, _content: String, _now: chrono::DateTime<chrono::Utc>) -> coach_core::CoreResult<()> {
            Ok(())
        }
        async fn get_context(&self, _request: MemoryContextRequest) -> coach_core::CoreResult<String> {
            Ok("## Recent activity\nlogged breakfast".to_string())
        }
    }

    struct StubProfiles;
    #[async_trait]
    impl UserProfileStore for StubProfiles {
        async fn get(&self, user: UserId) -> coach_core::CoreResult<UserProfile> {
            Ok(UserProfile {
                user,
                age: None,
                sex: None,
                height_cm: None,
                basal_metabolic_rate: None,
                preferences: serde_json::json!({}),
                motivation_type: MotivationType::EmotionalSupport,
                communication_style: "warm".into(),
                decision_mode: DecisionMode::Conservative,
                points: 0,
                points_earned_total: 0,
                points_spent_total: 0,
                achievements: Default::default(),
                quiet_hours: coach_core::QuietHours { start_hour: 22, end_hour: 8 },
                timezone_offset_minutes: 0,
            })
        }
        async fn save(&self, _profile: UserProfile) -> coach_core::CoreResult<()> {
            Ok(())
        }
        async fn list_all(&self) -> coach_core::CoreResult<Vec<UserId>> {
            Ok(vec![])
        }
    }

    struct NoEvents;
    #[async_trait]
    impl EventDetector for NoEvents {
        async fn detect(&self, _user: UserId, _mode: DecisionMode, _now: chrono::DateTime<chrono::Utc>) -> coach_core::CoreResult<Vec<ContextEvent>> {
            Ok(vec![])
        }
    }

    struct FailingLlm;
    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _system: &str, _messages: Vec<LlmMessage>, _params: LlmParams) -> anyhow::Result<coach_core::LlmCompletion> {
            anyhow::bail!("provider unreachable")
        }
    }

    #[tokio::test]
    async fn falls_back_to_static_template_on_llm_failure() {
        let generator = TemplateMessageGenerator::new(
            StdArc::new(StubMemory),
            StdArc::new(StubProfiles),
            StdArc::new(NoEvents),
            StdArc::new(FailingLlm),
            RetryConfig { max_attempts: 1, ..Default::default() },
            MessageGeneratorConfig::default(),
        );

        let message = generator
            .generate(MessageRequest {
                user: UserId(1),
                notification_type: "hydration_reminder".into(),
                rationale: DecisionRationale { factors: vec![], score: 0.6, mode: DecisionMode::Conservative },
                plan_payload: None,
            })
            .await
            .unwrap();

        assert!(!message.body.is_empty());
        assert!(message.body.len() <= 400);
    }
}

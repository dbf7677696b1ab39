//! `Summarizer` (§4.4's "summarizer is an LLM call") — invoked by
//! `coach_memory`'s Memory Manager every `summary_trigger_dialogue_count`
//! turns. Failure handling follows the same non-fatal idiom as
//! `message_generator.rs`'s provider call: a failed or malformed
//! completion falls back to a naive truncated concatenation rather than
//! ever failing the caller (§7 External dependency clause — `Summarizer`
//! has no `CoreResult` in its signature precisely so this can't leak).

use async_trait::async_trait;
use coach_core::{ChatRole, LlmClient, LlmMessage, LlmParams, MemoryEntry, Summarizer};
use std::sync::Arc;

use crate::retry::{with_retry, RetryConfig};

const MAX_FALLBACK_CHARS: usize = 500;

pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self { llm, retry_config }
    }

    fn naive_fallback(turns: &[MemoryEntry]) -> String {
        let mut joined = turns
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join(" / ");
        if joined.len() > MAX_FALLBACK_CHARS {
            joined.truncate(MAX_FALLBACK_CHARS);
            joined.push('…');
        }
        joined
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize_dialogue(&self, turns: &[MemoryEntry]) -> String {
        if turns.is_empty() {
            return String::new();
        }

        let system = "Summarize this dialogue span into 1-2 sentences capturing the user's \
            situation, stated goals, and anything the coach should remember. Be concise.";
        let transcript = turns.iter().map(|t| t.content.clone()).collect::<Vec<_>>().join("\n");

        let llm = self.llm.clone();
        let result = with_retry(
            &self.retry_config,
            "summarizer.complete",
            |_: &anyhow::Error| true,
            || {
                let llm = llm.clone();
                let transcript = transcript.clone();
                async move {
                    llm.complete(
                        system,
                        vec![LlmMessage { role: ChatRole::User, content: transcript }],
                        LlmParams { max_tokens: 120, temperature: 0.2 },
                    )
                    .await
                }
            },
        )
        .await;

        match result {
            Ok(completion) if !completion.text.trim().is_empty() => completion.text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("summarizer llm returned empty text, falling back to truncation (degraded)");
                Self::naive_fallback(turns)
            }
            Err(err) => {
                tracing::warn!(error = %err, "summarizer llm failed, falling back to truncation (degraded)");
                Self::naive_fallback(turns)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coach_core::{LlmCompletion, MemoryKind, UserId};
    use std::time::Duration;
    use uuid::Uuid;

    struct OkLlm;
    #[async_trait]
    impl LlmClient for OkLlm {
        async fn complete(&self, _s: &str, _m: Vec<LlmMessage>, _p: LlmParams) -> anyhow::Result<LlmCompletion> {
            Ok(LlmCompletion { text: "user felt tired after work, wants gentler reminders".into() })
        }
    }

    struct FailingLlm;
    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _s: &str, _m: Vec<LlmMessage>, _p: LlmParams) -> anyhow::Result<LlmCompletion> {
            Err(anyhow::anyhow!("provider unavailable"))
        }
    }

    fn turn(content: &str) -> MemoryEntry {
        MemoryEntry {
            id: Uuid::new_v4(),
            user: UserId(1),
            kind: MemoryKind::Dialogue,
            content: content.to_string(),
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        }
    }

    fn no_retries() -> RetryConfig {
        RetryConfig { max_attempts: 1, base_delay: Duration::from_millis(1), ..Default::default() }
    }

    #[tokio::test]
    async fn summarizes_via_llm_on_success() {
        let summarizer = LlmSummarizer::new(Arc::new(OkLlm), RetryConfig::default());
        let summary = summarizer.summarize_dialogue(&[turn("I'm exhausted today")]).await;
        assert!(summary.contains("tired") || summary.contains("gentler"));
    }

    #[tokio::test]
    async fn falls_back_to_truncated_concatenation_on_llm_failure() {
        let summarizer = LlmSummarizer::new(Arc::new(FailingLlm), no_retries());
        let summary = summarizer.summarize_dialogue(&[turn("turn one"), turn("turn two")]).await;
        assert_eq!(summary, "turn one / turn two");
    }

    #[tokio::test]
    async fn empty_turns_returns_empty_string() {
        let summarizer = LlmSummarizer::new(Arc::new(OkLlm), RetryConfig::default());
        assert_eq!(summarizer.summarize_dialogue(&[]).await, "");
    }
}

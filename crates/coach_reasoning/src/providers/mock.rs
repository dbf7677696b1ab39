//! A deterministic stand-in used in tests and in `coach_cli` when no
//! provider is configured (`llm.provider = "mock"`, the config default).

use async_trait::async_trait;
use coach_core::{ChatRole, LlmClient, LlmCompletion, LlmMessage, LlmParams};

pub struct MockLlmClient {
    model: String,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock-coach")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        _params: LlmParams,
    ) -> anyhow::Result<LlmCompletion> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, ChatRole::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let text = format!(
            "(mock {} response) system={}chars last_user={}chars",
            self.model,
            system.len(),
            last_user.len()
        );

        Ok(LlmCompletion { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_deterministic_shape() {
        let client = MockLlmClient::new("test-model");
        let completion = client
            .complete(
                "system prompt",
                vec![LlmMessage { role: ChatRole::User, content: "hello".into() }],
                LlmParams::default(),
            )
            .await
            .unwrap();
        assert!(completion.text.contains("test-model"));
    }
}

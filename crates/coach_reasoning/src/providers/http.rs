//! An env-var API key lookup, a Bearer-auth POST to
//! `{base_url}/chat/completions`, and a `choices[0].message.content`
//! response shape — the common subset of OpenAI-compatible chat APIs,
//! stripped of the tool-call plumbing our `LlmClient` contract (§9)
//! doesn't carry.

use async_trait::async_trait;
use coach_core::{ChatRole, LlmClient, LlmCompletion, LlmMessage, LlmParams};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Talks to any OpenAI-compatible chat-completions endpoint (OpenAI
/// itself, Ollama, local vLLM/llama.cpp servers in OpenAI-compat mode).
pub struct HttpLlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(model: impl Into<String>, base_url: Option<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let api_key = std::env::var("COACH_LLM_API_KEY").unwrap_or_default();
        let base_url = base_url
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: Client::builder().timeout(Duration::from_millis(timeout_ms)).build()?,
            api_key,
            base_url,
            model: model.into(),
        })
    }

    fn role_str(role: ChatRole) -> &'static str {
        match role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        params: LlmParams,
    ) -> anyhow::Result<LlmCompletion> {
        let mut payload_messages = vec![json!({ "role": "system", "content": system })];
        for m in messages {
            payload_messages.push(json!({ "role": Self::role_str(m.role), "content": m.content }));
        }

        let payload = json!({
            "model": self.model,
            "messages": payload_messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("llm request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("llm provider returned {status}: {body}");
        }

        let resp_json: Value = response.json().await?;
        let text = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("llm response missing choices[0].message.content"))?
            .to_string();

        Ok(LlmCompletion { text })
    }
}

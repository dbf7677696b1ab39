//! Bounded LLM connection pool (§5 "LLM client is a bounded connection
//! pool; excess requests are queued with a deadline; on deadline exceed,
//! fall back as in §4"). An acquire-before-call / release-on-completion
//! gate built on a `tokio::sync::Semaphore`, since the resource being
//! bounded is concurrent in-flight requests, not a cumulative token
//! budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coach_core::{LlmClient, LlmCompletion, LlmMessage, LlmParams};
use tokio::sync::Semaphore;

pub struct PooledLlmClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl PooledLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize, acquire_timeout: Duration) -> Self {
        Self { inner, semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))), acquire_timeout }
    }
}

#[async_trait]
impl LlmClient for PooledLlmClient {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        params: LlmParams,
    ) -> anyhow::Result<LlmCompletion> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| anyhow::anyhow!("llm connection pool exhausted, deadline exceeded"))?
            .expect("semaphore never closed");

        let result = self.inner.complete(system, messages, params).await;
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::ChatRole;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    struct SlowLlm {
        inflight: StdArc<AtomicUsize>,
        peak: StdArc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _s: &str, _m: Vec<LlmMessage>, _p: LlmParams) -> anyhow::Result<LlmCompletion> {
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            Ok(LlmCompletion { text: "ok".into() })
        }
    }

    #[tokio::test]
    async fn caps_concurrent_calls_at_pool_size() {
        let inflight = StdArc::new(AtomicUsize::new(0));
        let peak = StdArc::new(AtomicUsize::new(0));
        let inner = StdArc::new(SlowLlm { inflight: inflight.clone(), peak: peak.clone() });
        let pooled = StdArc::new(PooledLlmClient::new(inner, 2, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pooled = pooled.clone();
            handles.push(tokio::spawn(async move {
                pooled
                    .complete("sys", vec![LlmMessage { role: ChatRole::User, content: "hi".into() }], LlmParams::default())
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn deadline_exceeded_surfaces_as_error() {
        let inflight = StdArc::new(AtomicUsize::new(0));
        let peak = StdArc::new(AtomicUsize::new(0));
        let inner = StdArc::new(SlowLlm { inflight, peak });
        let pooled = PooledLlmClient::new(inner, 1, Duration::from_millis(5));

        let pooled = StdArc::new(pooled);
        let blocker = pooled.clone();
        let handle = tokio::spawn(async move {
            blocker
                .complete("sys", vec![LlmMessage { role: ChatRole::User, content: "hi".into() }], LlmParams::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = pooled
            .complete("sys", vec![LlmMessage { role: ChatRole::User, content: "hi".into() }], LlmParams::default())
            .await;
        assert!(result.is_err());
        handle.await.unwrap().unwrap();
    }
}

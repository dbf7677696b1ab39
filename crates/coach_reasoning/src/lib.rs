//! Reasoning-layer implementations: C6 (event detector), C7 (engagement &
//! effectiveness tracker), C8 (decision engine), C9 (message generator),
//! the `LlmClient` trait's providers, and the shared retry/backoff helper
//! they all call through for their external-dependency edges. Every
//! component here treats the LLM as optional: a failure degrades to a
//! static fallback rather than propagating.

pub mod decision;
pub mod engagement;
pub mod event_detector;
pub mod message_generator;
pub mod providers;
pub mod retry;
pub mod summarizer;

pub use decision::RuleDecisionEngine;
pub use engagement::SqliteEngagementTracker;
pub use event_detector::PatternEventDetector;
pub use message_generator::TemplateMessageGenerator;
pub use providers::mock::MockLlmClient;
pub use providers::pooled::PooledLlmClient;
pub use retry::{with_retry, RetryConfig};
pub use summarizer::LlmSummarizer;

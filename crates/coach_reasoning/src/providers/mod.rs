//! `LlmClient` providers: `mock` is a deterministic stand-in for tests
//! and offline runs; `http` is a minimally-opinionated chat-completions
//! client that works against any OpenAI-compatible endpoint.

pub mod http;
pub mod mock;
pub mod pooled;

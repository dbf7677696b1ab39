//! Shared error taxonomy (kinds, not type names) used at every trait
//! boundary so callers across crates can match on a kind rather than a
//! crate-specific type. Each crate still keeps its own `thiserror` enum
//! for precise local handling (see DESIGN.md §7.1); those convert into
//! [`CoreError`] at the trait impl boundary.

use thiserror::Error;

/// Error kind shared across every component's trait boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad input to a core API: unknown user, malformed identifier.
    #[error("validation: {0}")]
    Validation(String),

    /// A precondition the caller could have checked failed: insufficient
    /// funds, duplicate daily award, capacity exceeded.
    #[error("precondition: {0}")]
    Precondition(String),

    /// An external dependency (LLM, embedding model, vector store, record
    /// store) failed. Callers with a fallback must not propagate this;
    /// it only reaches here when no fallback exists.
    #[error("external dependency: {0}")]
    External(String),

    /// Persistent storage failed after exhausting the retry policy.
    #[error("storage: {0}")]
    Storage(String),

    /// An invariant the implementation guarantees was violated. Treated
    /// as a bug: callers should not attempt to repair state, only alert.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CoreError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        CoreError::Storage(err.to_string())
    }

    pub fn external(err: impl std::fmt::Display) -> Self {
        CoreError::External(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        CoreError::Precondition(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        CoreError::Invariant(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

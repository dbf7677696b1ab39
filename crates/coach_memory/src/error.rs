//! Per-store error kinds (§7.1). Each converts into `coach_core::CoreError`
//! at the trait boundary so callers above `coach_memory` only ever match on
//! the shared taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("already awarded today")]
    AlreadyAwardedToday,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum LongTermError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("malformed stored payload: {0}")]
    Malformed(String),
}

impl From<LedgerError> for coach_core::CoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount => coach_core::CoreError::validation(err.to_string()),
            LedgerError::InsufficientFunds | LedgerError::AlreadyAwardedToday => {
                coach_core::CoreError::precondition(err.to_string())
            }
            LedgerError::Storage(e) => coach_core::CoreError::storage(e.to_string()),
        }
    }
}

impl From<BufferError> for coach_core::CoreError {
    fn from(err: BufferError) -> Self {
        coach_core::CoreError::storage(err.to_string())
    }
}

impl From<LongTermError> for coach_core::CoreError {
    fn from(err: LongTermError) -> Self {
        match err {
            LongTermError::Embedding(msg) => coach_core::CoreError::external(msg),
            LongTermError::Storage(e) => coach_core::CoreError::storage(e.to_string()),
        }
    }
}

impl From<RecordsError> for coach_core::CoreError {
    fn from(err: RecordsError) -> Self {
        match err {
            RecordsError::Storage(e) => coach_core::CoreError::storage(e.to_string()),
            RecordsError::Malformed(msg) => coach_core::CoreError::storage(msg),
        }
    }
}

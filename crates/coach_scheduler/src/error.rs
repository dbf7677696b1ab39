//! §7.1: `coach_scheduler::SchedulerError` is used only for invariant
//! violations — everything else the scheduling loop encounters is
//! absorbed into a `Verdict` or a `NotificationQueueEntry` status
//! transition rather than surfaced as an `Err`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl From<SchedulerError> for coach_core::CoreError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage(e) => coach_core::CoreError::storage(e.to_string()),
            SchedulerError::Invariant(msg) => coach_core::CoreError::invariant(msg),
        }
    }
}

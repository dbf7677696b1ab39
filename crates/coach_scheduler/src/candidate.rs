//! A unit of scheduling work (§4.10): something that might become a
//! notification once the decision engine weighs in. Both producers
//! (timer, event) emit the same shape so the per-user worker loop
//! doesn't need to know which one produced a given candidate.

use chrono::{DateTime, Utc};
use coach_core::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Timer,
    Event,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub user: UserId,
    pub notification_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub bypass_quiet_hours: bool,
    pub source: CandidateSource,
    /// Incremented on each re-enqueue — `defer` re-enqueues count as a
    /// fresh attempt 0 (it's a new decision each time), this only tracks
    /// delivery retries within `process_candidate`'s own retry loop.
    pub delivery_attempt: u32,
}

impl Candidate {
    pub fn new(user: UserId, notification_type: impl Into<String>, scheduled_at: DateTime<Utc>, source: CandidateSource) -> Self {
        Self {
            user,
            notification_type: notification_type.into(),
            scheduled_at,
            bypass_quiet_hours: false,
            source,
            delivery_attempt: 0,
        }
    }

    pub fn with_bypass_quiet_hours(mut self, bypass: bool) -> Self {
        self.bypass_quiet_hours = bypass;
        self
    }
}

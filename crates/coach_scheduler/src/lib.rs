//! C10 (scheduler & delivery loop) and C11 (achievement evaluator):
//! the process that turns timer ticks and bus events into delivered
//! notifications, and the evaluator that turns new records into
//! unlocked achievements. Concurrency shape is per-user single-flight
//! with cooperative cancellation: one lock per user, never a
//! process-wide lock.

pub mod achievement;
pub mod bus;
pub mod candidate;
pub mod error;
pub mod mailbox;
pub mod queue;
pub mod scheduler;
pub mod timer;

pub use achievement::{catalog, StaticAchievementEvaluator};
pub use bus::{BusEvent, EventBus};
pub use candidate::{Candidate, CandidateSource};
pub use error::SchedulerError;
pub use mailbox::UserRegistry;
pub use queue::SqliteNotificationQueueStore;
pub use scheduler::{SchedulerDeps, SchedulerService};

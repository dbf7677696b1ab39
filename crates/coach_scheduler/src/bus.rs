//! Process-wide event bus (§2, §4.10's "event producer"). A `broadcast`
//! channel rather than a single-consumer `mpsc`, since more than one
//! subscriber needs every event: the scheduler's event producer turns
//! `RecordCreated` into candidates, while the engagement tracker also
//! wants to observe it for `record_record_created` bookkeeping.

use chrono::{DateTime, Utc};
use coach_core::{AchievementUnlock, HealthRecord, UserId};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum BusEvent {
    RecordCreated { record: HealthRecord },
    AchievementUnlocked { unlock: AchievementUnlock },
    GoalThresholdCrossed { user: UserId, detail: String, timestamp: DateTime<Utc> },
    AnomalyDetected { user: UserId, detail: String, timestamp: DateTime<Utc> },
}

impl BusEvent {
    pub fn user(&self) -> UserId {
        match self {
            BusEvent::RecordCreated { record } => record.user,
            BusEvent::AchievementUnlocked { unlock } => unlock.user,
            BusEvent::GoalThresholdCrossed { user, .. } => *user,
            BusEvent::AnomalyDetected { user, .. } => *user,
        }
    }
}

/// Thin wrapper around `broadcast::Sender` so callers don't each pick
/// their own default channel capacity. Lagging receivers (slow
/// subscribers that fall more than `CAPACITY` events behind) silently
/// miss the oldest unread events rather than blocking publishers — this
/// core prefers a best-effort event feed over back-pressuring the intake
/// path (§5: "the gateway itself never waits").
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

const CAPACITY: usize = 1024;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: BusEvent) {
        // No subscribers is not an error: a fresh process may not have
        // spun up the scheduler's event producer yet.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn published_event_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(BusEvent::GoalThresholdCrossed {
            user: UserId(1),
            detail: "weight goal within 0.5kg".into(),
            timestamp: Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.user(), UserId(1));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(BusEvent::AnomalyDetected { user: UserId(9), detail: "spike".into(), timestamp: Utc::now() });
        assert_eq!(a.recv().await.unwrap().user(), UserId(9));
        assert_eq!(b.recv().await.unwrap().user(), UserId(9));
    }
}

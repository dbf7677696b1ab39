//! Single time source every other component depends on (C1). Nothing
//! outside this module should call `chrono::Utc::now()` or
//! `tokio::time::Instant::now()` directly — tests replace [`SystemClock`]
//! with [`VirtualClock`] to get deterministic, fast-forwardable timers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Timezone-aware wall clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Non-decreasing duration source, unaffected by wall-clock
    /// adjustments. Used for interval math (backoff, scheduler ticks).
    fn monotonic(&self) -> Instant;

    /// Suspend the caller until `deadline`. Cooperative: yields the
    /// worker without blocking it.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Real clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let now = Utc::now();
        if deadline <= now {
            return;
        }
        let remaining = (deadline - now)
            .to_std()
            .unwrap_or(StdDuration::from_secs(0));
        tokio::time::sleep(remaining).await;
    }
}

/// Test clock. Advances only when told to, via [`VirtualClock::advance`];
/// `sleep_until` resolves as soon as the virtual time reaches or passes
/// the deadline, whether that happens via one big jump or several small
/// ones.
#[derive(Clone)]
pub struct VirtualClock {
    tx: Arc<watch::Sender<DateTime<Utc>>>,
    rx: watch::Receiver<DateTime<Utc>>,
    started: Instant,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tx, rx) = watch::channel(start);
        Self {
            tx: Arc::new(tx),
            rx,
            started: Instant::now(),
        }
    }

    /// Move virtual time forward by `delta`, waking any waiter whose
    /// deadline has now passed.
    pub fn advance(&self, delta: chrono::Duration) {
        self.tx.send_modify(|t| *t = *t + delta);
    }

    /// Set virtual time to an absolute point (must not move backward).
    pub fn set(&self, at: DateTime<Utc>) {
        self.tx.send_if_modified(|t| {
            if at > *t {
                *t = at;
                true
            } else {
                false
            }
        });
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.rx.borrow()
    }

    fn monotonic(&self) -> Instant {
        self.started
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.rx.clone();
        if *rx.borrow() >= deadline {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() >= deadline {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_clock_sleep_until_past_returns_immediately() {
        let clock = SystemClock;
        let past = Utc::now() - chrono::Duration::seconds(5);
        clock.sleep_until(past).await;
    }

    #[tokio::test]
    async fn virtual_clock_advance_wakes_sleeper() {
        let start = Utc::now();
        let clock = VirtualClock::new(start);
        let deadline = start + chrono::Duration::minutes(10);

        let waiter = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep_until(deadline).await;
            })
        };

        tokio::task::yield_now().await;
        clock.advance(chrono::Duration::minutes(5));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        clock.advance(chrono::Duration::minutes(10));
        tokio::time::timeout(StdDuration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve once deadline passes")
            .unwrap();
    }

    #[tokio::test]
    async fn virtual_clock_set_does_not_move_backward() {
        let start = Utc::now();
        let clock = VirtualClock::new(start);
        clock.set(start - chrono::Duration::minutes(1));
        assert_eq!(clock.now(), start);
    }
}

//! Per-user single-flight ownership (§4.10.1, §5): two workers must never
//! process the same user's candidates concurrently, while different users
//! proceed fully in parallel. One `tokio::sync::Mutex<()>` per user,
//! held for the duration of `process_candidate`, rather than a single
//! process-wide lock that would serialize every user.

use coach_core::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct UserRegistry {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
    cancel_tokens: DashMap<UserId, CancellationToken>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, user: UserId) -> Arc<Mutex<()>> {
        self.locks.entry(user).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Token checked at every suspension point while processing this
    /// user's candidate (§5's cancellation list: LLM calls, vector store
    /// I/O, ledger writes, `sleep_until`). Deactivation or quiet-hour
    /// entry cancels the current token and installs a fresh one so later
    /// candidates aren't born already-cancelled.
    pub fn cancel_token_for(&self, user: UserId) -> CancellationToken {
        self.cancel_tokens.entry(user).or_insert_with(CancellationToken::new).clone()
    }

    pub fn cancel_user(&self, user: UserId) {
        if let Some(token) = self.cancel_tokens.get(&user) {
            token.cancel();
        }
        self.cancel_tokens.insert(user, CancellationToken::new());
    }

    pub fn cancel_all(&self) {
        for entry in self.cancel_tokens.iter() {
            entry.value().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_user_reuses_the_same_lock_instance() {
        let registry = UserRegistry::new();
        let a = registry.lock_for(UserId(1));
        let b = registry.lock_for(UserId(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_users_get_independent_locks() {
        let registry = UserRegistry::new();
        let a = registry.lock_for(UserId(1));
        let b = registry.lock_for(UserId(2));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn cancel_user_cancels_current_token_and_issues_a_fresh_one() {
        let registry = UserRegistry::new();
        let token = registry.cancel_token_for(UserId(1));
        assert!(!token.is_cancelled());
        registry.cancel_user(UserId(1));
        assert!(token.is_cancelled());
        let fresh = registry.cancel_token_for(UserId(1));
        assert!(!fresh.is_cancelled());
    }
}

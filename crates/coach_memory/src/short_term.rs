//! C3 — bounded short-term buffer: a capacity-guarded ring buffer, with
//! two independently-capped sequences (checkins, dialogue) per user.
//! Eviction drops the oldest entry of the overflowing kind only (I4),
//! not the whole buffer.

use async_trait::async_trait;
use coach_core::{CoreResult, MemoryEntry, MemoryKind, ShortTermBuffer, UserId};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

struct UserBuffers {
    checkins: VecDeque<MemoryEntry>,
    dialogue: VecDeque<MemoryEntry>,
}

impl UserBuffers {
    fn new() -> Self {
        Self { checkins: VecDeque::new(), dialogue: VecDeque::new() }
    }

    fn queue_mut(&mut self, kind: MemoryKind) -> &mut VecDeque<MemoryEntry> {
        match kind {
            MemoryKind::Checkin => &mut self.checkins,
            MemoryKind::Dialogue => &mut self.dialogue,
        }
    }
}

/// In-memory per-user ring buffers, sharded by user with `dashmap` so
/// unrelated users never contend on the same lock (§5: "vector collections
/// are per-user; no cross-user locks" — applied here to the short-term
/// tier too).
pub struct InMemoryShortTermBuffer {
    users: DashMap<UserId, Mutex<UserBuffers>>,
    checkin_cap: usize,
    dialogue_cap: usize,
}

impl InMemoryShortTermBuffer {
    pub fn new(checkin_cap: usize, dialogue_cap: usize) -> Self {
        Self { users: DashMap::new(), checkin_cap, dialogue_cap }
    }

    fn cap_for(&self, kind: MemoryKind) -> usize {
        match kind {
            MemoryKind::Checkin => self.checkin_cap,
            MemoryKind::Dialogue => self.dialogue_cap,
        }
    }
}

#[async_trait]
impl ShortTermBuffer for InMemoryShortTermBuffer {
    async fn add(&self, user: UserId, kind: MemoryKind, entry: MemoryEntry) -> CoreResult<()> {
        let cap = self.cap_for(kind);
        let slot = self.users.entry(user).or_insert_with(|| Mutex::new(UserBuffers::new()));
        let mut buffers = slot.lock().expect("short-term buffer mutex poisoned");
        let queue = buffers.queue_mut(kind);
        queue.push_back(entry);
        while queue.len() > cap {
            queue.pop_front();
        }
        Ok(())
    }

    async fn combined_context(
        &self,
        user: UserId,
        checkin_limit: usize,
        dialogue_limit: usize,
    ) -> CoreResult<Vec<MemoryEntry>> {
        let Some(slot) = self.users.get(&user) else {
            return Ok(Vec::new());
        };
        let buffers = slot.lock().expect("short-term buffer mutex poisoned");

        let mut merged: Vec<MemoryEntry> = buffers
            .checkins
            .iter()
            .rev()
            .take(checkin_limit)
            .cloned()
            .chain(buffers.dialogue.iter().rev().take(dialogue_limit).cloned())
            .collect();
        merged.sort_by_key(|e| e.created_at);
        Ok(merged)
    }

    async fn checkin_count(&self, user: UserId) -> CoreResult<usize> {
        Ok(self
            .users
            .get(&user)
            .map(|slot| slot.lock().expect("short-term buffer mutex poisoned").checkins.len())
            .unwrap_or(0))
    }

    async fn dialogue_count(&self, user: UserId) -> CoreResult<usize> {
        Ok(self
            .users
            .get(&user)
            .map(|slot| slot.lock().expect("short-term buffer mutex poisoned").dialogue.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(kind: MemoryKind, content: &str) -> MemoryEntry {
        MemoryEntry {
            id: Uuid::new_v4(),
            user: UserId(1),
            kind,
            content: content.to_string(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn eviction_drops_oldest_of_same_kind_only() {
        let buf = InMemoryShortTermBuffer::new(30, 200);
        for i in 0..31 {
            buf.add(UserId(1), MemoryKind::Checkin, entry(MemoryKind::Checkin, &format!("c{i}")))
                .await
                .unwrap();
        }
        buf.add(UserId(1), MemoryKind::Dialogue, entry(MemoryKind::Dialogue, "d0")).await.unwrap();

        assert_eq!(buf.checkin_count(UserId(1)).await.unwrap(), 30);
        assert_eq!(buf.dialogue_count(UserId(1)).await.unwrap(), 1);

        let context = buf.combined_context(UserId(1), 30, 200).await.unwrap();
        let checkins: Vec<_> = context
            .iter()
            .filter(|e| e.kind == MemoryKind::Checkin)
            .map(|e| e.content.clone())
            .collect();
        assert!(!checkins.contains(&"c0".to_string()), "oldest checkin should have been evicted");
        assert!(checkins.contains(&"c30".to_string()));
    }

    #[tokio::test]
    async fn combined_context_respects_per_kind_limits_newest_last() {
        let buf = InMemoryShortTermBuffer::new(30, 200);
        for i in 0..5 {
            buf.add(UserId(2), MemoryKind::Checkin, entry(MemoryKind::Checkin, &format!("c{i}")))
                .await
                .unwrap();
        }
        let context = buf.combined_context(UserId(2), 2, 0).await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[1].content, "c4");
    }

    #[tokio::test]
    async fn unknown_user_returns_empty_context() {
        let buf = InMemoryShortTermBuffer::new(30, 200);
        assert!(buf.combined_context(UserId(99), 10, 10).await.unwrap().is_empty());
    }
}

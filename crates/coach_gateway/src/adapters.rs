//! `ChannelAdapter` implementations. §6 names the real channel surfaces
//! (chat insert, push, email, SMS) as external collaborators the core
//! only talks to through `notification_ready` — this crate owns the
//! trait boundary, not the provider integrations. `LoggingChannelAdapter`
//! stands in for all four so `coach_cli` has something to wire into
//! `SchedulerDeps::channel_adapters` without depending on any outbound
//! provider SDK.

use async_trait::async_trait;
use coach_core::{Channel, ChannelAdapter, CoreResult, NotificationQueueEntry};

/// Delivers by logging the notification as if handed to the named
/// channel's provider. A production deployment replaces this per channel
/// (chat insert into the conversation surface, an APNs/FCM push client,
/// an email sender, an SMS gateway) behind the same trait.
pub struct LoggingChannelAdapter {
    channel: Channel,
}

impl LoggingChannelAdapter {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelAdapter for LoggingChannelAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> CoreResult<()> {
        tracing::info!(
            channel = ?self.channel,
            user = %entry.user,
            notification_type = %entry.notification_type,
            title = %entry.title,
            "notification delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coach_core::{NotificationStatus, UserId};
    use uuid::Uuid;

    fn entry(channel: Channel) -> NotificationQueueEntry {
        NotificationQueueEntry {
            id: Uuid::new_v4(),
            user: UserId(1),
            notification_type: "hydration_reminder".into(),
            title: "Time to hydrate".into(),
            content: "Have some water".into(),
            channel,
            status: NotificationStatus::Pending,
            scheduled_at: Utc::now(),
            sent_at: None,
            payload: None,
            bypass_quiet_hours: false,
        }
    }

    #[tokio::test]
    async fn delivers_without_error_for_every_channel() {
        for channel in [Channel::Chat, Channel::Push, Channel::Email, Channel::Sms] {
            let adapter = LoggingChannelAdapter::new(channel);
            assert_eq!(adapter.channel(), channel);
            adapter.deliver(&entry(channel)).await.unwrap();
        }
    }
}

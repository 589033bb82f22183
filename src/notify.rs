use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Notification, UserId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-user broadcast of freshly created notifications.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Push to the recipient's subscribers. No-op if nobody is listening.
    pub fn send(&self, notification: &Notification) {
        let recipient = notification.recipient_id;
        let closed = match self.channels.get(&recipient) {
            Some(sender) => sender.send(notification.clone()).is_err() && sender.receiver_count() == 0,
            None => false,
        };
        if closed {
            // Every receiver is gone; drop the channel so idle users don't accumulate.
            self.channels.remove_if(&recipient, |_, s| s.receiver_count() == 0);
        }
    }

    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.channels
            .get(&user_id)
            .map_or(0, |s| s.receiver_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotificationKind;
    use chrono::NaiveDate;

    fn notification(recipient_id: UserId) -> Notification {
        Notification {
            id: 1,
            recipient_id,
            kind: NotificationKind::BookingReminder,
            title: "Upcoming meeting".into(),
            message: "Your meeting starts in 1 hour".into(),
            booking_id: Some(9),
            created_at: NaiveDate::from_ymd_opt(2026, 4, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            is_read: false,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(7);

        hub.send(&notification(7));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, notification(7));
    }

    #[tokio::test]
    async fn other_users_do_not_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(7);

        hub.send(&notification(8));

        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&notification(3));
        assert_eq!(hub.subscriber_count(3), 0);
    }

    #[test]
    fn dropped_receivers_release_the_channel() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe(4);
        assert_eq!(hub.subscriber_count(4), 1);
        drop(rx);

        hub.send(&notification(4));
        assert_eq!(hub.subscriber_count(4), 0);
        assert!(hub.channels.get(&4).is_none());
    }
}

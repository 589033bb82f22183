use chrono::TimeDelta;
use tokio::sync::broadcast;

use crate::limits::REMINDER_LEAD_SECS;
use crate::model::*;
use crate::observability::{record, REMINDERS_SENT_TOTAL};

use super::{BookingRepository, Engine, EngineError, NotificationRepository};

impl Engine {
    /// Build an unread notification with a fresh id. Not yet committed.
    pub(super) fn draft_notification(
        &self,
        recipient_id: UserId,
        kind: NotificationKind,
        title: String,
        message: String,
        booking_id: Option<BookingId>,
    ) -> Notification {
        Notification {
            id: self.allocate_notification_id(),
            recipient_id,
            kind,
            title,
            message,
            booking_id,
            created_at: self.now(),
            is_read: false,
        }
    }

    pub async fn create_notification(
        &self,
        recipient_id: UserId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        booking_id: Option<BookingId>,
    ) -> Result<Notification, EngineError> {
        let notification = self.draft_notification(recipient_id, kind, title.to_string(), message.to_string(), booking_id);
        let result = self
            .persist_and_apply(vec![Event::NotificationCreated(notification.clone())])
            .await
            .map(|()| notification);
        record("create_notification", &result);
        result
    }

    /// A user's notifications, newest first. Due reminders are sent first so
    /// they show up in this same listing.
    pub async fn list_notifications_for_user(&self, user_id: UserId) -> Vec<Notification> {
        if let Err(e) = self.process_reminders().await {
            tracing::warn!("reminder pass before listing notifications failed: {e}");
        }
        let mut list = self.notifications.for_recipient(user_id);
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list
    }

    pub fn unread_count(&self, user_id: UserId) -> usize {
        self.notifications
            .for_recipient(user_id)
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    pub async fn mark_notification_read(
        &self,
        user: &User,
        notification_id: NotificationId,
    ) -> Result<Notification, EngineError> {
        let result = self.mark_notification_read_inner(user, notification_id).await;
        record("mark_notification_read", &result);
        result
    }

    async fn mark_notification_read_inner(
        &self,
        user: &User,
        notification_id: NotificationId,
    ) -> Result<Notification, EngineError> {
        let mut notification = self.owned_notification(user, notification_id)?;
        if notification.is_read {
            return Ok(notification);
        }
        self.persist_and_apply(vec![Event::NotificationRead { id: notification_id }])
            .await?;
        notification.is_read = true;
        Ok(notification)
    }

    /// Only the recipient may delete a notification.
    pub async fn delete_notification(&self, user: &User, notification_id: NotificationId) -> Result<(), EngineError> {
        let result = match self.owned_notification(user, notification_id) {
            Ok(_) => {
                self.persist_and_apply(vec![Event::NotificationDeleted { id: notification_id }])
                    .await
            }
            Err(e) => Err(e),
        };
        record("delete_notification", &result);
        result
    }

    /// Live feed of notifications created for `user_id` from now on.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Notification> {
        self.notify.subscribe(user_id)
    }

    /// Send the one-hour reminder for every confirmed booking whose start
    /// falls in `[now + 1h, now + 1h + tolerance]` and has not had one yet.
    /// Returns how many bookings were reminded. Safe to call repeatedly.
    pub async fn process_reminders(&self) -> Result<usize, EngineError> {
        let result = self.process_reminders_inner().await;
        match &result {
            Ok(0) => {}
            Ok(n) => {
                metrics::counter!(REMINDERS_SENT_TOTAL).increment(*n as u64);
                tracing::info!("sent reminders for {n} bookings");
            }
            Err(_) => record("process_reminders", &result),
        }
        result
    }

    async fn process_reminders_inner(&self) -> Result<usize, EngineError> {
        let lead = TimeDelta::seconds(REMINDER_LEAD_SECS);
        let due = |b: &Booking, now: Timestamp| {
            let target = now + lead;
            b.is_active() && !b.reminder_sent && b.span.start >= target && b.span.start <= target + self.reminder_tolerance
        };

        let now = self.now();
        let mut candidates: Vec<BookingId> = self
            .bookings
            .all()
            .into_iter()
            .filter(|b| due(b, now))
            .map(|b| b.id)
            .collect();
        candidates.sort_unstable();

        let mut sent = 0;
        for id in candidates {
            let (booking, _guards) = match self.lock_booking(id, None).await {
                Ok(locked) => locked,
                // Cancelled in the meantime.
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !due(&booking, self.now()) {
                continue;
            }
            let mut events = vec![Event::NotificationCreated(self.draft_notification(
                booking.organiser_id,
                NotificationKind::BookingReminder,
                "Meeting reminder".into(),
                format!("Your meeting {} starts in one hour.", self.describe(&booking)),
                Some(booking.id),
            ))];
            let organiser = self.user_name(booking.organiser_id);
            for &user_id in &booking.accepted_attendee_ids {
                events.push(Event::NotificationCreated(self.draft_notification(
                    user_id,
                    NotificationKind::BookingReminder,
                    "Meeting reminder".into(),
                    format!(
                        "Meeting {} organised by {organiser} starts in one hour.",
                        self.describe(&booking)
                    ),
                    Some(booking.id),
                )));
            }
            events.push(Event::ReminderSent { booking_id: booking.id });
            self.persist_and_apply(events).await?;
            sent += 1;
        }
        Ok(sent)
    }

    fn owned_notification(&self, user: &User, notification_id: NotificationId) -> Result<Notification, EngineError> {
        let notification = self
            .notifications
            .get(notification_id)
            .ok_or_else(|| EngineError::NotFound(format!("notification {notification_id}")))?;
        if notification.recipient_id != user.id {
            return Err(EngineError::forbidden("this notification belongs to another user"));
        }
        Ok(notification)
    }
}

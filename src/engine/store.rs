use dashmap::DashMap;

use crate::model::*;

/// Storage seam for bookings. The engine validates and serialises; the
/// repository only stores.
pub trait BookingRepository: Send + Sync {
    fn get(&self, id: BookingId) -> Option<Booking>;
    /// Insert or replace.
    fn put(&self, booking: Booking);
    fn remove(&self, id: BookingId) -> Option<Booking>;
    fn for_room(&self, room_id: RoomId) -> Vec<Booking>;
    fn all(&self) -> Vec<Booking>;
}

pub trait NotificationRepository: Send + Sync {
    fn get(&self, id: NotificationId) -> Option<Notification>;
    fn put(&self, notification: Notification);
    fn remove(&self, id: NotificationId) -> Option<Notification>;
    fn for_recipient(&self, user_id: UserId) -> Vec<Notification>;
    fn all(&self) -> Vec<Notification>;
}

/// Default in-process store backing both repositories.
pub struct InMemoryStore {
    bookings: DashMap<BookingId, Booking>,
    /// Room → booking ids on that room.
    by_room: DashMap<RoomId, Vec<BookingId>>,
    notifications: DashMap<NotificationId, Notification>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            by_room: DashMap::new(),
            notifications: DashMap::new(),
        }
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    fn unindex(&self, room_id: RoomId, id: BookingId) {
        if let Some(mut ids) = self.by_room.get_mut(&room_id) {
            ids.retain(|b| *b != id);
        }
    }
}

impl BookingRepository for InMemoryStore {
    fn get(&self, id: BookingId) -> Option<Booking> {
        self.bookings.get(&id).map(|e| e.value().clone())
    }

    fn put(&self, booking: Booking) {
        let id = booking.id;
        let room_id = booking.room_id;
        if let Some(previous) = self.bookings.insert(id, booking) {
            if previous.room_id == room_id {
                return;
            }
            self.unindex(previous.room_id, id);
        }
        self.by_room.entry(room_id).or_default().push(id);
    }

    fn remove(&self, id: BookingId) -> Option<Booking> {
        let (_, booking) = self.bookings.remove(&id)?;
        self.unindex(booking.room_id, id);
        Some(booking)
    }

    fn for_room(&self, room_id: RoomId) -> Vec<Booking> {
        let ids = self
            .by_room
            .get(&room_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| BookingRepository::get(self, id))
            .collect()
    }

    fn all(&self) -> Vec<Booking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }
}

impl NotificationRepository for InMemoryStore {
    fn get(&self, id: NotificationId) -> Option<Notification> {
        self.notifications.get(&id).map(|e| e.value().clone())
    }

    fn put(&self, notification: Notification) {
        self.notifications.insert(notification.id, notification);
    }

    fn remove(&self, id: NotificationId) -> Option<Notification> {
        self.notifications.remove(&id).map(|(_, n)| n)
    }

    fn for_recipient(&self, user_id: UserId) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|e| e.value().recipient_id == user_id)
            .map(|e| e.value().clone())
            .collect()
    }

    fn all(&self) -> Vec<Notification> {
        self.notifications.iter().map(|e| e.value().clone()).collect()
    }
}

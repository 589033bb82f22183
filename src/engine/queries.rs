use chrono::TimeDelta;

use crate::directory::RoomDirectory;
use crate::model::*;
use crate::observability::record;
use crate::validate;

use super::availability::free_windows;
use super::conflict::first_conflict;
use super::{BookingRepository, Engine, EngineError};

impl Engine {
    /// A single booking, if the caller may see it.
    pub fn get_booking(&self, caller: &User, booking_id: BookingId) -> Result<Booking, EngineError> {
        let result = self
            .bookings
            .get(booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))
            .and_then(|b| {
                if b.visible_to(caller.id) {
                    Ok(b)
                } else {
                    Err(EngineError::forbidden("this booking is private"))
                }
            });
        record("get_booking", &result);
        result
    }

    /// Bookings the user organises or is invited to that have not ended,
    /// soonest first.
    pub fn list_upcoming_for_user(&self, user_id: UserId) -> Vec<Booking> {
        let now = self.now();
        let mut list: Vec<Booking> = self
            .bookings
            .all()
            .into_iter()
            .filter(|b| b.is_active() && b.involves(user_id) && b.span.end > now)
            .collect();
        list.sort_by_key(|b| (b.span.start, b.id));
        list
    }

    /// Bookings the user took part in that have ended, most recent first.
    pub fn list_past_for_user(&self, user_id: UserId) -> Vec<Booking> {
        let now = self.now();
        let mut list: Vec<Booking> = self
            .bookings
            .all()
            .into_iter()
            .filter(|b| b.is_active() && b.involves(user_id) && b.span.end <= now)
            .collect();
        list.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));
        list
    }

    pub fn list_organized_by_user(&self, user_id: UserId) -> Vec<Booking> {
        let mut list: Vec<Booking> = self
            .bookings
            .all()
            .into_iter()
            .filter(|b| b.is_active() && b.organiser_id == user_id)
            .collect();
        list.sort_by_key(|b| (b.span.start, b.id));
        list
    }

    /// Public bookings that have not started yet: the ones open for registration.
    pub fn list_public_bookings(&self) -> Vec<Booking> {
        let now = self.now();
        let mut list: Vec<Booking> = self
            .bookings
            .all()
            .into_iter()
            .filter(|b| b.is_active() && b.visibility == Visibility::Public && b.span.start > now)
            .collect();
        list.sort_by_key(|b| (b.span.start, b.id));
        list
    }

    /// True when no active booking on `room_id` other than `excluding` overlaps `span`.
    pub fn is_available(&self, room_id: RoomId, span: &Span, excluding: Option<BookingId>) -> bool {
        first_conflict(&self.bookings.for_room(room_id), span, excluding).is_none()
    }

    /// Rooms free for the whole window, optionally with at least `min_capacity` seats.
    pub fn get_available_rooms(
        &self,
        date: &str,
        start_time: &str,
        end_time: &str,
        min_capacity: Option<u32>,
    ) -> Result<Vec<Room>, EngineError> {
        let result = validate::parse_window(date, start_time, end_time).map(|span| {
            self.rooms
                .list_rooms()
                .into_iter()
                .filter(|r| min_capacity.is_none_or(|min| r.capacity >= min))
                .filter(|r| self.is_available(r.id, &span, None))
                .collect()
        });
        record("get_available_rooms", &result);
        result
    }

    /// A room's bookings on `date` together with the gaps between them.
    pub fn room_schedule(&self, room_id: RoomId, date: &str) -> Result<RoomSchedule, EngineError> {
        let result = self.room_schedule_inner(room_id, date);
        record("room_schedule", &result);
        result
    }

    fn room_schedule_inner(&self, room_id: RoomId, date: &str) -> Result<RoomSchedule, EngineError> {
        let day = validate::parse_date(date)?;
        if self.rooms.get_room(room_id).is_none() {
            return Err(EngineError::NotFound(format!("room {room_id}")));
        }
        let start = day.and_time(chrono::NaiveTime::MIN);
        let window = Span::new(start, start + TimeDelta::days(1));

        let mut bookings: Vec<Booking> = self
            .bookings
            .for_room(room_id)
            .into_iter()
            .filter(|b| b.is_active() && b.span.overlaps(&window))
            .collect();
        bookings.sort_by_key(|b| (b.span.start, b.id));
        let free = free_windows(&window, &bookings);
        Ok(RoomSchedule {
            room_id,
            bookings,
            free,
        })
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        self.rooms.list_rooms()
    }

    pub fn get_room(&self, room_id: RoomId) -> Result<Room, EngineError> {
        self.rooms
            .get_room(room_id)
            .ok_or_else(|| EngineError::NotFound(format!("room {room_id}")))
    }
}

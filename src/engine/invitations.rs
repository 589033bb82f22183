use crate::directory::{RoomDirectory, UserDirectory};
use crate::model::*;
use crate::observability::record;
use crate::validate;

use super::conflict::check_capacity;
use super::{BookingRepository, Engine, EngineError};

impl Engine {
    /// Move `user` from pending to accepted.
    pub async fn accept_invitation(&self, user: &User, booking_id: BookingId) -> Result<Booking, EngineError> {
        let result = self.accept_invitation_inner(user, booking_id).await;
        record("accept_invitation", &result);
        result
    }

    async fn accept_invitation_inner(&self, user: &User, booking_id: BookingId) -> Result<Booking, EngineError> {
        let (booking, _guards) = self.lock_booking(booking_id, None).await?;
        match booking.participation(user.id) {
            Participation::Organiser => {
                return Err(EngineError::invalid("the organiser does not accept their own booking"));
            }
            Participation::Accepted => {
                return Err(EngineError::invalid("invitation already accepted"));
            }
            Participation::None => {
                return Err(EngineError::invalid("no pending invitation for this booking"));
            }
            Participation::Pending => {}
        }
        // Only confirmed seats count here; other pending invitees hold no seat yet.
        let room = self.booking_room(&booking)?;
        check_capacity(&room, 1 + booking.accepted_attendee_ids.len() + 1)?;
        if booking.span.start <= self.now() {
            return Err(EngineError::invalid("the meeting has already started"));
        }

        self.persist_and_apply(vec![Event::InvitationAccepted {
            booking_id,
            user_id: user.id,
        }])
        .await?;
        tracing::info!(booking_id, user_id = user.id, "invitation accepted");
        self.current(booking_id)
    }

    /// Leave a booking: decline a pending invitation, or withdraw an
    /// acceptance before the meeting starts. The organiser is told either way.
    pub async fn decline_invitation(
        &self,
        user: &User,
        booking_id: BookingId,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let result = self.decline_invitation_inner(user, booking_id, reason).await;
        record("decline_invitation", &result);
        result
    }

    async fn decline_invitation_inner(
        &self,
        user: &User,
        booking_id: BookingId,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let (booking, _guards) = self.lock_booking(booking_id, None).await?;
        let participation = booking.participation(user.id);
        match participation {
            Participation::Organiser => {
                return Err(EngineError::invalid(
                    "the organiser cannot decline their own booking; cancel it instead",
                ));
            }
            Participation::None => {
                return Err(EngineError::invalid("you are not invited to this booking"));
            }
            Participation::Accepted if booking.span.start <= self.now() => {
                return Err(EngineError::invalid(
                    "cannot cancel attendance after the meeting has started",
                ));
            }
            Participation::Accepted | Participation::Pending => {}
        }
        let reason = validate::reason(reason)?;

        let (title, verb) = if participation == Participation::Pending {
            ("Invitation declined", "declined the invitation to")
        } else {
            ("Attendance cancelled", "cancelled their attendance for")
        };
        let mut message = format!("{} {verb} {}.", user.name, self.describe(&booking));
        if let Some(r) = reason {
            message.push_str(&format!(" Reason: {r}"));
        }
        let notice = self.draft_notification(
            booking.organiser_id,
            NotificationKind::InvitationDeclined,
            title.into(),
            message,
            Some(booking_id),
        );
        self.persist_and_apply(vec![
            Event::InvitationDeclined {
                booking_id,
                user_id: user.id,
            },
            Event::NotificationCreated(notice),
        ])
        .await?;
        tracing::info!(booking_id, user_id = user.id, "invitation declined");
        Ok(())
    }

    /// Self-service join of a public booking that still has a free seat.
    pub async fn register_for_booking(&self, user: &User, booking_id: BookingId) -> Result<Booking, EngineError> {
        let result = self.register_for_booking_inner(user, booking_id).await;
        record("register_for_booking", &result);
        result
    }

    async fn register_for_booking_inner(&self, user: &User, booking_id: BookingId) -> Result<Booking, EngineError> {
        let (booking, _guards) = self.lock_booking(booking_id, None).await?;
        match booking.participation(user.id) {
            Participation::Organiser => {
                return Err(EngineError::invalid("you are the organiser of this booking"));
            }
            Participation::Accepted => {
                return Err(EngineError::invalid("you are already registered for this booking"));
            }
            Participation::Pending => {
                return Err(EngineError::invalid(
                    "you already have a pending invitation; accept it instead",
                ));
            }
            Participation::None => {}
        }
        if booking.span.start <= self.now() {
            return Err(EngineError::invalid("the meeting has already started"));
        }
        let room = self.booking_room(&booking)?;
        if booking.seats_taken() + 1 > room.capacity as usize {
            return Err(EngineError::invalid("booking is at full capacity"));
        }
        if booking.visibility != Visibility::Public {
            return Err(EngineError::forbidden("this booking is private"));
        }

        let notice = self.draft_notification(
            booking.organiser_id,
            NotificationKind::AttendeeRegistered,
            "New attendee".into(),
            format!("{} registered for {}.", user.name, self.describe(&booking)),
            Some(booking_id),
        );
        self.persist_and_apply(vec![
            Event::AttendeeRegistered {
                booking_id,
                user_id: user.id,
            },
            Event::NotificationCreated(notice),
        ])
        .await?;
        tracing::info!(booking_id, user_id = user.id, "attendee registered");
        self.current(booking_id)
    }

    fn booking_room(&self, booking: &Booking) -> Result<Room, EngineError> {
        self.rooms.get_room(booking.room_id).ok_or_else(|| {
            EngineError::Internal(format!(
                "booking {} references unknown room {}",
                booking.id, booking.room_id
            ))
        })
    }

    /// Re-read a booking just written under the caller's lock.
    fn current(&self, booking_id: BookingId) -> Result<Booking, EngineError> {
        self.bookings
            .get(booking_id)
            .ok_or_else(|| EngineError::Internal(format!("booking {booking_id} vanished after commit")))
    }

    /// Display name for a user id, falling back to the id.
    pub(super) fn user_name(&self, user_id: UserId) -> String {
        self.users
            .get_user(user_id)
            .map(|u| u.name)
            .unwrap_or_else(|| format!("user {user_id}"))
    }
}

use std::collections::BTreeSet;

use crate::directory::{RoomDirectory, UserDirectory};
use crate::limits::*;
use crate::model::*;
use crate::observability::record;
use crate::validate;

use super::conflict::{check_capacity, check_no_conflict};
use super::{BookingRepository, Engine, EngineError};

/// Request fields that validate without looking at any state.
struct ValidatedFields {
    span: Span,
    title: String,
    notes: Option<String>,
}

impl Engine {
    pub async fn create_booking(&self, caller: &User, request: BookingRequest) -> Result<Booking, EngineError> {
        let result = self.create_booking_inner(caller, request).await;
        record("create_booking", &result);
        if let Ok(b) = &result {
            tracing::info!(
                booking_id = b.id,
                room_id = b.room_id,
                organiser_id = b.organiser_id,
                "booking created for {}",
                b.span.start
            );
        }
        result
    }

    async fn create_booking_inner(&self, caller: &User, request: BookingRequest) -> Result<Booking, EngineError> {
        if !caller.role.can_organise() {
            return Err(EngineError::forbidden("only organisers can create bookings"));
        }
        let fields = validate_fields(&request)?;
        let now = self.now();
        if fields.span.start < now {
            return Err(EngineError::invalid("cannot book a time in the past"));
        }
        let room = self.room_for(caller, request.room_id)?;
        let attendees = self.resolve_attendees(caller.id, &request.attendee_emails)?;
        check_capacity(&room, 1 + attendees.len())?;

        let _guards = self.lock_rooms(vec![room.id]).await;
        check_no_conflict(&self.bookings.for_room(room.id), &fields.span, None)?;

        let booking = Booking {
            id: self.allocate_booking_id(),
            room_id: room.id,
            organiser_id: caller.id,
            title: fields.title,
            notes: fields.notes,
            span: fields.span,
            status: BookingStatus::Confirmed,
            visibility: request.visibility,
            accepted_attendee_ids: BTreeSet::new(),
            pending_attendee_ids: attendees,
            reminder_sent: false,
            created_at: now,
        };
        self.persist_and_apply(vec![Event::BookingCreated(booking.clone())])
            .await?;
        Ok(booking)
    }

    /// Full rewrite of a booking by its organiser. Accepted attendees who are
    /// still requested stay accepted; everyone else requested is pending.
    pub async fn update_booking(
        &self,
        caller: &User,
        booking_id: BookingId,
        request: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let result = self.update_booking_inner(caller, booking_id, request).await;
        record("update_booking", &result);
        if let Ok(b) = &result {
            tracing::info!(booking_id = b.id, room_id = b.room_id, "booking updated");
        }
        result
    }

    async fn update_booking_inner(
        &self,
        caller: &User,
        booking_id: BookingId,
        request: BookingRequest,
    ) -> Result<Booking, EngineError> {
        // Unknown rooms get no lock entry; `room_for` rejects them below.
        let target_room = self.rooms.get_room(request.room_id).map(|r| r.id);
        let (current, _guards) = self.lock_booking(booking_id, target_room).await?;
        if current.organiser_id != caller.id {
            return Err(EngineError::forbidden("only the organiser can modify this booking"));
        }
        let fields = validate_fields(&request)?;
        let room = self.room_for(caller, request.room_id)?;
        let requested = self.resolve_attendees(current.organiser_id, &request.attendee_emails)?;

        let accepted: BTreeSet<UserId> = current
            .accepted_attendee_ids
            .intersection(&requested)
            .copied()
            .collect();
        let pending: BTreeSet<UserId> = requested.difference(&accepted).copied().collect();
        check_capacity(&room, 1 + accepted.len() + pending.len())?;
        check_no_conflict(&self.bookings.for_room(room.id), &fields.span, Some(booking_id))?;

        let updated = Booking {
            room_id: room.id,
            title: fields.title,
            notes: fields.notes,
            span: fields.span,
            visibility: request.visibility,
            accepted_attendee_ids: accepted,
            pending_attendee_ids: pending,
            ..current
        };
        self.persist_and_apply(vec![Event::BookingUpdated(updated.clone())])
            .await?;
        Ok(updated)
    }

    /// Cancel and remove a booking. Everyone invited hears about it first.
    pub async fn cancel_booking(
        &self,
        caller: &User,
        booking_id: BookingId,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let result = self.cancel_booking_inner(caller, booking_id, reason).await;
        record("cancel_booking", &result);
        if let Ok(notified) = &result {
            tracing::info!(booking_id, notified, "booking cancelled");
        }
        result.map(|_| ())
    }

    async fn cancel_booking_inner(
        &self,
        caller: &User,
        booking_id: BookingId,
        reason: Option<&str>,
    ) -> Result<usize, EngineError> {
        let (booking, _guards) = self.lock_booking(booking_id, None).await?;
        if booking.organiser_id != caller.id {
            return Err(EngineError::forbidden("only the organiser can cancel this booking"));
        }
        let reason = validate::reason(reason)?;

        let summary = self.describe(&booking);
        let reason_suffix = reason.map(|r| format!(" Reason: {r}")).unwrap_or_default();
        let mut events = Vec::with_capacity(booking.seats_taken());
        for &user_id in &booking.accepted_attendee_ids {
            events.push(Event::NotificationCreated(self.draft_notification(
                user_id,
                NotificationKind::BookingCancelled,
                "Meeting cancelled".into(),
                format!("The meeting {summary} has been cancelled.{reason_suffix}"),
                Some(booking.id),
            )));
        }
        for &user_id in &booking.pending_attendee_ids {
            events.push(Event::NotificationCreated(self.draft_notification(
                user_id,
                NotificationKind::InvitationCancelled,
                "Invitation cancelled".into(),
                format!("Your invitation to the meeting {summary} has been cancelled.{reason_suffix}"),
                Some(booking.id),
            )));
        }
        let notified = events.len();
        events.push(Event::BookingCancelled {
            id: booking.id,
            room_id: booking.room_id,
        });
        self.persist_and_apply(events).await?;
        Ok(notified)
    }

    /// Add one attendee by email, keeping everything else as it is.
    pub async fn invite_attendee(
        &self,
        caller: &User,
        booking_id: BookingId,
        email: &str,
    ) -> Result<Booking, EngineError> {
        let current = self.booking_for_organiser(caller, booking_id)?;
        let mut request = self.request_from(&current);
        request.attendee_emails.push(email.to_string());
        self.update_booking(caller, booking_id, request).await
    }

    /// Drop one attendee (pending or accepted) by email.
    pub async fn remove_attendee(
        &self,
        caller: &User,
        booking_id: BookingId,
        email: &str,
    ) -> Result<Booking, EngineError> {
        let current = self.booking_for_organiser(caller, booking_id)?;
        let target = validate::normalize_email(email)
            .ok_or_else(|| EngineError::invalid(format!("invalid email '{}'", email.trim())))?;
        let mut request = self.request_from(&current);
        let before = request.attendee_emails.len();
        request.attendee_emails.retain(|e| *e != target);
        if request.attendee_emails.len() == before {
            return Err(EngineError::invalid(format!("{target} is not invited to this booking")));
        }
        self.update_booking(caller, booking_id, request).await
    }

    // ── helpers ─────────────────────────────────────────────

    fn booking_for_organiser(&self, caller: &User, booking_id: BookingId) -> Result<Booking, EngineError> {
        let booking = self
            .bookings
            .get(booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        if booking.organiser_id != caller.id {
            return Err(EngineError::forbidden("only the organiser can modify this booking"));
        }
        Ok(booking)
    }

    /// The request that would reproduce `booking` as it stands.
    fn request_from(&self, booking: &Booking) -> BookingRequest {
        let attendee_emails = booking
            .accepted_attendee_ids
            .iter()
            .chain(&booking.pending_attendee_ids)
            .filter_map(|id| self.users.get_user(*id))
            .filter_map(|u| validate::normalize_email(&u.email))
            .collect();
        BookingRequest {
            room_id: booking.room_id,
            title: booking.title.clone(),
            date: booking.span.start.format("%Y-%m-%d").to_string(),
            start_time: booking.span.start.format("%H:%M").to_string(),
            end_time: booking.span.end.format("%H:%M").to_string(),
            attendee_emails,
            notes: booking.notes.clone(),
            visibility: booking.visibility,
        }
    }

    fn room_for(&self, caller: &User, room_id: RoomId) -> Result<Room, EngineError> {
        let room = self
            .rooms
            .get_room(room_id)
            .ok_or_else(|| EngineError::NotFound(format!("room {room_id}")))?;
        if !room.admits_role(caller.role) {
            return Err(EngineError::forbidden(format!(
                "room '{}' is restricted to: {}",
                room.name,
                room.restricted_to_roles.join(", ")
            )));
        }
        Ok(room)
    }

    /// Resolve every email, reporting all unknown or malformed ones together.
    /// The organiser's own address is ignored.
    pub(super) fn resolve_attendees(
        &self,
        organiser_id: UserId,
        emails: &[String],
    ) -> Result<BTreeSet<UserId>, EngineError> {
        if emails.len() > MAX_ATTENDEES_PER_BOOKING {
            return Err(EngineError::invalid(format!(
                "at most {MAX_ATTENDEES_PER_BOOKING} attendees per booking"
            )));
        }
        let mut resolved = BTreeSet::new();
        let mut unresolved: Vec<String> = Vec::new();
        for raw in emails {
            let user = validate::normalize_email(raw)
                .and_then(|email| self.users.resolve_by_email(&email));
            match user {
                Some(u) if u.id == organiser_id => {}
                Some(u) => {
                    resolved.insert(u.id);
                }
                None => {
                    let shown = raw.trim().to_string();
                    if !unresolved.contains(&shown) {
                        unresolved.push(shown);
                    }
                }
            }
        }
        if !unresolved.is_empty() {
            return Err(EngineError::invalid(format!(
                "unknown attendee emails: {}",
                unresolved.join(", ")
            )));
        }
        Ok(resolved)
    }

    /// "'Title' in Room on 2026-02-01 09:00-10:00"
    pub(super) fn describe(&self, booking: &Booking) -> String {
        let room = self
            .rooms
            .get_room(booking.room_id)
            .map(|r| r.name)
            .unwrap_or_else(|| format!("room {}", booking.room_id));
        format!(
            "'{}' in {} on {} {}-{}",
            booking.title,
            room,
            booking.span.start.format("%Y-%m-%d"),
            booking.span.start.format("%H:%M"),
            booking.span.end.format("%H:%M")
        )
    }
}

fn validate_fields(request: &BookingRequest) -> Result<ValidatedFields, EngineError> {
    let span = validate::parse_window(&request.date, &request.start_time, &request.end_time)?;
    let title = validate::title(&request.title)?;
    let notes = validate::notes(request.notes.as_deref())?;
    Ok(ValidatedFields { span, title, notes })
}

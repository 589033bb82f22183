use crate::model::*;

use super::EngineError;

/// Fail with `Conflict` if any active booking (other than `exclude`) overlaps `span`.
pub(crate) fn check_no_conflict(
    existing: &[Booking],
    span: &Span,
    exclude: Option<BookingId>,
) -> Result<(), EngineError> {
    match first_conflict(existing, span, exclude) {
        Some(other) => Err(EngineError::Conflict(format!(
            "room {} is already booked {} to {} (booking {})",
            other.room_id,
            other.span.start.format("%Y-%m-%d %H:%M"),
            other.span.end.format("%H:%M"),
            other.id
        ))),
        None => Ok(()),
    }
}

pub(crate) fn first_conflict<'a>(
    existing: &'a [Booking],
    span: &Span,
    exclude: Option<BookingId>,
) -> Option<&'a Booking> {
    existing
        .iter()
        .filter(|b| b.is_active() && Some(b.id) != exclude)
        .find(|b| b.span.overlaps(span))
}

/// The single place seat arithmetic is checked: organiser + everyone else must fit.
pub(crate) fn check_capacity(room: &Room, seats: usize) -> Result<(), EngineError> {
    if seats > room.capacity as usize {
        return Err(EngineError::InvalidInput(format!(
            "room '{}' holds {} people; this booking needs {} (organiser included)",
            room.name, room.capacity, seats
        )));
    }
    Ok(())
}

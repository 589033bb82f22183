use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type RoomId = u64;
pub type BookingId = u64;
pub type NotificationId = u64;

/// Naive local timestamp, the only time type.
pub type Timestamp = NaiveDateTime;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organiser,
    Attendee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Organiser => "organiser",
            Role::Attendee => "attendee",
        }
    }

    pub fn can_organise(&self) -> bool {
        matches!(self, Role::Organiser)
    }
}

/// External identity. Owned by the user directory, consumed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub facilities: BTreeSet<String>,
    #[serde(default)]
    pub accessibility: BTreeSet<String>,
    /// Role names allowed to book this room. Empty means anyone.
    #[serde(default)]
    pub restricted_to_roles: Vec<String>,
    #[serde(default)]
    pub building: String,
}

impl Room {
    pub fn admits_role(&self, role: Role) -> bool {
        self.restricted_to_roles.is_empty()
            || self.restricted_to_roles.iter().any(|r| r == role.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// How a user relates to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    Organiser,
    Accepted,
    Pending,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub organiser_id: UserId,
    pub title: String,
    pub notes: Option<String>,
    pub span: Span,
    pub status: BookingStatus,
    pub visibility: Visibility,
    /// Disjoint from `pending_attendee_ids`; never holds the organiser.
    pub accepted_attendee_ids: BTreeSet<UserId>,
    pub pending_attendee_ids: BTreeSet<UserId>,
    /// Flips to true once, never back.
    pub reminder_sent: bool,
    pub created_at: Timestamp,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    /// Organiser + accepted + pending. The organiser always holds one seat
    /// without being listed.
    pub fn seats_taken(&self) -> usize {
        1 + self.accepted_attendee_ids.len() + self.pending_attendee_ids.len()
    }

    pub fn participation(&self, user_id: UserId) -> Participation {
        if user_id == self.organiser_id {
            Participation::Organiser
        } else if self.accepted_attendee_ids.contains(&user_id) {
            Participation::Accepted
        } else if self.pending_attendee_ids.contains(&user_id) {
            Participation::Pending
        } else {
            Participation::None
        }
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.participation(user_id) != Participation::None
    }

    /// Private bookings are visible to the organiser and to invitees,
    /// pending or accepted.
    pub fn visible_to(&self, user_id: UserId) -> bool {
        self.visibility == Visibility::Public || self.involves(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingCancelled,
    InvitationCancelled,
    InvitationDeclined,
    BookingReminder,
    AttendeeRegistered,
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::InvitationCancelled => "invitation_cancelled",
            NotificationKind::InvitationDeclined => "invitation_declined",
            NotificationKind::BookingReminder => "booking_reminder",
            NotificationKind::AttendeeRegistered => "attendee_registered",
            NotificationKind::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub booking_id: Option<BookingId>,
    pub created_at: Timestamp,
    pub is_read: bool,
}

/// The event types. Flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated(Booking),
    BookingUpdated(Booking),
    BookingCancelled {
        id: BookingId,
        room_id: RoomId,
    },
    InvitationAccepted {
        booking_id: BookingId,
        user_id: UserId,
    },
    InvitationDeclined {
        booking_id: BookingId,
        user_id: UserId,
    },
    AttendeeRegistered {
        booking_id: BookingId,
        user_id: UserId,
    },
    ReminderSent {
        booking_id: BookingId,
    },
    NotificationCreated(Notification),
    NotificationRead {
        id: NotificationId,
    },
    NotificationDeleted {
        id: NotificationId,
    },
    /// Written first on compaction so ids are never handed out twice.
    IdWatermark {
        booking: BookingId,
        notification: NotificationId,
    },
}

// ── Request / query result types ─────────────────────────────────

/// Everything an organiser supplies when creating or rewriting a booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub room_id: RoomId,
    pub title: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    #[serde(default)]
    pub attendee_emails: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSchedule {
    pub room_id: RoomId,
    pub bookings: Vec<Booking>,
    pub free: Vec<Span>,
}

//! Hard limits on request sizes. Anything beyond these is rejected as invalid input.

pub const MIN_TITLE_LEN: usize = 3;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_ATTENDEES_PER_BOOKING: usize = 100;

/// How far ahead of a booking's start the reminder goes out.
pub const REMINDER_LEAD_SECS: i64 = 3600;

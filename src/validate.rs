//! Normalisation and validation of user-supplied fields.

use chrono::{NaiveDate, NaiveTime};

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::Span;

/// Combine a `YYYY-MM-DD` date with `HH:MM` start/end clock times.
pub fn parse_window(date: &str, start: &str, end: &str) -> Result<Span, EngineError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::invalid(format!("invalid date '{date}', expected YYYY-MM-DD")))?;
    let start_time = parse_clock(start)?;
    let end_time = parse_clock(end)?;
    if end_time <= start_time {
        return Err(EngineError::invalid("end time must be after start time"));
    }
    Ok(Span::new(day.and_time(start_time), day.and_time(end_time)))
}

pub fn parse_date(date: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::invalid(format!("invalid date '{date}', expected YYYY-MM-DD")))
}

fn parse_clock(value: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| EngineError::invalid(format!("invalid time '{value}', expected HH:MM")))
}

pub fn title(raw: &str) -> Result<String, EngineError> {
    let title = raw.trim();
    let len = title.chars().count();
    if len < MIN_TITLE_LEN {
        return Err(EngineError::invalid(format!(
            "title must be at least {MIN_TITLE_LEN} characters"
        )));
    }
    if len > MAX_TITLE_LEN {
        return Err(EngineError::invalid(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

/// Empty notes collapse to `None`.
pub fn notes(raw: Option<&str>) -> Result<Option<String>, EngineError> {
    optional_text(raw, MAX_NOTES_LEN, "notes")
}

pub fn reason(raw: Option<&str>) -> Result<Option<String>, EngineError> {
    optional_text(raw, MAX_REASON_LEN, "reason")
}

fn optional_text(raw: Option<&str>, max: usize, field: &str) -> Result<Option<String>, EngineError> {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > max {
        return Err(EngineError::invalid(format!("{field} must be at most {max} characters")));
    }
    Ok(Some(text.to_string()))
}

/// Trimmed, lower-cased address, or `None` if it is not shaped like one.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return None;
    }
    let (local, domain) = email.split_once('@')?;
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let domain_ok = domain
        .rsplit_once('.')
        .is_some_and(|(host, tld)| {
            !host.is_empty()
                && host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                && tld.len() >= 2
                && tld.chars().all(|c| c.is_ascii_alphabetic())
        });
    (local_ok && domain_ok).then_some(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_parses_date_and_clock() {
        let span = parse_window("2026-02-01", "09:00", "10:30").unwrap();
        assert_eq!(span.start.to_string(), "2026-02-01 09:00:00");
        assert_eq!(span.end.to_string(), "2026-02-01 10:30:00");
    }

    #[test]
    fn window_rejects_malformed_values() {
        assert!(matches!(parse_window("2026-13-01", "09:00", "10:00"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(parse_window("01/02/2026", "09:00", "10:00"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(parse_window("2026-02-01", "9am", "10:00"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(parse_window("2026-02-01", "09:00", "25:00"), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn window_requires_end_after_start() {
        assert!(matches!(parse_window("2026-02-01", "10:00", "10:00"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(parse_window("2026-02-01", "11:00", "10:00"), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn title_length_counts_after_trim() {
        assert_eq!(title("abc").unwrap(), "abc");
        assert_eq!(title("   Trimmed Title   ").unwrap(), "Trimmed Title");
        assert!(title("ab").is_err());
        assert!(title("  ab  ").is_err());
        assert!(title("    ").is_err());
        assert!(title(&"A".repeat(200)).is_ok());
        assert!(title(&"A".repeat(201)).is_err());
    }

    #[test]
    fn notes_trim_and_collapse() {
        assert_eq!(notes(Some("   spaced notes   ")).unwrap(), Some("spaced notes".into()));
        assert_eq!(notes(Some("   ")).unwrap(), None);
        assert_eq!(notes(None).unwrap(), None);
        assert!(notes(Some(&"n".repeat(MAX_NOTES_LEN + 1))).is_err());
    }

    #[test]
    fn email_normalisation() {
        assert_eq!(normalize_email("  Ben@Example.COM "), Some("ben@example.com".into()));
        assert_eq!(normalize_email("first.last+tag@st-andrews.ac.uk"), Some("first.last+tag@st-andrews.ac.uk".into()));
        assert_eq!(normalize_email("no-at-sign"), None);
        assert_eq!(normalize_email("a@b"), None);
        assert_eq!(normalize_email("a@b.c"), None);
        assert_eq!(normalize_email("<script>@x.com"), None);
        assert_eq!(normalize_email(""), None);
        let long = format!("{}@example.com", "a".repeat(MAX_EMAIL_LEN));
        assert_eq!(normalize_email(&long), None);
    }
}

#![forbid(unsafe_code)]

//! Due dates are stored as RFC 3339 strings. Editing surfaces accept either a
//! bare calendar date or a full timestamp, and refuse anything before today.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::error::TaskdeckError;

#[must_use]
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Parses a bare date or an RFC 3339 timestamp into the stored form.
pub fn normalize(input: &str) -> Result<String, TaskdeckError> {
    let when = parse_any(input)?;
    format_stored(when)
}

/// Like [`normalize`], but refuses dates before `today`.
pub fn parse_input(input: &str, today: Date) -> Result<String, TaskdeckError> {
    let when = parse_any(input)?;
    if when.date() < today {
        return Err(TaskdeckError::Validation(format!(
            "due date {} is in the past",
            when.date()
        )));
    }
    format_stored(when)
}

fn parse_any(input: &str) -> Result<OffsetDateTime, TaskdeckError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(TaskdeckError::Validation("due date is empty".to_owned()));
    }
    if let Ok(date) = Date::parse(raw, format_description!("[year]-[month]-[day]")) {
        return Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc());
    }
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| {
        TaskdeckError::Validation(format!(
            "invalid due date '{raw}' (expected YYYY-MM-DD or an RFC 3339 timestamp)"
        ))
    })
}

fn format_stored(when: OffsetDateTime) -> Result<String, TaskdeckError> {
    when.format(&Rfc3339)
        .map_err(|e| TaskdeckError::Other(format!("failed to format due date: {e}")))
}

#[must_use]
pub fn parse_stored(stored: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(stored, &Rfc3339).ok()
}

/// `YYYY-MM-DD`, or the raw string when it is not a timestamp.
#[must_use]
pub fn format_display(stored: &str) -> String {
    parse_stored(stored).map_or_else(|| stored.to_owned(), |t| t.date().to_string())
}

#[must_use]
pub fn is_overdue(stored: &str, today: Date) -> bool {
    parse_stored(stored).is_some_and(|t| t.date() < today)
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn bare_date_becomes_midnight_utc() {
        let out = parse_input("2031-03-04", date!(2030 - 01 - 01)).unwrap();
        assert_eq!(out, "2031-03-04T00:00:00Z");
        assert_eq!(format_display(&out), "2031-03-04");
    }

    #[test]
    fn today_is_accepted_and_yesterday_rejected() {
        let today = date!(2030 - 06 - 15);
        assert!(parse_input("2030-06-15", today).is_ok());
        let err = parse_input("2030-06-14", today).unwrap_err();
        assert!(err.to_string().contains("in the past"));
    }

    #[test]
    fn accepts_rfc3339_timestamps() {
        let out = parse_input("2030-07-01T09:30:00.000Z", date!(2030 - 01 - 01)).unwrap();
        assert!(out.starts_with("2030-07-01T09:30:00"));
    }

    #[test]
    fn normalize_allows_past_dates() {
        assert_eq!(normalize("2001-02-03").unwrap(), "2001-02-03T00:00:00Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_input("next tuesday", date!(2030 - 01 - 01)).is_err());
        assert!(parse_input("  ", date!(2030 - 01 - 01)).is_err());
    }

    #[test]
    fn display_falls_back_to_raw_text() {
        assert_eq!(format_display("someday"), "someday");
        assert!(is_overdue("2000-01-01T00:00:00Z", date!(2030 - 01 - 01)));
        assert!(!is_overdue("someday", date!(2030 - 01 - 01)));
    }
}

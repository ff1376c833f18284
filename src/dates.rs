//! Calendar date helpers.
//!
//! All schedule dates are plain calendar days. A [`NaiveDate`] stands for UTC
//! midnight of that day, so day arithmetic never crosses a DST boundary.

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::error::{DomainError, DomainResult};

const ISO_DATE: &str = "%Y-%m-%d";

/// Parse a date-only ISO string (`YYYY-MM-DD`).
pub fn parse_calendar_date(value: &str) -> DomainResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), ISO_DATE)
        .map_err(|_| DomainError::InvalidDate(value.to_string()))
}

/// Day count between two ISO dates with both endpoints included.
pub fn inclusive_day_count(start: &str, end: &str) -> DomainResult<i64> {
    Ok(inclusive_days(
        parse_calendar_date(start)?,
        parse_calendar_date(end)?,
    ))
}

pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// Shift a date forward by whole calendar days.
pub fn add_days(date: NaiveDate, days: u64) -> DomainResult<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| DomainError::validation(format!("{date} + {days} days is out of range")))
}

/// The UTC calendar day an instant falls on.
pub fn utc_day(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}

/// Parse an RFC 3339 instant or a bare calendar day (taken as UTC midnight).
pub fn parse_instant(value: &str) -> DomainResult<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value.trim()) {
        return Ok(instant.with_timezone(&Utc));
    }
    let day = parse_calendar_date(value)?;
    Ok(day.and_time(chrono::NaiveTime::MIN).and_utc())
}

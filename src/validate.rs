//! Boundary checks for user-supplied input. Each function returns the
//! normalized value or an `InvalidInput` error naming the offending field.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::WeeklySlot;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Trimmed text whose length is within `min..=max` characters.
pub fn text(label: &str, value: &str, min: usize, max: usize) -> Result<String> {
    let value = value.trim();
    let len = char_len(value);
    if len < min {
        return Err(if min <= 1 {
            Error::invalid(format!("{label} is required"))
        } else {
            Error::invalid(format!("{label} must be at least {min} characters"))
        });
    }
    if len > max {
        return Err(Error::invalid(format!("{label} must be at most {max} characters")));
    }
    Ok(value.to_string())
}

/// Optional text; blank becomes `None`.
pub fn optional_text(label: &str, value: Option<String>, max: usize) -> Result<Option<String>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => text(label, v, 1, max).map(Some),
    }
}

pub fn org_name(value: &str) -> Result<String> {
    text("organization name", value, MIN_ORG_NAME_LEN, MAX_ORG_NAME_LEN)
}

/// Lowercase letters and digits in dash-separated groups, e.g. `acme-west-2`.
pub fn slug(value: &str) -> Result<String> {
    let slug = text("slug", value, MIN_SLUG_LEN, MAX_SLUG_LEN)?;
    let well_formed = slug
        .split('-')
        .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    if !well_formed {
        return Err(Error::invalid(
            "slug may only contain lowercase letters, digits and single dashes between them",
        ));
    }
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return Err(Error::invalid(format!("slug {slug:?} is reserved")));
    }
    Ok(slug)
}

pub fn duration_minutes(value: u32) -> Result<u32> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&value) {
        return Err(Error::invalid(format!(
            "duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(value)
}

/// Non-negative decimal with at most two fraction digits. Blank means no price.
pub fn price(value: Option<String>) -> Result<Option<String>> {
    let Some(raw) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let valid = !whole.is_empty()
        && whole.len() <= 12
        && digits(whole)
        && digits(fraction)
        && fraction.len() <= MAX_PRICE_FRACTION_DIGITS
        && !(raw.ends_with('.'));
    if !valid {
        return Err(Error::invalid(format!(
            "price must be a non-negative amount with at most {MAX_PRICE_FRACTION_DIGITS} decimals"
        )));
    }
    Ok(Some(raw.to_string()))
}

/// Lowercased address with a local part and a dotted domain.
pub fn email(value: Option<String>) -> Result<Option<String>> {
    let Some(raw) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let invalid = || Error::invalid(format!("invalid email address: {raw}"));
    if raw.len() > 254 || raw.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = raw.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(Some(raw.to_ascii_lowercase()))
}

pub fn phone(value: Option<String>) -> Result<Option<String>> {
    optional_text("phone", value, MAX_PHONE_LEN)
}

/// `HH:MM` or `HH:MM:SS`.
pub fn time_of_day(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| Error::invalid(format!("invalid time {value:?}, expected HH:MM")))
}

/// Combine a `YYYY-MM-DD` date and a time of day into a UTC instant.
pub fn start_instant(date: &str, time: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| Error::invalid(format!("invalid date {date:?}, expected YYYY-MM-DD")))?;
    let time = time_of_day(time)?;
    Ok(date.and_time(time).and_utc())
}

/// Weekly slots: day 0..=6, `HH:MM` bounds with start before end.
pub fn schedule(slots: Vec<WeeklySlot>) -> Result<Vec<WeeklySlot>> {
    if slots.len() > MAX_SCHEDULE_SLOTS {
        return Err(Error::invalid(format!("at most {MAX_SCHEDULE_SLOTS} schedule slots")));
    }
    slots
        .into_iter()
        .map(|slot| {
            if slot.day_of_week > 6 {
                return Err(Error::invalid("day of week must be between 0 (Sunday) and 6"));
            }
            let start = time_of_day(&slot.start_time)?;
            let end = time_of_day(&slot.end_time)?;
            if start >= end {
                return Err(Error::invalid(format!(
                    "schedule slot {}-{} must start before it ends",
                    slot.start_time, slot.end_time
                )));
            }
            Ok(WeeklySlot {
                start_time: start.format("%H:%M").to_string(),
                end_time: end.format("%H:%M").to_string(),
                ..slot
            })
        })
        .collect()
}

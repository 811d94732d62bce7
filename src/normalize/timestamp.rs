//! Timestamp parsing across the date formats found in the exports.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn date_prefix_regex() -> &'static Regex {
    static DATE_PREFIX: OnceLock<Regex> = OnceLock::new();
    DATE_PREFIX.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("Invalid date prefix regex"))
}

/// Parse a timestamp, trying each known format in order.
///
/// Formats, first match wins:
/// 1. ISO-8601 with a zone marker (`2020-01-15T10:00:00Z`, `...+08:00`)
/// 2. `2020-01-15 10:00:00` (a `T` separator is accepted too), read as UTC
/// 3. `2020-01-15`, midnight UTC
/// 4. `2020/01/15`, midnight UTC
///
/// Text with letters that does not start with a `YYYY-MM-DD` date is
/// rejected before any format is attempted.
pub fn to_timestamp(cell: Option<&str>) -> Option<DateTime<Utc>> {
    let trimmed = cell?.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().any(char::is_alphabetic) && !date_prefix_regex().is_match(trimmed) {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

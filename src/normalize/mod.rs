//! Field normalization for raw export cells.
//!
//! Every function in this module is total: a malformed cell produces an
//! absent value (`None`) or an empty list, never an error. Callers decide
//! what an absent value means for the record being loaded.
//!
//! # Supported Conversions
//!
//! - **Integers** (`to_integer`): plain or fractional numerals, rounded half
//!   away from zero
//! - **Reals** (`to_real`): finite floating point numerals
//! - **Text** (`to_text`): trimmed, unquoted, entity-decoded, length capped
//! - **Timestamps** (`to_timestamp`): ISO-8601, `YYYY-MM-DD HH:MM:SS`,
//!   `YYYY-MM-DD`, `YYYY/MM/DD`
//! - **Lists** (`to_list`, `to_id_list`): R vectors, JSON-like arrays,
//!   triple-quoted and comma-joined lists

mod list;
mod timestamp;

pub use list::{MAX_LIST_ITEM_LEN, to_id_list, to_list, to_list_with_cap};
pub use timestamp::to_timestamp;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// A single normalized cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Absent,
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<String>),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }
}

/// How a raw cell should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text { max_len: usize },
    Timestamp,
    List,
}

/// Normalize a cell according to its field kind.
///
/// Scalar kinds yield `Value::Absent` when the cell cannot be interpreted.
/// `FieldKind::List` always yields `Value::List`, possibly empty.
pub fn normalize(cell: Option<&str>, kind: FieldKind) -> Value {
    match kind {
        FieldKind::Integer => to_integer(cell).map_or(Value::Absent, Value::Integer),
        FieldKind::Real => to_real(cell).map_or(Value::Absent, Value::Real),
        FieldKind::Text { max_len } => to_text(cell, max_len).map_or(Value::Absent, Value::Text),
        FieldKind::Timestamp => to_timestamp(cell).map_or(Value::Absent, Value::Timestamp),
        FieldKind::List => Value::List(to_list(cell)),
    }
}

/// Parse an integer, accepting fractional numerals by rounding.
pub fn to_integer(cell: Option<&str>) -> Option<i64> {
    let trimmed = cell?.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }

    let value = trimmed.parse::<f64>().ok().filter(|v| v.is_finite())?.round();
    // i64::MAX is not representable as f64; compare against the bounds that are
    if value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

/// Parse a finite floating point value.
pub fn to_real(cell: Option<&str>) -> Option<f64> {
    let trimmed = cell?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Clean a text cell.
///
/// Trims whitespace, treats empty cells and the literal `null` as absent,
/// strips one layer of surrounding double quotes, collapses known HTML
/// entities and truncates to `max_len` characters.
pub fn to_text(cell: Option<&str>, max_len: usize) -> Option<String> {
    let trimmed = cell?.trim();
    if is_null_token(trimmed) {
        return None;
    }

    let unquoted = strip_matched_quotes(trimmed).trim();
    if unquoted.is_empty() {
        return None;
    }

    let decoded = decode_entities(unquoted);
    Some(truncate_chars(&decoded, max_len).to_string())
}

pub(crate) fn is_null_token(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null")
}

/// Remove a single pair of surrounding double quotes.
pub(crate) fn strip_matched_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn entity_regex() -> &'static Regex {
    static ENTITY_REGEX: OnceLock<Regex> = OnceLock::new();
    ENTITY_REGEX.get_or_init(|| {
        Regex::new(r"&(amp|quot|lt|gt|rsquo);").expect("Invalid entity regex")
    })
}

/// Collapse the HTML entities that show up in scraped exports.
///
/// Decoding is a single pass, so `&amp;lt;` becomes `&lt;` and not `<`.
pub(crate) fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }

    entity_regex().replace_all(value, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "amp" => "&",
            "quot" => "\"",
            "lt" => "<",
            "gt" => ">",
            _ => "\u{2019}",
        }
    })
}

/// Truncate to at most `max_chars` characters, never splitting a character.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &value[..byte_idx],
        None => value,
    }
}

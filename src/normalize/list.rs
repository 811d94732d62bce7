//! List-valued cell parsing.
//!
//! Exports encode lists in several surface forms. Rules are applied in a
//! fixed order and the first matching form wins:
//!
//! 1. empty, `null`, `NA` or `character(0)` → empty list
//! 2. `c("a", "b")` R vector literal
//! 3. `["a", "b"]` JSON-like array
//! 4. `"""a, b"""` triple-quoted comma list
//! 5. `"a"` single quoted scalar
//! 6. `a, b` bare comma-separated text
//! 7. anything else → one item

use super::{decode_entities, is_null_token, to_integer, truncate_chars};

/// Default cap for a single list item, in characters.
pub const MAX_LIST_ITEM_LEN: usize = 255;

const TRIPLE_QUOTE: &str = "\"\"\"";

/// Parse a list cell with the default item cap.
pub fn to_list(cell: Option<&str>) -> Vec<String> {
    to_list_with_cap(cell, MAX_LIST_ITEM_LEN)
}

/// Parse a list cell, truncating items longer than `max_item_len` characters.
///
/// Never returns an absent value: lists have no null state, only empty.
pub fn to_list_with_cap(cell: Option<&str>, max_item_len: usize) -> Vec<String> {
    let Some(raw) = cell else {
        return Vec::new();
    };

    let trimmed = raw.trim();
    if is_empty_list_token(trimmed) {
        return Vec::new();
    }

    let items = if let Some(inner) = unwrap_delimited(trimmed, "c(", ")") {
        split_quoted(inner)
    } else if let Some(inner) = unwrap_delimited(trimmed, "[", "]") {
        split_quoted(inner)
    } else if let Some(inner) = unwrap_triple_quoted(trimmed) {
        inner.split(',').map(str::to_string).collect()
    } else if let Some(inner) = unwrap_quoted_scalar(trimmed) {
        vec![inner.to_string()]
    } else if trimmed.contains(',') {
        split_quoted(trimmed)
    } else {
        vec![trimmed.to_string()]
    };

    items
        .iter()
        .filter_map(|item| clean_item(item, max_item_len))
        .collect()
}

/// Parse a list of integer identifiers.
///
/// Items that are not integers are dropped rather than kept as text. Items
/// that still contain commas (a quoted `"1, 2"` scalar) are split further.
pub fn to_id_list(cell: Option<&str>) -> Vec<i64> {
    to_list(cell)
        .iter()
        .flat_map(|item| item.split(','))
        .filter_map(|part| to_integer(Some(part)))
        .collect()
}

fn is_empty_list_token(value: &str) -> bool {
    is_null_token(value) || value == "NA" || value == "character(0)"
}

fn unwrap_delimited<'a>(value: &'a str, open: &str, close: &str) -> Option<&'a str> {
    if value.len() >= open.len() + close.len() && value.starts_with(open) && value.ends_with(close)
    {
        Some(&value[open.len()..value.len() - close.len()])
    } else {
        None
    }
}

fn unwrap_triple_quoted(value: &str) -> Option<&str> {
    unwrap_delimited(value, TRIPLE_QUOTE, TRIPLE_QUOTE)
}

/// A value wrapped in one pair of double quotes with no quotes inside.
fn unwrap_quoted_scalar(value: &str) -> Option<&str> {
    let inner = unwrap_delimited(value, "\"", "\"")?;
    if inner.contains('"') { None } else { Some(inner) }
}

/// Split on commas that are not inside a quoted item.
///
/// A `"` or `'` opens a quoted section only at the start of an item, so
/// apostrophes inside words stay literal. A backslash escapes the next
/// character.
fn split_quoted(content: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = content.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            _ if Some(c) == quote => quote = None,
            '"' | '\'' if quote.is_none() && current.trim().is_empty() => {
                current.clear();
                quote = Some(c);
            }
            ',' if quote.is_none() => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
}

fn clean_item(item: &str, max_item_len: usize) -> Option<String> {
    let trimmed = item.trim();
    if trimmed.is_empty() {
        return None;
    }
    let decoded = decode_entities(trimmed);
    Some(truncate_chars(&decoded, max_item_len).to_string())
}

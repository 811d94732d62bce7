//! Row shaping and derived sub-record extraction.
//!
//! The tokenizer hands us rows of varying width. Shaping fixes the width so
//! column indices are always valid; extraction turns list-valued cells into
//! child rows (keywords, ingredients, instruction steps, relation edges).

use crate::normalize::{Value, to_id_list, to_integer, to_list_with_cap};

/// A row as produced by the delimited-text reader.
pub type RawRow = Vec<Option<String>>;

/// A row padded or truncated to exactly the expected column count.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedRow(Vec<Option<String>>);

impl ShapedRow {
    /// Cell at `index`, or `None` when the cell is null or out of range.
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|cell| cell.as_deref())
    }

    pub fn cells(&self) -> &[Option<String>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pad with nulls on the right or truncate from the right.
pub fn shape(raw: RawRow, expected_columns: usize) -> ShapedRow {
    let mut cells = raw;
    cells.resize(expected_columns, None);
    ShapedRow(cells)
}

/// The integer identity held in the first column.
///
/// This is the only field every record kind requires; a row without it is
/// skipped before any statement is bound.
pub fn primary_key(row: &ShapedRow) -> Option<i64> {
    to_integer(row.cell(0))
}

/// How a list-valued column expands into child rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// `(parent_id, text)` per item; order is not recorded.
    Items,
    /// `(parent_id, step_order, text)` with 1-based step order.
    Steps,
    /// `(parent_id, other_id)` per integer identifier.
    Ids { exclude_self: bool },
}

/// Where a child relation comes from within a shaped row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRole {
    pub table: &'static str,
    pub column: usize,
    pub kind: ChildKind,
    pub max_item_len: usize,
}

/// Rows extracted for one child table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRows {
    pub table: &'static str,
    pub rows: Vec<Vec<Value>>,
}

/// A parent identity and the child rows derived from its row.
#[derive(Debug, Clone, PartialEq)]
pub struct SubRecords {
    pub id: i64,
    /// One entry per role, in role order, possibly with no rows.
    pub children: Vec<ChildRows>,
}

/// Extract child rows for every role.
///
/// Returns `None` when the row has no usable primary key.
pub fn extract_sublists(row: &ShapedRow, roles: &[ChildRole]) -> Option<SubRecords> {
    let id = primary_key(row)?;

    let children = roles
        .iter()
        .map(|role| ChildRows {
            table: role.table,
            rows: extract_role(row, id, role),
        })
        .collect();

    Some(SubRecords { id, children })
}

fn extract_role(row: &ShapedRow, id: i64, role: &ChildRole) -> Vec<Vec<Value>> {
    let cell = row.cell(role.column);

    match role.kind {
        ChildKind::Items => to_list_with_cap(cell, role.max_item_len)
            .into_iter()
            .map(|item| vec![Value::Integer(id), Value::Text(item)])
            .collect(),
        ChildKind::Steps => to_list_with_cap(cell, role.max_item_len)
            .into_iter()
            .zip(1i64..)
            .map(|(item, step)| vec![Value::Integer(id), Value::Integer(step), Value::Text(item)])
            .collect(),
        ChildKind::Ids { exclude_self } => to_id_list(cell)
            .into_iter()
            .filter(|other| !(exclude_self && *other == id))
            .map(|other| vec![Value::Integer(id), Value::Integer(other)])
            .collect(),
    }
}

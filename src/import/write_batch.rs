//! Columnar pending batch for one flush.
//!
//! Rows are bound into one typed buffer per column so that a flush sends a
//! handful of arrays per table instead of one statement per row. Each
//! logical input row remembers where its primary and child rows start, so
//! a rejected flush can be replayed one logical row at a time.

use crate::error::BindError;
use crate::import::plan::{ColumnSpec, ColumnType, LoadPlan, RecordRows};
use crate::normalize::Value;
use chrono::{DateTime, Utc};
use std::ops::Range;

/// Values of one column across the pending rows of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnBuffer {
    Integer(Vec<Option<i32>>),
    Real(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
}

impl ColumnBuffer {
    fn empty(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => ColumnBuffer::Integer(Vec::new()),
            ColumnType::Real => ColumnBuffer::Real(Vec::new()),
            ColumnType::Text => ColumnBuffer::Text(Vec::new()),
            ColumnType::Timestamp => ColumnBuffer::Timestamp(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuffer::Integer(values) => values.len(),
            ColumnBuffer::Real(values) => values.len(),
            ColumnBuffer::Text(values) => values.len(),
            ColumnBuffer::Timestamp(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text rendering of one cell, `None` for SQL NULL.
    pub fn render(&self, index: usize) -> Option<String> {
        match self {
            ColumnBuffer::Integer(values) => values.get(index).copied().flatten().map(|v| v.to_string()),
            ColumnBuffer::Real(values) => values.get(index).copied().flatten().map(|v| v.to_string()),
            ColumnBuffer::Text(values) => values.get(index).cloned().flatten(),
            ColumnBuffer::Timestamp(values) => values
                .get(index)
                .copied()
                .flatten()
                .map(|v| v.to_rfc3339()),
        }
    }

    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (ColumnBuffer::Integer(values), Cell::Integer(v)) => values.push(v),
            (ColumnBuffer::Real(values), Cell::Real(v)) => values.push(v),
            (ColumnBuffer::Text(values), Cell::Text(v)) => values.push(v),
            (ColumnBuffer::Timestamp(values), Cell::Timestamp(v)) => values.push(v),
            // cells are converted against the same column types the buffers were built from
            _ => unreachable!("cell type does not match column buffer"),
        }
    }

    fn slice(&self, range: Range<usize>) -> Self {
        match self {
            ColumnBuffer::Integer(values) => ColumnBuffer::Integer(values[range].to_vec()),
            ColumnBuffer::Real(values) => ColumnBuffer::Real(values[range].to_vec()),
            ColumnBuffer::Text(values) => ColumnBuffer::Text(values[range].to_vec()),
            ColumnBuffer::Timestamp(values) => ColumnBuffer::Timestamp(values[range].to_vec()),
        }
    }
}

/// A value converted to its column's storage type.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Integer(Option<i32>),
    Real(Option<f64>),
    Text(Option<String>),
    Timestamp(Option<DateTime<Utc>>),
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Absent => "absent",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Timestamp(_) => "timestamp",
        Value::List(_) => "list",
    }
}

fn to_cell(table: &'static str, column: &ColumnSpec, value: Value) -> Result<Cell, BindError> {
    let cell = match (column.column_type, value) {
        (ColumnType::Integer, Value::Absent) => Cell::Integer(None),
        (ColumnType::Real, Value::Absent) => Cell::Real(None),
        (ColumnType::Text, Value::Absent) => Cell::Text(None),
        (ColumnType::Timestamp, Value::Absent) => Cell::Timestamp(None),
        (ColumnType::Integer, Value::Integer(v)) => {
            let narrowed = i32::try_from(v).map_err(|_| BindError::IntegerRange {
                table,
                column: column.name,
                value: v,
            })?;
            Cell::Integer(Some(narrowed))
        }
        (ColumnType::Real, Value::Integer(v)) => Cell::Real(Some(v as f64)),
        (ColumnType::Real, Value::Real(v)) => Cell::Real(Some(v)),
        (ColumnType::Text, Value::Text(v)) => Cell::Text(Some(v)),
        (ColumnType::Timestamp, Value::Timestamp(v)) => Cell::Timestamp(Some(v)),
        (expected, other) => {
            return Err(BindError::TypeMismatch {
                table,
                column: column.name,
                expected,
                found: value_kind(&other),
            });
        }
    };
    Ok(cell)
}

/// Pending rows for one target table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBatch {
    name: &'static str,
    specs: Vec<ColumnSpec>,
    columns: Vec<ColumnBuffer>,
    rows: usize,
}

impl TableBatch {
    fn new(name: &'static str, specs: &[ColumnSpec]) -> Self {
        Self {
            name,
            specs: specs.to_vec(),
            columns: specs.iter().map(|spec| ColumnBuffer::empty(spec.column_type)).collect(),
            rows: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn columns(&self) -> &[ColumnBuffer] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// All cells of one row rendered as text.
    pub fn row_values(&self, row: usize) -> Vec<Option<String>> {
        self.columns.iter().map(|column| column.render(row)).collect()
    }

    fn push(&mut self, cells: Vec<Cell>) {
        for (column, cell) in self.columns.iter_mut().zip(cells) {
            column.push(cell);
        }
        self.rows += 1;
    }

    fn slice(&self, range: Range<usize>) -> Self {
        Self {
            name: self.name,
            specs: self.specs.clone(),
            columns: self.columns.iter().map(|column| column.slice(range.clone())).collect(),
            rows: range.len(),
        }
    }
}

/// Rows accumulated between two flushes.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    tables: Vec<TableBatch>,
    /// Per logical row, the start offset in each table.
    row_starts: Vec<Vec<usize>>,
    ids: Vec<i64>,
}

impl WriteBatch {
    pub fn new(plan: &LoadPlan) -> Self {
        Self {
            tables: plan
                .tables()
                .map(|table| TableBatch::new(table.name, &table.columns))
                .collect(),
            row_starts: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Number of logical input rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Primary keys of the pending rows, in enqueue order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn tables(&self) -> &[TableBatch] {
        &self.tables
    }

    /// Bind one logical row into the column buffers.
    ///
    /// Either every table row of the record is appended or none is.
    pub fn push_row(&mut self, record: RecordRows) -> Result<(), BindError> {
        if record.tables.len() != self.tables.len() {
            return Err(BindError::TableCount {
                expected: self.tables.len(),
                found: record.tables.len(),
            });
        }

        let mut converted = Vec::with_capacity(self.tables.len());
        for (table, rows) in self.tables.iter().zip(record.tables) {
            let mut table_rows = Vec::with_capacity(rows.len());
            for values in rows {
                if values.len() != table.specs.len() {
                    return Err(BindError::Arity {
                        table: table.name,
                        expected: table.specs.len(),
                        found: values.len(),
                    });
                }
                let cells = table
                    .specs
                    .iter()
                    .zip(values)
                    .map(|(spec, value)| to_cell(table.name, spec, value))
                    .collect::<Result<Vec<_>, _>>()?;
                table_rows.push(cells);
            }
            converted.push(table_rows);
        }

        self.row_starts
            .push(self.tables.iter().map(TableBatch::len).collect());
        self.ids.push(record.id);
        for (table, rows) in self.tables.iter_mut().zip(converted) {
            for cells in rows {
                table.push(cells);
            }
        }

        Ok(())
    }

    /// A batch holding only the logical row at `index`.
    pub fn row(&self, index: usize) -> WriteBatch {
        let starts = &self.row_starts[index];
        let tables = self
            .tables
            .iter()
            .enumerate()
            .map(|(t, table)| {
                let end = self
                    .row_starts
                    .get(index + 1)
                    .map_or(table.len(), |next| next[t]);
                table.slice(starts[t]..end)
            })
            .collect();

        WriteBatch {
            tables,
            row_starts: vec![vec![0; self.tables.len()]],
            ids: vec![self.ids[index]],
        }
    }

    /// Move the pending rows out, leaving an empty batch with the same tables.
    pub fn take(&mut self) -> WriteBatch {
        let emptied = WriteBatch {
            tables: self
                .tables
                .iter()
                .map(|table| TableBatch::new(table.name, &table.specs))
                .collect(),
            row_starts: Vec::new(),
            ids: Vec::new(),
        };
        std::mem::replace(self, emptied)
    }
}

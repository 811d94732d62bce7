//! Per-partition load counters.
//!
//! Every row of a partition ends in exactly one of three buckets: committed,
//! skipped for a parse or bind problem, or skipped because the partition's
//! connection failed before the row could be committed.

use crate::config::ConflictPolicy;
use crate::import::write_batch::WriteBatch;
use serde::Serialize;
use std::collections::BTreeMap;

/// Insert outcome for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    /// Rows the store reported as inserted
    pub accepted: usize,
    /// Rows skipped as conflicts or dangling references (report policy only)
    pub ignored: usize,
}

impl TableCounts {
    pub fn merge(&mut self, other: TableCounts) {
        self.accepted += other.accepted;
        self.ignored += other.ignored;
    }
}

/// Row-level outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    /// Input rows handed to the loader
    pub total: usize,
    /// Rows whose statements were committed, including conflict no-ops
    pub committed: usize,
    /// Rows skipped for a missing key, a bind error or a rejected write
    pub skipped_parse: usize,
    /// Rows never committed because the partition lost its connection
    pub skipped_connection: usize,
}

impl RowCounts {
    /// Merge another RowCounts into this one by summing all counts.
    pub fn merge(&mut self, other: RowCounts) {
        self.total += other.total;
        self.committed += other.committed;
        self.skipped_parse += other.skipped_parse;
        self.skipped_connection += other.skipped_connection;
    }

    /// Rows whose outcome is decided.
    pub fn settled(&self) -> usize {
        self.committed + self.skipped_parse + self.skipped_connection
    }
}

/// Counters returned by one partition's loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStats {
    pub partition: usize,
    pub rows: RowCounts,
    pub tables: BTreeMap<&'static str, TableCounts>,
    pub connection_failed: bool,
}

impl PartitionStats {
    pub fn new(partition: usize, total: usize, tables: &[&'static str]) -> Self {
        Self {
            partition,
            rows: RowCounts {
                total,
                ..RowCounts::default()
            },
            tables: tables.iter().map(|name| (*name, TableCounts::default())).collect(),
            connection_failed: false,
        }
    }

    /// A partition that never produced results, e.g. because its task panicked.
    pub fn aborted(partition: usize, total: usize, tables: &[&'static str]) -> Self {
        let mut stats = Self::new(partition, total, tables);
        stats.abort_remaining();
        stats
    }

    /// Account for a committed batch.
    ///
    /// `affected` holds the inserted row count per table, in batch order.
    pub fn record_commit(&mut self, batch: &WriteBatch, affected: &[usize], policy: ConflictPolicy) {
        self.rows.committed += batch.len();

        for (table, inserted) in batch.tables().iter().zip(affected) {
            let counts = self.tables.entry(table.name()).or_default();
            let inserted = (*inserted).min(table.len());
            counts.accepted += inserted;
            if policy == ConflictPolicy::Report {
                counts.ignored += table.len() - inserted;
            }
        }
    }

    pub fn record_parse_skip(&mut self) {
        self.rows.skipped_parse += 1;
    }

    /// Mark every row not yet committed or skipped as lost to the connection.
    pub fn abort_remaining(&mut self) {
        let decided = self.rows.committed + self.rows.skipped_parse;
        self.rows.skipped_connection = self.rows.total.saturating_sub(decided);
        self.connection_failed = true;
    }
}

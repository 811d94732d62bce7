//! Run reports.
//!
//! An [`ImportReport`] is assembled once from the partition counters of one
//! plan and never changes afterwards. A [`RunSummary`] groups the reports of
//! a dataset run together with reader statistics.

use crate::import::plan::LoadPlan;
use crate::import::stats::{PartitionStats, RowCounts, TableCounts};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Aggregate outcome of loading one record kind.
///
/// Row counters (`committed`, `skipped_parse`, `skipped_connection`) count
/// logical input rows of the plan, so every table of a plan shares them.
/// `accepted` and `ignored` are kept per table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    plan: String,
    partitions: usize,
    failed_partitions: Vec<usize>,
    rows: RowCounts,
    tables: BTreeMap<String, TableCounts>,
    elapsed_ms: u64,
}

impl ImportReport {
    /// Sum partition counters into a report.
    pub fn assemble(plan: &LoadPlan, partitions: Vec<PartitionStats>, elapsed: Duration) -> Self {
        let mut rows = RowCounts::default();
        let mut tables: BTreeMap<String, TableCounts> = plan
            .tables()
            .map(|table| (table.name.to_string(), TableCounts::default()))
            .collect();
        let mut failed_partitions = Vec::new();
        let partition_count = partitions.len();

        for stats in partitions {
            rows.merge(stats.rows);
            for (name, counts) in stats.tables {
                tables.entry(name.to_string()).or_default().merge(counts);
            }
            if stats.connection_failed {
                failed_partitions.push(stats.partition);
            }
        }
        failed_partitions.sort_unstable();

        Self {
            plan: plan.name.to_string(),
            partitions: partition_count,
            failed_partitions,
            rows,
            tables,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Indices of partitions aborted by a connection failure.
    pub fn failed_partitions(&self) -> &[usize] {
        &self.failed_partitions
    }

    pub fn rows(&self) -> &RowCounts {
        &self.rows
    }

    pub fn tables(&self) -> &BTreeMap<String, TableCounts> {
        &self.tables
    }

    /// Rows inserted into `table`, 0 for tables outside this plan.
    pub fn accepted(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |counts| counts.accepted)
    }

    pub fn ignored(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |counts| counts.ignored)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Success unless a partition was aborted. Skipped rows do not count
    /// against a run.
    pub fn is_success(&self) -> bool {
        self.failed_partitions.is_empty()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} rows in {} partitions ({:.1}s)",
            self.plan,
            self.rows.total,
            self.partitions,
            self.elapsed().as_secs_f64()
        )?;
        writeln!(
            f,
            "  committed: {}  skipped (parse): {}  skipped (connection): {}",
            self.rows.committed, self.rows.skipped_parse, self.rows.skipped_connection
        )?;
        if !self.failed_partitions.is_empty() {
            writeln!(f, "  failed partitions: {:?}", self.failed_partitions)?;
        }
        writeln!(f, "  {:<24} {:>10} {:>10}", "table", "accepted", "ignored")?;
        for (name, counts) in &self.tables {
            writeln!(f, "  {:<24} {:>10} {:>10}", name, counts.accepted, counts.ignored)?;
        }
        Ok(())
    }
}

/// Reader statistics for one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub path: String,
    pub records: usize,
    pub malformed: usize,
}

/// Everything a dataset run produced, in load order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub inputs: Vec<InputSummary>,
    pub reports: Vec<ImportReport>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(ImportReport::is_success)
    }

    pub fn report(&self, plan: &str) -> Option<&ImportReport> {
        self.reports.iter().find(|report| report.plan == plan)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            writeln!(
                f,
                "read {}: {} records, {} malformed lines skipped",
                input.path, input.records, input.malformed
            )?;
        }
        for report in &self.reports {
            write!(f, "{}", report)?;
        }
        let outcome = if self.is_success() {
            "completed"
        } else {
            "completed with aborted partitions"
        };
        writeln!(f, "import {}", outcome)
    }
}

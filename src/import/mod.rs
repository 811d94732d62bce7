//! Partitioned bulk import.
//!
//! - [`plan`]: per record kind table layout and column roles
//! - [`partition`]: contiguous splitting of shaped rows
//! - [`write_batch`]: columnar pending rows for one flush
//! - [`batch_loader`]: one partition on one connection
//! - [`coordinator`]: worker pool and dataset sequencing
//! - [`stats`] / [`report`]: counters and the final report

pub mod batch_loader;
pub mod coordinator;
pub mod partition;
pub mod plan;
pub mod report;
pub mod stats;
pub mod write_batch;

pub use batch_loader::BatchLoader;
pub use coordinator::{DatasetPaths, ImportCoordinator};
pub use partition::{Partition, partition};
pub use plan::{LoadPlan, recipes_plan, reviews_plan, user_relations_plan, users_plan};
pub use report::{ImportReport, RunSummary};
pub use stats::{PartitionStats, RowCounts, TableCounts};
pub use write_batch::WriteBatch;

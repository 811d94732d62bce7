//! Partition loader.
//!
//! A [`BatchLoader`] processes one partition on one store session:
//!
//! 1. Open the session; failure aborts the partition with every row counted
//!    as a connection skip
//! 2. For each row in order, extract the key, normalize and bind into the
//!    pending batch; rows that cannot be bound are parse skips
//! 3. Flush every `batch_size` rows in one transaction
//! 4. When a flush is rejected, roll back and replay the pending rows one
//!    logical row per transaction so only the offending rows are lost
//! 5. When the connection fails, stop and count every undecided row as a
//!    connection skip
//!
//! Rows committed before a failure stay committed.

use crate::config::ConflictPolicy;
use crate::import::partition::Partition;
use crate::import::plan::LoadPlan;
use crate::import::stats::PartitionStats;
use crate::import::write_batch::WriteBatch;
use crate::shaper::ShapedRow;
use crate::store::{RecordStore, StoreError, StoreSession};
use std::sync::Arc;

/// Loads partitions of one plan through a store.
pub struct BatchLoader<S: RecordStore> {
    store: Arc<S>,
    plan: Arc<LoadPlan>,
    batch_size: usize,
    conflicts: ConflictPolicy,
}

impl<S: RecordStore> Clone for BatchLoader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            plan: Arc::clone(&self.plan),
            batch_size: self.batch_size,
            conflicts: self.conflicts,
        }
    }
}

impl<S: RecordStore> BatchLoader<S> {
    pub fn new(store: Arc<S>, plan: Arc<LoadPlan>, batch_size: usize, conflicts: ConflictPolicy) -> Self {
        Self {
            store,
            plan,
            batch_size: batch_size.max(1),
            conflicts,
        }
    }

    /// Load one partition and return its counters.
    ///
    /// Never fails: every problem is contained in the returned counters.
    pub async fn run(&self, partition: Partition<ShapedRow>) -> PartitionStats {
        let tables = self.plan.table_names();
        let mut stats = PartitionStats::new(partition.index, partition.len(), &tables);

        log::debug!(
            "{} partition {}: loading {} rows starting at row {}",
            self.plan.name,
            partition.index,
            partition.len(),
            partition.first_row
        );

        let mut session = match self.store.open(partition.index, &self.plan).await {
            Ok(session) => session,
            Err(err) => {
                stats.abort_remaining();
                log::error!(
                    "{} partition {}: cannot open connection, {} rows skipped: {}",
                    self.plan.name,
                    partition.index,
                    stats.rows.skipped_connection,
                    err
                );
                return stats;
            }
        };

        let mut pending = WriteBatch::new(&self.plan);

        for (offset, row) in partition.rows.iter().enumerate() {
            if !self.enqueue(row, &mut pending, partition.first_row + offset) {
                stats.record_parse_skip();
                continue;
            }

            if pending.len() < self.batch_size {
                continue;
            }
            if let Err(err) = self.flush(&mut session, &mut pending, &mut stats).await {
                self.abort(&mut stats, &err);
                session.close().await;
                return stats;
            }
        }

        if let Err(err) = self.flush(&mut session, &mut pending, &mut stats).await {
            self.abort(&mut stats, &err);
            session.close().await;
            return stats;
        }

        session.close().await;

        log::debug!(
            "{} partition {}: committed {}, skipped {}",
            self.plan.name,
            partition.index,
            stats.rows.committed,
            stats.rows.skipped_parse
        );
        stats
    }

    /// Bind one row into the pending batch. Returns false when the row is skipped.
    fn enqueue(&self, row: &ShapedRow, pending: &mut WriteBatch, position: usize) -> bool {
        let Some(records) = self.plan.build_records(row) else {
            log::debug!("{} row {}: missing primary key, skipped", self.plan.name, position);
            return false;
        };

        let id = records.id;
        match pending.push_row(records) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("{} row {} (id {}): {}, skipped", self.plan.name, position, id, err);
                false
            }
        }
    }

    /// Write the pending batch, replaying row by row if the store rejects it.
    ///
    /// Only a connection failure is returned; rejected rows are counted.
    async fn flush(
        &self,
        session: &mut S::Session,
        pending: &mut WriteBatch,
        stats: &mut PartitionStats,
    ) -> Result<(), StoreError> {
        if pending.is_empty() {
            return Ok(());
        }

        let batch = pending.take();
        match session.write(&batch).await {
            Ok(affected) => {
                log::trace!("{} partition {}: flushed {} rows", self.plan.name, stats.partition, batch.len());
                self.record(stats, &batch, &affected);
                Ok(())
            }
            Err(StoreError::Rejected(reason)) => {
                log::warn!(
                    "{} partition {}: batch of {} rows rejected ({}), retrying row by row",
                    self.plan.name,
                    stats.partition,
                    batch.len(),
                    reason
                );
                self.replay(session, &batch, stats).await
            }
            Err(err) => Err(err),
        }
    }

    async fn replay(
        &self,
        session: &mut S::Session,
        batch: &WriteBatch,
        stats: &mut PartitionStats,
    ) -> Result<(), StoreError> {
        for index in 0..batch.len() {
            let single = batch.row(index);
            match session.write(&single).await {
                Ok(affected) => self.record(stats, &single, &affected),
                Err(StoreError::Rejected(reason)) => {
                    log::warn!(
                        "{} partition {}: row with id {} rejected: {}",
                        self.plan.name,
                        stats.partition,
                        batch.ids()[index],
                        reason
                    );
                    stats.record_parse_skip();
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn record(&self, stats: &mut PartitionStats, batch: &WriteBatch, affected: &[usize]) {
        stats.record_commit(batch, affected, self.conflicts);

        if self.conflicts == ConflictPolicy::Report {
            for (table, inserted) in batch.tables().iter().zip(affected) {
                if *inserted < table.len() {
                    log::info!(
                        "{} partition {}: {} of {} {} rows ignored as conflicts or dangling references",
                        self.plan.name,
                        stats.partition,
                        table.len() - inserted,
                        table.len(),
                        table.name()
                    );
                }
            }
        }
    }

    fn abort(&self, stats: &mut PartitionStats, err: &StoreError) {
        stats.abort_remaining();
        log::error!(
            "{} partition {}: connection lost after {} committed rows, {} rows skipped: {}",
            self.plan.name,
            stats.partition,
            stats.rows.committed,
            stats.rows.skipped_connection,
            err
        );
    }
}

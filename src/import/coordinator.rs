//! Import coordination.
//!
//! The [`ImportCoordinator`] runs one plan end to end:
//! 1. Shape every raw row to the plan's width (rayon, on the blocking pool)
//! 2. Partition the shaped rows into contiguous batches
//! 3. Spawn one loader task per partition, at most `workers` running at once
//! 4. Wait for every task and assemble the [`ImportReport`]
//!
//! A partition that fails, or whose task panics, is recorded in the report
//! without stopping its siblings.
//!
//! [`ImportCoordinator::run_dataset`] sequences the record kinds so that
//! foreign keys resolve: users, user relations, recipes, then reviews.

use crate::config::LoadSettings;
use crate::error::LoaderError;
use crate::import::batch_loader::BatchLoader;
use crate::import::partition::partition;
use crate::import::plan::{LoadPlan, recipes_plan, reviews_plan, user_relations_plan, users_plan};
use crate::import::report::{ImportReport, InputSummary, RunSummary};
use crate::import::stats::PartitionStats;
use crate::shaper::{RawRow, ShapedRow, shape};
use crate::source::{SourceOptions, read_rows};
use crate::store::RecordStore;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;

/// Input files for a dataset run. Missing entries are skipped.
#[derive(Debug, Clone, Default)]
pub struct DatasetPaths {
    pub users: Option<PathBuf>,
    pub recipes: Option<PathBuf>,
    pub reviews: Option<PathBuf>,
}

/// Runs plans against a store with a bounded number of concurrent partitions.
pub struct ImportCoordinator<S: RecordStore> {
    store: Arc<S>,
    settings: LoadSettings,
}

impl<S: RecordStore> ImportCoordinator<S> {
    pub fn new(store: Arc<S>, settings: LoadSettings) -> Self {
        Self { store, settings }
    }

    /// Load `rows` with `plan` and report the aggregate outcome.
    ///
    /// Waits for every partition before returning.
    pub async fn run(&self, plan: Arc<LoadPlan>, rows: Vec<RawRow>) -> ImportReport {
        let started = Instant::now();
        let expected_columns = plan.expected_columns;

        let row_count = rows.len();

        let shaped = tokio::task::spawn_blocking(move || {
            rows.into_par_iter()
                .map(|row| shape(row, expected_columns))
                .collect::<Vec<ShapedRow>>()
        })
        .await;
        let shaped = match shaped {
            Ok(shaped) => shaped,
            Err(err) => {
                log::error!("{}: shaping failed: {}", plan.name, err);
                let aborted = PartitionStats::aborted(0, row_count, &plan.table_names());
                return ImportReport::assemble(&plan, vec![aborted], started.elapsed());
            }
        };

        let partitions = partition(shaped, self.settings.batch_size);
        let total = partitions.len();
        let workers = self.settings.workers.max(1);

        log::info!(
            "{}: loading {} partitions with {} workers (batch size {})",
            plan.name,
            total,
            workers,
            self.settings.batch_size
        );

        let loader = BatchLoader::new(
            Arc::clone(&self.store),
            Arc::clone(&plan),
            self.settings.batch_size,
            self.settings.conflicts,
        );
        let permits = Arc::new(Semaphore::new(workers));
        let completed = Arc::new(AtomicUsize::new(0));
        let progress_step = (total / 10).max(1);
        let table_names = plan.table_names();

        let mut handles = Vec::with_capacity(total);
        for part in partitions {
            let index = part.index;
            let len = part.len();
            let loader = loader.clone();
            let permits = Arc::clone(&permits);
            let completed = Arc::clone(&completed);
            let plan_name = plan.name;

            let handle = tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    log::error!("{} partition {}: worker pool closed", plan_name, index);
                    return None;
                };

                let stats = loader.run(part).await;

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % progress_step == 0 || done == total {
                    log::info!("{}: {}/{} partitions complete", plan_name, done, total);
                }
                Some(stats)
            });
            handles.push((index, len, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (index, len, handle) in handles {
            match handle.await {
                Ok(Some(stats)) => results.push(stats),
                Ok(None) => results.push(PartitionStats::aborted(index, len, &table_names)),
                Err(err) => {
                    log::error!("{} partition {}: task failed: {}", plan.name, index, err);
                    results.push(PartitionStats::aborted(index, len, &table_names));
                }
            }
        }

        let report = ImportReport::assemble(&plan, results, started.elapsed());
        log::info!(
            "{}: committed {} of {} rows ({} parse skips, {} connection skips) in {:.1}s",
            plan.name,
            report.rows().committed,
            report.rows().total,
            report.rows().skipped_parse,
            report.rows().skipped_connection,
            report.elapsed().as_secs_f64()
        );
        report
    }

    /// Read the given exports and load them in foreign-key order.
    ///
    /// Every input is read before the first plan runs, so an unreadable file
    /// fails the run before anything is written. Row and partition failures
    /// are reported in the summary.
    pub async fn run_dataset(&self, paths: &DatasetPaths, options: SourceOptions) -> Result<RunSummary, LoaderError> {
        let mut summary = RunSummary::default();

        let users = read_optional(paths.users.as_ref(), options, &mut summary).await?;
        let recipes = read_optional(paths.recipes.as_ref(), options, &mut summary).await?;
        let reviews = read_optional(paths.reviews.as_ref(), options, &mut summary).await?;

        if let Some(rows) = users {
            let relations = rows.clone();
            summary.reports.push(self.run(Arc::new(users_plan()), rows).await);
            summary
                .reports
                .push(self.run(Arc::new(user_relations_plan()), relations).await);
        }

        if let Some(rows) = recipes {
            summary.reports.push(self.run(Arc::new(recipes_plan()), rows).await);
        }

        if let Some(rows) = reviews {
            summary.reports.push(self.run(Arc::new(reviews_plan()), rows).await);
        }

        Ok(summary)
    }
}

async fn read_optional(
    path: Option<&PathBuf>,
    options: SourceOptions,
    summary: &mut RunSummary,
) -> Result<Option<Vec<RawRow>>, LoaderError> {
    match path {
        Some(path) => read_input(path.clone(), options, summary).await.map(Some),
        None => Ok(None),
    }
}

/// Parse an input file off the async runtime.
async fn read_input(
    path: PathBuf,
    options: SourceOptions,
    summary: &mut RunSummary,
) -> Result<Vec<RawRow>, LoaderError> {
    let display = path.display().to_string();
    let outcome = tokio::task::spawn_blocking(move || read_rows(&path, options)).await??;

    log::info!(
        "read {}: {} records, {} malformed lines skipped",
        display,
        outcome.rows.len(),
        outcome.malformed
    );
    summary.inputs.push(InputSummary {
        path: display,
        records: outcome.rows.len(),
        malformed: outcome.malformed,
    });

    Ok(outcome.rows)
}

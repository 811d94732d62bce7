use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use sqlx::postgres::PgPoolOptions;

use recipe_loader::config::{ConflictPolicy, LoaderSettings, single_byte};
use recipe_loader::error::LoaderError;
use recipe_loader::import::{DatasetPaths, ImportCoordinator, RunSummary};
use recipe_loader::import::plan::{recipes_plan, reviews_plan, user_relations_plan, users_plan};
use recipe_loader::source::SourceOptions;
use recipe_loader::store::PgStore;
use recipe_loader::store::migration::{reset_database, run_migrations};
use recipe_loader::store::tuning::PgTuning;

#[derive(Parser, Debug)]
#[command(
    name = "recipe-loader",
    about = "Bulk load recipe, review and user exports into Postgres",
    group(ArgGroup::new("inputs").required(true).multiple(true).args(["users", "recipes", "reviews"]))
)]
struct Args {
    /// User export (CSV, optionally gzip compressed).
    #[arg(long)]
    users: Option<PathBuf>,

    /// Recipe export.
    #[arg(long)]
    recipes: Option<PathBuf>,

    /// Review export.
    #[arg(long)]
    reviews: Option<PathBuf>,

    /// Overrides `DATABASE_URL`.
    #[arg(long)]
    database_url: Option<String>,

    /// Rows per partition and per transaction.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Partitions loaded at the same time. `0` uses one per CPU.
    #[arg(long)]
    workers: Option<usize>,

    /// Field delimiter (`\t` for tab).
    #[arg(long)]
    delimiter: Option<String>,

    /// Quote character.
    #[arg(long)]
    quote: Option<String>,

    /// `ignore` or `report` inserts that hit an existing key.
    #[arg(long)]
    conflicts: Option<ConflictPolicy>,

    /// Drop and recreate the schema before loading.
    #[arg(long, conflicts_with = "skip_migrations")]
    reset: bool,

    /// Assume the schema already exists.
    #[arg(long)]
    skip_migrations: bool,

    /// Run VACUUM ANALYZE on every loaded table afterwards.
    #[arg(long)]
    analyze: bool,

    /// Print the summary as JSON instead of text.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn settings(&self) -> Result<LoaderSettings, LoaderError> {
        let mut settings = LoaderSettings::from_env()?;

        if let Some(url) = &self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(batch_size) = self.batch_size {
            settings.load.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            settings.load.workers = if workers == 0 { num_cpus::get() } else { workers };
        }
        if let Some(conflicts) = self.conflicts {
            settings.load.conflicts = conflicts;
        }
        if let Some(delimiter) = &self.delimiter {
            settings.delimiter = single_byte("delimiter", delimiter)?;
        }
        if let Some(quote) = &self.quote {
            settings.quote = single_byte("quote", quote)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn paths(&self) -> DatasetPaths {
        DatasetPaths {
            users: self.users.clone(),
            recipes: self.recipes.clone(),
            reviews: self.reviews.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    recipe_loader::init_logger();

    let args = Args::parse();

    match run(&args).await {
        Ok(summary) => {
            if args.json {
                match summary.to_json() {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        log::error!("failed to serialize summary: {}", err);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("{summary}");
            }

            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                log::warn!("load finished with failed partitions");
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            log::error!("load failed: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<RunSummary, LoaderError> {
    let settings = args.settings()?;
    let database_url = settings.require_database_url()?;

    log::info!(
        "batch size {}, {} workers, conflicts {}",
        settings.load.batch_size,
        settings.load.workers,
        settings.load.conflicts
    );

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await?;

    match PgTuning::check_config(&pool).await {
        Ok(snapshot) => {
            log::info!("server settings: {}", snapshot);
            if !snapshot.fits_workers(settings.load.workers) {
                log::warn!(
                    "max_connections={} is tight for {} workers",
                    snapshot.max_connections,
                    settings.load.workers
                );
            }
        }
        Err(err) => log::warn!("could not read server settings: {}", err),
    }

    if args.reset {
        log::warn!("resetting database schema");
        reset_database(&pool).await?;
    } else if !args.skip_migrations {
        run_migrations(&pool).await?;
        log::info!("database migrations successful");
    }

    let store = Arc::new(PgStore::from_url(database_url, settings.async_commit)?);
    let coordinator = ImportCoordinator::new(store, settings.load);
    let options = SourceOptions {
        delimiter: settings.delimiter,
        quote: settings.quote,
        has_headers: true,
    };

    let summary = coordinator.run_dataset(&args.paths(), options).await?;

    if args.analyze {
        let plans = [users_plan(), user_relations_plan(), recipes_plan(), reviews_plan()];
        let tables: Vec<&str> = plans
            .iter()
            .filter(|plan| summary.report(plan.name).is_some())
            .flat_map(|plan| plan.table_names())
            .collect();

        log::info!("analyzing {} tables", tables.len());
        if let Err(err) = PgTuning::vacuum_analyze_tables(&pool, &tables).await {
            log::warn!("vacuum analyze failed: {}", err);
        }
    }

    pool.close().await;
    Ok(summary)
}

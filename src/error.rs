use crate::import::plan::ColumnType;
use std::path::PathBuf;
use thiserror::Error;

/// A normalized value that cannot be bound to its target column.
///
/// Counted as a parse skip for the row; the rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("{table}.{column}: value {value} is outside the 32-bit integer range")]
    IntegerRange {
        table: &'static str,
        column: &'static str,
        value: i64,
    },
    #[error("{table}.{column}: expected {expected:?}, found {found}")]
    TypeMismatch {
        table: &'static str,
        column: &'static str,
        expected: ColumnType,
        found: &'static str,
    },
    #[error("{table}: expected {expected} values per row, found {found}")]
    Arity {
        table: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("record spans {found} tables, batch has {expected}")]
    TableCount { expected: usize, found: usize },
}

/// Errors raised while reading an input export.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{0} contains no rows")]
    Empty(PathBuf),
}

/// Invalid loader settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("unknown conflict policy '{0}', expected 'ignore' or 'report'")]
    ConflictPolicy(String),
    #[error("{name} must be a single ASCII character, got '{value}'")]
    Delimiter { name: &'static str, value: String },
    #[error("DATABASE_URL is not set and --database-url was not given")]
    MissingDatabaseUrl,
}

/// Errors that stop a run before or outside partition processing.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("input error: {0}")]
    Source(#[from] SourceError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("reader task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

//! Loader settings.
//!
//! Values come from the environment first; command-line flags override
//! them field by field.

use crate::error::ConfigError;
use serde::Serialize;
use std::env;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_WORKERS: usize = 6;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// What to do with inserts that hit an existing key or a missing reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Silent no-op.
    #[default]
    Ignore,
    /// Count ignored inserts per table and log them.
    Report,
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(ConflictPolicy::Ignore),
            "report" => Ok(ConflictPolicy::Report),
            other => Err(ConfigError::ConflictPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Ignore => write!(f, "ignore"),
            ConflictPolicy::Report => write!(f, "report"),
        }
    }
}

/// The knobs of one partitioned load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSettings {
    /// Rows per partition and per flush.
    pub batch_size: usize,
    /// Partitions processed at the same time.
    pub workers: usize,
    pub conflicts: ConflictPolicy,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            conflicts: ConflictPolicy::Ignore,
        }
    }
}

impl LoadSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch size"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero("worker count"));
        }
        Ok(())
    }
}

/// Full runtime configuration for the binary.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub database_url: Option<String>,
    pub load: LoadSettings,
    /// Turn off `synchronous_commit` inside flush transactions.
    pub async_commit: bool,
    pub delimiter: u8,
    pub quote: u8,
}

impl LoaderSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let workers = match env_usize("LOADER_WORKERS", DEFAULT_WORKERS) {
            0 => num_cpus::get(),
            n => n,
        };
        let conflicts = match env::var("LOADER_CONFLICT_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => ConflictPolicy::default(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            load: LoadSettings {
                batch_size: env_usize("LOADER_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                workers,
                conflicts,
            },
            async_commit: env_bool("LOADER_ASYNC_COMMIT", true),
            delimiter: single_byte("LOADER_DELIMITER", &env_string("LOADER_DELIMITER", ","))?,
            quote: single_byte("LOADER_QUOTE", &env_string("LOADER_QUOTE", "\""))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.load.validate()
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or(ConfigError::MissingDatabaseUrl)
    }
}

/// Parse a delimiter or quote setting. `\t` and `tab` name the tab character.
pub fn single_byte(name: &'static str, value: &str) -> Result<u8, ConfigError> {
    if matches!(value, "\\t" | "tab") {
        return Ok(b'\t');
    }
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(ConfigError::Delimiter {
            name,
            value: value.to_string(),
        }),
    }
}

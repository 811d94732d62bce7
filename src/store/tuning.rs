use sqlx::{PgConnection, PgPool};

/// PostgreSQL session tuning for bulk loads
pub struct PgTuning;

impl PgTuning {
    /// Apply per-transaction settings for a flush.
    ///
    /// Must run inside the flush transaction; `SET LOCAL` ends with it.
    pub async fn apply_bulk_load_settings(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        // Commits are acknowledged before the WAL is flushed; a crash may lose
        // the most recent flushes.
        sqlx::query("SET LOCAL synchronous_commit = 'off'")
            .execute(&mut *conn)
            .await?;

        sqlx::query("SET LOCAL work_mem = '64MB'")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Run VACUUM ANALYZE on specific tables
    pub async fn vacuum_analyze_tables(pool: &PgPool, tables: &[&str]) -> Result<(), sqlx::Error> {
        for table in tables {
            log::debug!("running VACUUM ANALYZE on table: {}", table);
            let query = format!("VACUUM ANALYZE {}", table);
            sqlx::query(&query).execute(pool).await?;
        }

        Ok(())
    }

    /// Check current configuration settings
    pub async fn check_config(pool: &PgPool) -> Result<ConfigSnapshot, sqlx::Error> {
        let max_connections: (String,) = sqlx::query_as("SHOW max_connections")
            .fetch_one(pool)
            .await?;

        let synchronous_commit: (String,) = sqlx::query_as("SHOW synchronous_commit")
            .fetch_one(pool)
            .await?;

        let work_mem: (String,) = sqlx::query_as("SHOW work_mem").fetch_one(pool).await?;

        Ok(ConfigSnapshot {
            max_connections: max_connections.0,
            synchronous_commit: synchronous_commit.0,
            work_mem: work_mem.0,
        })
    }
}

/// Snapshot of the server settings that matter for a parallel load
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub max_connections: String,
    pub synchronous_commit: String,
    pub work_mem: String,
}

impl ConfigSnapshot {
    /// Whether `workers` dedicated connections fit under `max_connections`,
    /// leaving one for the coordinator.
    pub fn fits_workers(&self, workers: usize) -> bool {
        self.max_connections
            .trim()
            .parse::<usize>()
            .map(|max| workers < max)
            .unwrap_or(true)
    }
}

impl std::fmt::Display for ConfigSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PostgreSQL Configuration:")?;
        writeln!(f, "  max_connections: {}", self.max_connections)?;
        writeln!(f, "  synchronous_commit: {}", self.synchronous_commit)?;
        writeln!(f, "  work_mem: {}", self.work_mem)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(max_connections: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            max_connections: max_connections.to_string(),
            synchronous_commit: "on".to_string(),
            work_mem: "4MB".to_string(),
        }
    }

    #[test]
    fn test_config_snapshot_display() {
        let display = format!("{}", snapshot("100"));
        assert!(display.contains("max_connections: 100"));
        assert!(display.contains("synchronous_commit: on"));
    }

    #[test]
    fn test_fits_workers() {
        assert!(snapshot("100").fits_workers(6));
        assert!(!snapshot("6").fits_workers(6));
        assert!(snapshot("unknown").fits_workers(500));
    }
}

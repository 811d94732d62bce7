//! PostgreSQL store.
//!
//! Each partition gets its own `PgConnection` rather than a pool handle, so
//! a partition's flushes run strictly in order on one backend and a broken
//! connection only takes that partition down.

use crate::import::plan::LoadPlan;
use crate::import::write_batch::{ColumnBuffer, WriteBatch};
use crate::store::tuning::PgTuning;
use crate::store::{RecordStore, StoreError, StoreSession};
use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::sync::Arc;

/// Opens one dedicated connection per partition.
#[derive(Debug, Clone)]
pub struct PgStore {
    options: PgConnectOptions,
    async_commit: bool,
}

impl PgStore {
    pub fn new(options: PgConnectOptions, async_commit: bool) -> Self {
        Self {
            options: options.log_statements(LevelFilter::Off),
            async_commit,
        }
    }

    pub fn from_url(database_url: &str, async_commit: bool) -> Result<Self, sqlx::Error> {
        let options: PgConnectOptions = database_url.parse()?;
        Ok(Self::new(options, async_commit))
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }
}

impl RecordStore for PgStore {
    type Session = PgSession;

    async fn open(&self, partition: usize, plan: &Arc<LoadPlan>) -> Result<PgSession, StoreError> {
        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;

        // Preparing up front surfaces a missing table before any row is bound.
        for table in plan.tables() {
            conn.prepare(table.insert_sql.as_str())
                .await
                .map_err(|err| StoreError::Connection(format!("prepare {}: {}", table.name, err)))?;
        }

        log::trace!("partition {}: connection opened", partition);
        Ok(PgSession {
            conn,
            plan: Arc::clone(plan),
            async_commit: self.async_commit,
        })
    }
}

/// A partition's connection and the plan whose statements it writes.
pub struct PgSession {
    conn: PgConnection,
    plan: Arc<LoadPlan>,
    async_commit: bool,
}

impl StoreSession for PgSession {
    async fn write(&mut self, batch: &WriteBatch) -> Result<Vec<usize>, StoreError> {
        let mut tx = self.conn.begin().await?;

        match write_tables(&mut tx, &self.plan, batch, self.async_commit).await {
            Ok(affected) => {
                tx.commit().await?;
                Ok(affected)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::debug!("rollback after failed flush also failed: {}", rollback_err);
                }
                Err(err.into())
            }
        }
    }

    async fn close(self) {
        if let Err(err) = self.conn.close().await {
            log::debug!("error closing partition connection: {}", err);
        }
    }
}

/// Execute one UNNEST insert per non-empty table.
async fn write_tables(
    conn: &mut PgConnection,
    plan: &LoadPlan,
    batch: &WriteBatch,
    async_commit: bool,
) -> Result<Vec<usize>, sqlx::Error> {
    if async_commit {
        PgTuning::apply_bulk_load_settings(conn).await?;
    }

    let mut affected = Vec::with_capacity(batch.tables().len());

    for (spec, table) in plan.tables().zip(batch.tables()) {
        if table.is_empty() {
            affected.push(0);
            continue;
        }

        let mut query = sqlx::query(&spec.insert_sql);
        for column in table.columns() {
            query = match column {
                ColumnBuffer::Integer(values) => query.bind(values),
                ColumnBuffer::Real(values) => query.bind(values),
                ColumnBuffer::Text(values) => query.bind(values),
                ColumnBuffer::Timestamp(values) => query.bind(values),
            };
        }

        let rows_affected = query.execute(&mut *conn).await?.rows_affected() as usize;
        if rows_affected < table.len() {
            log::trace!(
                "{}: tried to insert {} rows, {} inserted ({} skipped as conflicts or dangling references)",
                spec.name,
                table.len(),
                rows_affected,
                table.len() - rows_affected
            );
        }
        affected.push(rows_affected);
    }

    Ok(affected)
}

//! Helpers for unit and integration tests.

pub use database::{TestDatabase, TestDatabaseError};
pub use memory::MemoryStore;

/// Build a raw row from string cells, treating `""` as a null cell.
pub fn raw_row(cells: &[&str]) -> crate::shaper::RawRow {
    cells
        .iter()
        .map(|cell| if cell.is_empty() { None } else { Some(cell.to_string()) })
        .collect()
}

pub mod memory {
    use crate::import::plan::{LoadPlan, Reference, TableSpec};
    use crate::import::write_batch::WriteBatch;
    use crate::store::{RecordStore, StoreError, StoreSession};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    type Row = Vec<Option<String>>;

    #[derive(Default)]
    struct MemoryTable {
        columns: Vec<&'static str>,
        rows: Vec<Row>,
        keys: HashSet<Row>,
    }

    impl MemoryTable {
        fn has_value(&self, column: &str, value: &Option<String>) -> bool {
            let Some(idx) = self.columns.iter().position(|name| *name == column) else {
                return false;
            };
            self.rows.iter().any(|row| &row[idx] == value)
        }
    }

    #[derive(Default)]
    struct Faults {
        failed_opens: HashSet<usize>,
        rejected_ids: HashSet<(&'static str, i64)>,
        disconnect_after: HashMap<usize, usize>,
    }

    #[derive(Default)]
    struct Shared {
        tables: Mutex<HashMap<&'static str, MemoryTable>>,
        faults: Mutex<Faults>,
        writes: Mutex<HashMap<usize, usize>>,
        sessions: Mutex<(usize, usize)>,
        write_delay: Option<Duration>,
    }

    /// In-memory store with the same write semantics as the PostgreSQL
    /// store: atomic batches, conflict no-ops and reference filtering.
    ///
    /// Faults can be injected per partition or per record id.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        shared: Arc<Shared>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sleep before every write so partitions overlap in time.
        pub fn with_write_delay(delay: Duration) -> Self {
            Self {
                shared: Arc::new(Shared {
                    write_delay: Some(delay),
                    ..Shared::default()
                }),
            }
        }

        /// Make opening a session for `partition` fail with a connection error.
        pub fn fail_open(&self, partition: usize) {
            self.shared.faults.lock().failed_opens.insert(partition);
        }

        /// Reject every write that contains the record `id` of `plan`.
        pub fn reject_id(&self, plan: &'static str, id: i64) {
            self.shared.faults.lock().rejected_ids.insert((plan, id));
        }

        /// Let `partition` commit `writes` times, then lose its connection.
        pub fn disconnect_after(&self, partition: usize, writes: usize) {
            self.shared
                .faults
                .lock()
                .disconnect_after
                .insert(partition, writes);
        }

        pub fn row_count(&self, table: &str) -> usize {
            self.shared
                .tables
                .lock()
                .get(table)
                .map_or(0, |table| table.rows.len())
        }

        /// Stored rows of a table, rendered as text.
        pub fn rows(&self, table: &str) -> Vec<Vec<Option<String>>> {
            self.shared
                .tables
                .lock()
                .get(table)
                .map(|table| table.rows.clone())
                .unwrap_or_default()
        }

        /// Whether `table` holds a row whose first column is `id`.
        pub fn contains(&self, table: &str, id: i64) -> bool {
            let id = Some(id.to_string());
            self.shared
                .tables
                .lock()
                .get(table)
                .is_some_and(|table| table.rows.iter().any(|row| row.first() == Some(&id)))
        }

        /// Highest number of sessions that were open at the same time.
        pub fn max_concurrent_sessions(&self) -> usize {
            self.shared.sessions.lock().1
        }

        fn try_open(&self, partition: usize) -> Result<(), StoreError> {
            if self.shared.faults.lock().failed_opens.contains(&partition) {
                return Err(StoreError::Connection(format!(
                    "connection refused for partition {partition}"
                )));
            }
            let mut sessions = self.shared.sessions.lock();
            sessions.0 += 1;
            sessions.1 = sessions.1.max(sessions.0);
            Ok(())
        }
    }

    impl RecordStore for MemoryStore {
        type Session = MemorySession;

        async fn open(&self, partition: usize, plan: &Arc<LoadPlan>) -> Result<MemorySession, StoreError> {
            self.try_open(partition)?;
            Ok(MemorySession {
                shared: Arc::clone(&self.shared),
                partition,
                plan: Arc::clone(plan),
            })
        }
    }

    pub struct MemorySession {
        shared: Arc<Shared>,
        partition: usize,
        plan: Arc<LoadPlan>,
    }

    impl MemorySession {
        fn apply(&self, batch: &WriteBatch) -> Result<Vec<usize>, StoreError> {
            {
                let faults = self.shared.faults.lock();
                let writes = self.shared.writes.lock();
                let done = writes.get(&self.partition).copied().unwrap_or(0);
                let limit = faults.disconnect_after.get(&self.partition).copied();
                if limit.is_some_and(|limit| done >= limit) {
                    return Err(StoreError::Connection("server closed the connection".to_string()));
                }
                if let Some(id) = batch
                    .ids()
                    .iter()
                    .find(|id| faults.rejected_ids.contains(&(self.plan.name, **id)))
                {
                    return Err(StoreError::Rejected(format!(
                        "check constraint violated by {} {}",
                        self.plan.name, id
                    )));
                }
            }

            let mut tables = self.shared.tables.lock();
            let mut staged: Vec<(&'static str, Row, Row)> = Vec::new();
            let mut affected = Vec::with_capacity(batch.tables().len());

            for (spec, table) in self.plan.tables().zip(batch.tables()) {
                let key_columns: Vec<usize> = spec
                    .conflict_key
                    .iter()
                    .filter_map(|name| spec.column_index(name))
                    .collect();
                let mut inserted = 0;

                for row in 0..table.len() {
                    let values = table.row_values(row);
                    if !references_resolve(spec, &values, &tables) {
                        continue;
                    }
                    let key: Row = key_columns.iter().map(|idx| values[*idx].clone()).collect();
                    let exists = tables.get(spec.name).is_some_and(|t| t.keys.contains(&key))
                        || staged.iter().any(|(name, staged_key, _)| *name == spec.name && *staged_key == key);
                    if exists {
                        continue;
                    }
                    staged.push((spec.name, key, values));
                    inserted += 1;
                }
                affected.push(inserted);
            }

            for (name, key, values) in staged {
                let columns = self
                    .plan
                    .tables()
                    .find(|spec| spec.name == name)
                    .map(|spec| spec.columns.iter().map(|column| column.name).collect())
                    .unwrap_or_default();
                let table = tables.entry(name).or_insert_with(|| MemoryTable {
                    columns,
                    ..MemoryTable::default()
                });
                table.keys.insert(key);
                table.rows.push(values);
            }

            *self.shared.writes.lock().entry(self.partition).or_insert(0) += 1;
            Ok(affected)
        }
    }

    /// Referenced tables always belong to an earlier plan, so only committed
    /// rows are consulted.
    fn references_resolve(
        spec: &TableSpec,
        values: &Row,
        tables: &HashMap<&'static str, MemoryTable>,
    ) -> bool {
        spec.references.iter().all(|reference: &Reference| {
            let Some(idx) = spec.column_index(reference.column) else {
                return false;
            };
            tables
                .get(reference.table)
                .is_some_and(|table| table.has_value(reference.key, &values[idx]))
        })
    }

    impl StoreSession for MemorySession {
        async fn write(&mut self, batch: &WriteBatch) -> Result<Vec<usize>, StoreError> {
            if let Some(delay) = self.shared.write_delay {
                tokio::time::sleep(delay).await;
            }
            self.apply(batch)
        }

        async fn close(self) {
            let mut sessions = self.shared.sessions.lock();
            sessions.0 = sessions.0.saturating_sub(1);
        }
    }
}

pub mod database {
    use crate::store::PgStore;
    use crate::store::migration::MIGRATOR;
    use log::LevelFilter;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{ConnectOptions, PgPool};
    use testcontainers::{GenericImage, ImageExt, core::WaitFor};
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;
    use tokio::runtime::Handle;
    use uuid::Uuid;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("migration error: {0}")]
        Migration(#[from] sqlx::migrate::MigrateError),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Ephemeral database factory for integration tests.
    ///
    /// Uses the server named by `TEST_DATABASE_URL` when set, otherwise a
    /// disposable PostgreSQL container.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        options: PgConnectOptions,
        admin_options: PgConnectOptions,
        database_name: String,
        container: Option<ContainerAsync<GenericImage>>,
    }

    impl TestDatabase {
        /// Provision a fresh, migrated database.
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let (admin_url, container) = match std::env::var("TEST_DATABASE_URL") {
                Ok(url) => (url, None),
                Err(_) => {
                    let container = GenericImage::new("postgres", "16-alpine")
                        .with_wait_for(WaitFor::message_on_stdout(
                            "database system is ready to accept connections",
                        ))
                        .with_wait_for(WaitFor::message_on_stderr(
                            "database system is ready to accept connections",
                        ))
                        .with_env_var("POSTGRES_DB", "postgres")
                        .with_env_var("POSTGRES_USER", "postgres")
                        .with_env_var("POSTGRES_PASSWORD", "postgres")
                        .start()
                        .await?;

                    let host = container.get_host().await?.to_string();
                    let port = container.get_host_port_ipv4(5432).await?;
                    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                    (url, Some(container))
                }
            };

            let base_options: PgConnectOptions = admin_url.parse()?;
            let base_options = base_options.log_statements(LevelFilter::Off);

            let base_name = base_options
                .get_database()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "postgres".to_string());

            let admin_options = base_options.clone().database("postgres");
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options.clone())
                .await?;

            let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
            let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
            sqlx::query(&create_sql).execute(&admin_pool).await?;
            admin_pool.close().await;

            let options = base_options.clone().database(&new_db_name);
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect_with(options.clone())
                .await?;

            MIGRATOR.run(&pool).await?;

            Ok(Self {
                pool: Some(pool),
                options,
                admin_options,
                database_name: new_db_name,
                container,
            })
        }

        /// Connection pool for assertions.
        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        pub fn pool_clone(&self) -> PgPool {
            self.pool().clone()
        }

        /// A store that loads into this database.
        pub fn store(&self, async_commit: bool) -> PgStore {
            PgStore::new(self.options.clone(), async_commit)
        }

        /// Close pool connections and drop the ephemeral database.
        pub async fn close(mut self) -> Result<(), TestDatabaseError> {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }

            drop_database_with_fallback(self.admin_options.clone(), &self.database_name).await?;

            if let Some(container) = self.container.take() {
                drop(container);
            }

            Ok(())
        }
    }

    async fn drop_database_with_fallback(
        admin_options: PgConnectOptions,
        database_name: &str,
    ) -> Result<(), sqlx::Error> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(admin_options)
            .await?;

        let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
        match sqlx::query(&drop_force).execute(&admin_pool).await {
            Ok(_) => Ok(()),
            Err(err) if force_drop_unsupported(&err) => {
                let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                sqlx::query(&drop_sql).execute(&admin_pool).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn force_drop_unsupported(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db_err)
                if db_err
                    .code()
                    .map(|code| code == "42601" || code == "0A000")
                    .unwrap_or(false)
        )
    }

    impl Drop for TestDatabase {
        fn drop(&mut self) {
            if let Some(pool) = self.pool.take() {
                let admin_options = self.admin_options.clone();
                let db_name = self.database_name.clone();
                if let Ok(handle) = Handle::try_current() {
                    handle.spawn(async move {
                        pool.close().await;
                        let _ = drop_database_with_fallback(admin_options, &db_name).await;
                    });
                } else {
                    std::thread::spawn(move || {
                        if let Ok(rt) = tokio::runtime::Runtime::new() {
                            rt.block_on(async move {
                                pool.close().await;
                                let _ = drop_database_with_fallback(admin_options, &db_name).await;
                            });
                        }
                    });
                }
            }

            if let Some(container) = self.container.take() {
                drop(container);
            }
        }
    }
}

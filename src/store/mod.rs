//! Storage seam for the loader.
//!
//! A [`RecordStore`] hands out one [`StoreSession`] per partition. A session
//! owns a single connection for the lifetime of its partition and writes
//! whole [`WriteBatch`]es atomically: every table of the batch commits, or
//! none does.

pub mod migration;
pub mod postgres;
pub mod tuning;

pub use postgres::PgStore;

use crate::import::plan::LoadPlan;
use crate::import::write_batch::WriteBatch;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a store operation, classified by how far it reaches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The statement or its data was refused; the connection is still usable.
    #[error("write rejected: {0}")]
    Rejected(String),
    /// The connection is gone or unusable; the partition cannot continue.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// SQLSTATE classes that mean the session itself is broken:
/// connection exception, insufficient resources, operator intervention.
const CONNECTION_CLASSES: [&str; 3] = ["08", "53", "57"];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let connection_class = db_err
                    .code()
                    .map(|code| CONNECTION_CLASSES.iter().any(|class| code.starts_with(*class)))
                    .unwrap_or(false);
                if connection_class {
                    StoreError::Connection(err.to_string())
                } else {
                    StoreError::Rejected(err.to_string())
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
            _ => StoreError::Rejected(err.to_string()),
        }
    }
}

/// Source of per-partition write sessions.
pub trait RecordStore: Send + Sync + 'static {
    type Session: StoreSession;

    /// Open a session for one partition and prepare the plan's statements.
    ///
    /// Any failure here is reported as [`StoreError::Connection`] by callers:
    /// the partition has nothing to write through.
    fn open(
        &self,
        partition: usize,
        plan: &Arc<LoadPlan>,
    ) -> impl Future<Output = Result<Self::Session, StoreError>> + Send;
}

/// A single-connection writer owned by one partition.
pub trait StoreSession: Send {
    /// Write every table of `batch` in one transaction.
    ///
    /// Returns the number of rows actually inserted per table, in the order
    /// of [`WriteBatch::tables`]. Conflicting and filtered rows are not
    /// counted. On error nothing from the batch is committed.
    fn write(&mut self, batch: &WriteBatch) -> impl Future<Output = Result<Vec<usize>, StoreError>> + Send;

    /// Release the connection.
    fn close(self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_connection_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(StoreError::from(sqlx::Error::Io(io)).is_connection());
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_connection());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_connection());
    }

    #[test]
    fn test_other_errors_are_rejections() {
        assert_eq!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Rejected(sqlx::Error::RowNotFound.to_string())
        );
        let decode = sqlx::Error::Decode("bad value".into());
        assert!(!StoreError::from(decode).is_connection());
    }
}

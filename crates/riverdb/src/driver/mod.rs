//! Raw driver adapters.
//!
//! The coordination layer performs no wire I/O itself; it depends on a
//! [`RawDriver`]/[`RawConnection`]/[`RawTransaction`] trio that any concrete
//! backend can implement. [`sqlx_adapter`] supplies the default
//! implementation backed by `sqlx`'s dialect-agnostic `Any` driver.

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
pub mod sqlx_adapter;

use crate::result_set::ResultSet;
use crate::value::Dialect;
use async_trait::async_trait;
use riverdb_common::Error;
use std::sync::Arc;

/// A notification delivered by a raw driver's LISTEN facility.
#[derive(Debug, Clone)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// A single raw connection to the database, independent of dialect.
///
/// Implementations own exactly one underlying wire connection; the
/// coordination layer (`Connection`/`Pool`) is responsible for serializing
/// access and for lifecycle. Object-safe so the pool factory can return
/// `Box<dyn RawConnection>`.
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Executes `sql` with already-rendered native parameter markers bound
    /// to `values`, returning the number of rows affected.
    async fn execute(&mut self, sql: &str, values: &[crate::value::Value]) -> Result<u64, Error>;

    /// Executes `sql` and materializes every returned row.
    async fn fetch_all(
        &mut self,
        sql: &str,
        values: &[crate::value::Value],
    ) -> Result<ResultSet, Error>;

    /// Starts a transaction, returning an opaque handle understood only by
    /// `commit`/`rollback` on this same connection.
    async fn begin(&mut self) -> Result<(), Error>;

    async fn commit(&mut self) -> Result<(), Error>;

    async fn rollback(&mut self) -> Result<(), Error>;

    /// Subscribes to a LISTEN channel; not every backend supports this
    /// (MySQL/SQLite do not), so the default implementation fails.
    async fn listen(&mut self, _channel: &str) -> Result<(), Error> {
        Err(Error::Database("LISTEN is not supported by this driver".to_string()))
    }

    /// Polls for one notification on a previously-`listen`ed channel.
    /// Returns `Ok(None)` if the backend doesn't support LISTEN at all.
    async fn recv_notification(&mut self) -> Result<Option<Notification>, Error> {
        Ok(None)
    }

    fn dialect(&self) -> Dialect;
}

/// A factory for raw connections: opens fresh connections against one
/// configured database URL. Implemented by [`sqlx_adapter::SqlxAnyDriver`].
#[async_trait]
pub trait RawDriver: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RawConnection>, Error>;

    fn dialect(&self) -> Dialect;

    /// True for a SQLite URL that names an in-memory (or temporary)
    /// database rather than a file. Such a database only exists within the
    /// single wire connection that created it, so a pool fronting it with
    /// `max_connections > 1` would silently hand out connections to
    /// independent, empty databases.
    fn is_sqlite_in_memory(&self) -> bool {
        false
    }
}

pub type SharedDriver = Arc<dyn RawDriver>;

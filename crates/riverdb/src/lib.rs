//! riverdb — a polyglot async SQL coordination layer.
//!
//! This crate sits between application code and a native SQL driver
//! (PostgreSQL, MySQL, SQLite). It performs no network I/O and parses no
//! wire protocol itself — that stays inside the concrete [`driver`] adapter
//! — and instead provides the client-side coordination a real application
//! needs on top of one:
//!
//! - [`pool`]: a connection pool with min/max sizing, acquisition timeouts,
//!   idle/lifetime eviction and background cleanup.
//! - [`connection`] / [`transaction`]: per-handle state machines with
//!   idempotent close and isolation-level lifecycle.
//! - [`renderer`]: a parameterized-statement renderer supporting positional
//!   and named placeholders, collection expansion, and custom-type
//!   encoding via [`encoder`].
//! - [`migrate`]: an ordered, checksummed, once-only file-based schema
//!   migrator.
//! - [`pgmq`]: a client and adaptive consumer for the `pgmq` PostgreSQL
//!   message queue extension.

pub mod connection;
pub mod driver;
pub mod encoder;
pub mod migrate;
pub mod pgmq;
pub mod pool;
pub mod renderer;
pub mod result_set;
pub mod transaction;
pub mod value;

pub use connection::{Connection, IsolationLevel};
pub use driver::{Notification, RawConnection, RawDriver, SharedDriver};
pub use encoder::ValueEncoderRegistry;
pub use migrate::{Migration, MigrationFile, MigrationHistory, MigrationResult, Migrator, MigratorOptions};
pub use pgmq::client::{Message as PgmqMessage, PgmqClient, PgmqClientOptions};
pub use pgmq::consumer::{Consumer, ConsumerOptions};
pub use pool::{Pool, PoolMetrics, PoolOptions, PooledConnection};
pub use renderer::{NativeStatement, Statement};
pub use result_set::{Column, Row, ResultSet, Schema};
pub use transaction::{PooledTransaction, Transaction, TransactionContext};
pub use value::{CollectionExpansion, Dialect, Value};

pub use riverdb_common::{Error, Result};

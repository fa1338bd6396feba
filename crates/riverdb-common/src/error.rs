//! The stable error taxonomy exposed to callers of every riverdb crate.

use thiserror::Error;

/// Result type alias used throughout riverdb.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all riverdb operations.
///
/// Every variant here is part of the public contract: callers match on it,
/// so new variants are additive only.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// An error surfaced by the underlying driver that doesn't map to a more
    /// specific variant below.
    #[error("database error: {0}")]
    Database(String),

    /// `Pool::acquire` did not complete within the configured acquire timeout.
    #[error("timed out waiting for a connection")]
    PoolTimedOut,

    /// The pool has been closed; no further connections can be acquired.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A background pool task (warm-up or cleanup) panicked.
    #[error("pool worker crashed: {0}")]
    WorkerCrashed(String),

    /// An operation was attempted on a `Connection` that has already been closed.
    #[error("connection is closed")]
    ConnectionIsClosed,

    /// An operation was attempted on a `Transaction` that has already committed
    /// or rolled back.
    #[error("transaction is closed")]
    TransactionIsClosed,

    /// A positional `?` placeholder referenced an index with no corresponding
    /// declared position in the statement.
    #[error("positional parameter out of bounds: {0}")]
    PositionalParameterOutOfBounds(usize),

    /// A `:name` placeholder has no entry in the bindings map.
    #[error("named parameter not found: {0}")]
    NamedParameterNotFound(String),

    /// A bound value's kind could not be resolved to a primitive, even after
    /// consulting the encoder registry.
    #[error("named parameter type not supported: {0}")]
    NamedParameterTypeNotSupported(String),

    /// A declared positional index has no bound value.
    #[error("positional parameter value not supplied at index {0}")]
    PositionalParameterValueNotSupplied(usize),

    /// A declared named placeholder has no bound value.
    #[error("named parameter value not supplied: {0}")]
    NamedParameterValueNotSupplied(String),

    /// A migration failed to apply; the message carries the reason
    /// (duplicate version, non-monotonic gap, empty file, checksum mismatch,
    /// or a statement failure).
    #[error("migration failed: {0}")]
    Migrate(String),

    /// A column cast (`as_long`, `as_instant`, ...) failed: either the column
    /// was null for a non-optional cast, or the stored text didn't parse.
    #[error("cannot decode column {column}: {reason}")]
    CannotDecode { column: String, reason: String },
}

impl Error {
    /// Whether the operation that produced this error is safe to retry
    /// as-is (no side effects are assumed to have taken hold).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PoolTimedOut)
    }

    /// Whether this error represents a pool or connection state the caller
    /// can no longer use, as opposed to a single failed operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::PoolClosed | Error::ConnectionIsClosed | Error::TransactionIsClosed
        )
    }
}

#[cfg(feature = "sqlx-errors")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Error::PoolTimedOut,
            sqlx::Error::PoolClosed => Error::PoolClosed,
            sqlx::Error::WorkerCrashed => Error::WorkerCrashed(err.to_string()),
            sqlx::Error::RowNotFound => Error::Database("row not found".to_string()),
            sqlx::Error::ColumnNotFound(name) => Error::CannotDecode {
                column: name.clone(),
                reason: "column not found in result set".to_string(),
            },
            sqlx::Error::ColumnDecode { index, source } => Error::CannotDecode {
                column: index.clone(),
                reason: source.to_string(),
            },
            _ => Error::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(Error::PoolTimedOut.to_string(), "timed out waiting for a connection");
        assert_eq!(Error::PoolClosed.to_string(), "connection pool is closed");
        assert_eq!(Error::ConnectionIsClosed.to_string(), "connection is closed");
        assert_eq!(Error::TransactionIsClosed.to_string(), "transaction is closed");
    }

    #[test]
    fn positional_out_of_bounds_carries_index() {
        let err = Error::PositionalParameterOutOfBounds(3);
        assert_eq!(err.to_string(), "positional parameter out of bounds: 3");
    }

    #[test]
    fn named_not_found_carries_name() {
        let err = Error::NamedParameterNotFound("user_id".to_string());
        assert_eq!(err.to_string(), "named parameter not found: user_id");
    }

    #[test]
    fn cannot_decode_formats_column_and_reason() {
        let err = Error::CannotDecode {
            column: "created_at".to_string(),
            reason: "value is null".to_string(),
        };
        assert_eq!(err.to_string(), "cannot decode column created_at: value is null");
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::PoolTimedOut.is_retryable());
        assert!(!Error::PoolClosed.is_retryable());
        assert!(!Error::Migrate("checksum mismatch".to_string()).is_retryable());
    }

    #[test]
    fn terminal_classification() {
        assert!(Error::PoolClosed.is_terminal());
        assert!(Error::ConnectionIsClosed.is_terminal());
        assert!(Error::TransactionIsClosed.is_terminal());
        assert!(!Error::PoolTimedOut.is_terminal());
    }
}

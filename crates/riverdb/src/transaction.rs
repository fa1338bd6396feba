//! The `Transaction` state machine and the ambient `TransactionContext`
//! helper for scoping work to a single implicit transaction.

use crate::connection::Connection;
use crate::encoder::ValueEncoderRegistry;
use crate::renderer::Statement;
use crate::result_set::ResultSet;
use crate::value::Value;
use riverdb_common::Error;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An open or closed transaction. Owns its connection for its lifetime;
/// `commit`/`rollback` are one-shot and idempotent after success.
pub struct Transaction {
    connection: Connection,
    committed: bool,
    rolledback: bool,
}

impl Transaction {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection, committed: false, rolledback: false }
    }

    pub fn is_closed(&self) -> bool {
        self.committed || self.rolledback
    }

    pub async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, Error> {
        if self.is_closed() {
            return Err(Error::TransactionIsClosed);
        }
        self.connection.execute(sql, values).await
    }

    pub async fn fetch_all(&self, sql: &str, values: &[Value]) -> Result<ResultSet, Error> {
        if self.is_closed() {
            return Err(Error::TransactionIsClosed);
        }
        self.connection.fetch_all(sql, values).await
    }

    pub async fn execute_statement(
        &self,
        statement: &Statement,
        registry: &ValueEncoderRegistry,
    ) -> Result<u64, Error> {
        if self.is_closed() {
            return Err(Error::TransactionIsClosed);
        }
        self.connection.execute_statement(statement, registry).await
    }

    pub async fn fetch_statement(
        &self,
        statement: &Statement,
        registry: &ValueEncoderRegistry,
    ) -> Result<ResultSet, Error> {
        if self.is_closed() {
            return Err(Error::TransactionIsClosed);
        }
        self.connection.fetch_statement(statement, registry).await
    }

    /// Commits the transaction. A second call after a successful commit is
    /// a no-op; calling after a rollback fails with `TransactionIsClosed`.
    pub async fn commit(&mut self) -> Result<(), Error> {
        if self.committed {
            return Ok(());
        }
        if self.rolledback {
            return Err(Error::TransactionIsClosed);
        }
        self.connection.raw_commit().await?;
        self.committed = true;
        Ok(())
    }

    /// Rolls the transaction back. A second call after a successful
    /// rollback is a no-op; calling after a commit fails with `TransactionIsClosed`.
    pub async fn rollback(&mut self) -> Result<(), Error> {
        if self.rolledback {
            return Ok(());
        }
        if self.committed {
            return Err(Error::TransactionIsClosed);
        }
        self.connection.raw_rollback().await?;
        self.rolledback = true;
        Ok(())
    }

    /// Reclaims the underlying connection. Intended for pooled wrappers
    /// that return the connection to the pool once the transaction closes.
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}

/// A [`Transaction`] checked out through a pool; releases its connection
/// back to the pool when it commits or rolls back, swallowing any
/// secondary error from that release so the original outcome is preserved.
pub struct PooledTransaction {
    pool: Arc<crate::pool::Pool>,
    transaction: Option<Transaction>,
    created_at: tokio::time::Instant,
}

impl PooledTransaction {
    pub(crate) async fn begin(
        pool: Arc<crate::pool::Pool>,
        connection: Connection,
        created_at: tokio::time::Instant,
    ) -> Result<Self, Error> {
        // `raw_begin` borrows rather than consumes, so on failure `connection`
        // is still ours to hand back to the pool instead of dropping it and
        // leaking a unit of pool capacity.
        if let Err(err) = connection.raw_begin().await {
            pool.release_checked_out(connection, created_at).await;
            return Err(err);
        }
        let transaction = Transaction::new(connection);
        Ok(Self { pool, transaction: Some(transaction), created_at })
    }

    fn transaction(&self) -> Result<&Transaction, Error> {
        self.transaction.as_ref().ok_or(Error::TransactionIsClosed)
    }

    pub async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, Error> {
        self.transaction()?.execute(sql, values).await
    }

    pub async fn fetch_all(&self, sql: &str, values: &[Value]) -> Result<ResultSet, Error> {
        self.transaction()?.fetch_all(sql, values).await
    }

    pub async fn execute_statement(
        &self,
        statement: &Statement,
        registry: &ValueEncoderRegistry,
    ) -> Result<u64, Error> {
        self.transaction()?.execute_statement(statement, registry).await
    }

    pub async fn fetch_statement(
        &self,
        statement: &Statement,
        registry: &ValueEncoderRegistry,
    ) -> Result<ResultSet, Error> {
        self.transaction()?.fetch_statement(statement, registry).await
    }

    /// Commits, then releases the underlying connection back to the pool
    /// regardless of the commit's outcome.
    pub async fn commit(mut self) -> Result<(), Error> {
        let mut tx = self.transaction.take().ok_or(Error::TransactionIsClosed)?;
        let result = tx.commit().await;
        self.release(tx).await;
        result
    }

    /// Rolls back, then releases the underlying connection back to the
    /// pool regardless of the rollback's outcome.
    pub async fn rollback(mut self) -> Result<(), Error> {
        let mut tx = self.transaction.take().ok_or(Error::TransactionIsClosed)?;
        let result = tx.rollback().await;
        self.release(tx).await;
        result
    }

    async fn release(&self, tx: Transaction) {
        let connection = tx.into_connection();
        self.pool
            .release_checked_out(connection, self.created_at)
            .await;
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        if let Some(mut tx) = self.transaction.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                let _ = tx.rollback().await;
                pool.release_checked_out(tx.into_connection(), tokio::time::Instant::now()).await;
            });
        }
    }
}

tokio::task_local! {
    static CURRENT_TRANSACTION: Arc<Mutex<Transaction>>;
}

/// A task-scoped handle to an ambient transaction, usable from nested
/// operations without threading it through every call explicitly.
pub struct TransactionContext;

impl TransactionContext {
    /// Starts a new transaction on `connection`, publishes it as the
    /// ambient transaction for the duration of `body`, and commits on
    /// success or rolls back if `body` returns an error. The previous
    /// ambient value (if any) is restored on exit.
    pub async fn new<F, Fut, T>(connection: Connection, body: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let tx = connection.begin().await?;
        let handle = Arc::new(Mutex::new(tx));

        let result = CURRENT_TRANSACTION.scope(handle.clone(), body()).await;

        let mut tx = handle.lock().await;
        match &result {
            Ok(_) => tx.commit().await?,
            Err(_) => {
                // swallow secondary rollback errors to preserve the original failure
                let _ = tx.rollback().await;
            }
        }
        result
    }

    /// Runs `body` against the ambient transaction if one is active; if
    /// not and `connection` is supplied, behaves as `new`. Fails if neither
    /// is available.
    pub async fn with_current<F, Fut, T>(
        connection: Option<Connection>,
        body: F,
    ) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        if CURRENT_TRANSACTION.try_with(|_| ()).is_ok() {
            return body().await;
        }
        match connection {
            Some(connection) => Self::new(connection, body).await,
            None => Err(Error::TransactionIsClosed),
        }
    }

    /// Accesses the ambient transaction, if any, for `f`.
    pub async fn with_ambient<F, T>(f: F) -> Option<T>
    where
        F: FnOnce(&mut Transaction) -> T,
    {
        let handle = CURRENT_TRANSACTION.try_with(|tx| tx.clone()).ok()?;
        let mut tx = handle.lock().await;
        Some(f(&mut tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Notification, RawConnection};
    use crate::value::Dialect;
    use async_trait::async_trait;

    struct FakeRaw;

    #[async_trait]
    impl RawConnection for FakeRaw {
        async fn execute(&mut self, _sql: &str, _values: &[Value]) -> Result<u64, Error> {
            Ok(0)
        }
        async fn fetch_all(&mut self, _sql: &str, _values: &[Value]) -> Result<ResultSet, Error> {
            Ok(ResultSet::new(crate::result_set::Schema::new(Vec::<String>::new()), vec![], 0))
        }
        async fn begin(&mut self) -> Result<(), Error> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<(), Error> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<(), Error> {
            Ok(())
        }
        async fn listen(&mut self, _channel: &str) -> Result<(), Error> {
            Ok(())
        }
        async fn recv_notification(&mut self) -> Result<Option<Notification>, Error> {
            Ok(None)
        }
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }
    }

    fn fake_connection() -> Connection {
        Connection::new(Box::new(FakeRaw))
    }

    #[tokio::test]
    async fn commit_then_rollback_is_a_no_op_error() {
        let conn = fake_connection();
        let mut tx = conn.begin().await.unwrap();
        tx.commit().await.unwrap();
        tx.commit().await.unwrap(); // no-op
        let err = tx.rollback().await.unwrap_err();
        assert!(matches!(err, Error::TransactionIsClosed));
    }

    #[tokio::test]
    async fn operations_after_commit_fail_with_transaction_is_closed() {
        let conn = fake_connection();
        let mut tx = conn.begin().await.unwrap();
        tx.commit().await.unwrap();
        let err = tx.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, Error::TransactionIsClosed));
    }

    #[tokio::test]
    async fn double_rollback_is_a_no_op() {
        let conn = fake_connection();
        let mut tx = conn.begin().await.unwrap();
        tx.rollback().await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn context_new_commits_on_success() {
        let conn = fake_connection();
        let result: Result<i32, Error> = TransactionContext::new(conn, || async {
            let seen = TransactionContext::with_ambient(|tx| tx.is_closed()).await;
            assert_eq!(seen, Some(false));
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn context_new_rolls_back_on_error() {
        let conn = fake_connection();
        let result: Result<(), Error> = TransactionContext::new(conn, || async {
            Err(Error::Database("boom".to_string()))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn with_current_without_ambient_or_connection_fails() {
        let result: Result<(), Error> =
            TransactionContext::with_current(None, || async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::TransactionIsClosed)));
    }
}

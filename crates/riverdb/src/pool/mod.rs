//! The connection pool.
//!
//! Rations a bounded number of raw connections among concurrent acquirers,
//! amortizes connection setup via idle reuse, evicts stale connections in
//! the background, and delivers timely failures on overload.

use crate::connection::Connection;
use crate::driver::SharedDriver;
use riverdb_common::Error;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(2);
const CLEANUP_YIELD_EVERY: usize = 10;

/// Construction options for a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 10,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            max_lifetime: None,
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = n;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.min_connections > self.max_connections {
            return Err(Error::Database(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.max_connections == 0 {
            return Err(Error::Database("max_connections must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetrics {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

struct IdleEntry {
    connection: Connection,
    created_at: Instant,
    last_used_at: Instant,
}

impl IdleEntry {
    fn is_expired(&self, options: &PoolOptions) -> bool {
        let now = Instant::now();
        if let Some(max_lifetime) = options.max_lifetime {
            if now.duration_since(self.created_at) >= max_lifetime {
                return true;
            }
        }
        if let Some(idle_timeout) = options.idle_timeout {
            if now.duration_since(self.last_used_at) >= idle_timeout {
                return true;
            }
        }
        false
    }
}

/// A bounded pool of [`Connection`]s over one [`SharedDriver`].
pub struct Pool {
    driver: SharedDriver,
    options: PoolOptions,
    idle: std::sync::Mutex<VecDeque<IdleEntry>>,
    total_connections: AtomicUsize,
    closed: AtomicBool,
    slots: Arc<Semaphore>,
    idle_available: Notify,
    cleanup_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Creates the pool and, if `min_connections > 0`, spawns a best-effort
    /// warm-up task; starts the background cleanup loop unconditionally.
    pub fn connect(driver: SharedDriver, options: PoolOptions) -> Result<Arc<Self>, Error> {
        options.validate()?;
        if driver.is_sqlite_in_memory() && options.max_connections != 1 {
            return Err(Error::Database(
                "an in-memory SQLite URL requires max_connections == 1: each connection opens its own independent database".to_string(),
            ));
        }

        let pool = Arc::new(Self {
            driver,
            slots: Arc::new(Semaphore::new(options.max_connections)),
            idle: std::sync::Mutex::new(VecDeque::new()),
            total_connections: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            idle_available: Notify::new(),
            cleanup_handle: std::sync::Mutex::new(None),
            options,
        });

        if pool.options.min_connections > 0 {
            let warm = pool.clone();
            tokio::spawn(async move { warm.warm_up().await });
        }

        let cleanup_pool = pool.clone();
        let handle = tokio::spawn(async move { cleanup_pool.cleanup_loop().await });
        *pool.cleanup_handle.lock().unwrap() = Some(handle);

        Ok(pool)
    }

    async fn warm_up(self: Arc<Self>) {
        for _ in 0..self.options.min_connections {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let Ok(permit) = self.slots.clone().try_acquire_owned() else { return };
            match self.driver.connect().await {
                Ok(raw) => {
                    permit.forget();
                    self.total_connections.fetch_add(1, Ordering::SeqCst);
                    let entry = IdleEntry {
                        connection: Connection::new(raw),
                        created_at: Instant::now(),
                        last_used_at: Instant::now(),
                    };
                    self.idle.lock().unwrap().push_back(entry);
                    self.idle_available.notify_one();
                }
                Err(err) => {
                    warn!(error = %err, "pool warm-up connection attempt failed");
                }
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut iterations = 0usize;
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            let max_sweep = (self.options.max_connections / 2).max(1);
            let mut swept = Vec::with_capacity(max_sweep);
            {
                let mut idle = self.idle.lock().unwrap();
                for _ in 0..max_sweep {
                    match idle.pop_front() {
                        Some(entry) => swept.push(entry),
                        None => break,
                    }
                }
            }

            for entry in swept {
                if entry.is_expired(&self.options) {
                    self.shrink_or_park(entry).await;
                } else {
                    self.idle.lock().unwrap().push_back(entry);
                }
                iterations += 1;
                if iterations % CLEANUP_YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Closes `entry`'s underlying connection if shrinking below
    /// `min_connections` keeps the pool above its floor; otherwise returns
    /// it to idle.
    async fn shrink_or_park(&self, entry: IdleEntry) {
        if self.try_shrink() {
            if let Err(err) = entry.connection.close().await {
                warn!(error = %err, "error closing expired pool connection");
            }
            self.slots.add_permits(1);
        } else {
            self.idle.lock().unwrap().push_back(entry);
        }
    }

    /// Attempts to decrement `total_connections`, but only while staying at
    /// or above `min_connections`.
    fn try_shrink(&self) -> bool {
        loop {
            let current = self.total_connections.load(Ordering::SeqCst);
            if current <= self.options.min_connections {
                return false;
            }
            if self
                .total_connections
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn pop_idle_candidate(&self) -> Option<IdleEntry> {
        self.idle.lock().unwrap().pop_front()
    }

    /// Acquires a connection, honoring `acquire_timeout` if configured.
    #[instrument(skip(self))]
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, Error> {
        match self.options.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire_inner())
                .await
                .map_err(|_| Error::PoolTimedOut)?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(self: &Arc<Self>) -> Result<PooledConnection, Error> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::PoolClosed);
            }

            while let Some(entry) = self.pop_idle_candidate() {
                if entry.is_expired(&self.options) {
                    if let Err(err) = entry.connection.close().await {
                        warn!(error = %err, "error closing expired idle connection");
                    }
                    self.total_connections.fetch_sub(1, Ordering::SeqCst);
                    self.slots.add_permits(1);
                    tokio::task::yield_now().await;
                    continue;
                }
                return Ok(self.wrap(entry));
            }

            if let Ok(permit) = self.slots.clone().try_acquire_owned() {
                match self.driver.connect().await {
                    Ok(raw) => {
                        permit.forget();
                        self.total_connections.fetch_add(1, Ordering::SeqCst);
                        let entry = IdleEntry {
                            connection: Connection::new(raw),
                            created_at: Instant::now(),
                            last_used_at: Instant::now(),
                        };
                        return Ok(self.wrap(entry));
                    }
                    Err(err) => return Err(err),
                }
            }

            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::PoolClosed);
            }
            self.idle_available.notified().await;
        }
    }

    fn wrap(self: &Arc<Self>, entry: IdleEntry) -> PooledConnection {
        PooledConnection { pool: self.clone(), slot: Some(entry) }
    }

    async fn release_entry(&self, mut entry: IdleEntry) {
        entry.connection.reset_isolation_level().await;
        entry.last_used_at = Instant::now();

        if self.closed.load(Ordering::SeqCst) {
            if let Err(err) = entry.connection.close().await {
                warn!(error = %err, "error closing connection released to a closed pool");
            }
            return;
        }

        if entry.is_expired(&self.options) {
            self.shrink_or_park(entry).await;
            return;
        }

        self.idle.lock().unwrap().push_back(entry);
        self.idle_available.notify_one();
    }

    /// Returns a connection reclaimed from a closed/committed transaction
    /// back to idle, as though it had just been released normally.
    pub(crate) async fn release_checked_out(&self, connection: Connection, created_at: Instant) {
        self.release_entry(IdleEntry { connection, created_at, last_used_at: Instant::now() }).await;
    }

    /// A non-blocking snapshot of pool occupancy.
    pub fn metrics(&self) -> PoolMetrics {
        let total = self.total_connections.load(Ordering::SeqCst);
        let idle = self.idle.lock().unwrap().len();
        PoolMetrics { total, idle, in_use: total.saturating_sub(idle), max: self.options.max_connections }
    }

    /// Idempotently closes the pool: cancels the cleanup task, drains and
    /// closes every idle connection, and fails subsequent acquires.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.cleanup_handle.lock().unwrap().take() {
            handle.abort();
        }

        let drained: Vec<IdleEntry> = {
            let mut idle = self.idle.lock().unwrap();
            idle.drain(..).collect()
        };
        for entry in drained {
            if let Err(err) = entry.connection.close().await {
                debug!(error = %err, "error closing idle connection during pool shutdown");
            }
        }
        self.idle_available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Acquires a connection, runs `f` against it, and releases it
    /// afterwards regardless of outcome.
    pub async fn with_connection<F, Fut, T>(self: &Arc<Self>, f: F) -> Result<T, Error>
    where
        F: FnOnce(PooledConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let conn = self.acquire().await?;
        f(conn).await
    }
}

/// A [`Connection`] checked out from a [`Pool`]. Returned to the pool
/// automatically on drop, or explicitly via [`PooledConnection::release`].
pub struct PooledConnection {
    pool: Arc<Pool>,
    slot: Option<IdleEntry>,
}

impl PooledConnection {
    fn connection(&self) -> &Connection {
        &self.slot.as_ref().expect("connection already released").connection
    }

    pub fn dialect(&self) -> crate::value::Dialect {
        self.connection().dialect()
    }

    pub async fn execute(&self, sql: &str, values: &[crate::value::Value]) -> Result<u64, Error> {
        self.connection().execute(sql, values).await
    }

    pub async fn fetch_all(
        &self,
        sql: &str,
        values: &[crate::value::Value],
    ) -> Result<crate::result_set::ResultSet, Error> {
        self.connection().fetch_all(sql, values).await
    }

    pub async fn execute_statement(
        &self,
        statement: &crate::renderer::Statement,
        registry: &crate::encoder::ValueEncoderRegistry,
    ) -> Result<u64, Error> {
        self.connection().execute_statement(statement, registry).await
    }

    pub async fn fetch_statement(
        &self,
        statement: &crate::renderer::Statement,
        registry: &crate::encoder::ValueEncoderRegistry,
    ) -> Result<crate::result_set::ResultSet, Error> {
        self.connection().fetch_statement(statement, registry).await
    }

    pub async fn set_transaction_isolation_level(
        &self,
        level: crate::connection::IsolationLevel,
    ) -> Result<(), Error> {
        self.connection().set_transaction_isolation_level(level).await
    }

    /// Starts a transaction, consuming this pooled guard; the connection is
    /// returned to the pool when the resulting [`PooledTransaction`]
    /// commits or rolls back.
    pub async fn begin(mut self) -> Result<crate::transaction::PooledTransaction, Error> {
        let entry = self.slot.take().expect("connection already released");
        crate::transaction::PooledTransaction::begin(self.pool.clone(), entry.connection, entry.created_at).await
    }

    /// Explicitly returns the connection to the pool.
    pub async fn release(mut self) {
        if let Some(entry) = self.slot.take() {
            self.pool.release_entry(entry).await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(entry) = self.slot.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.release_entry(entry).await });
        }
    }
}

//! Connection pool implementation.
//!
//! All pool bookkeeping happens under one mutex; a single condition variable
//! wakes callers blocked on a saturated pool. Connection creation and the
//! liveness probe run with the lock held, which serializes them pool-wide.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use datasource_core::ConnectionFactory;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{PoolConfig, connection_type_code};
use crate::connection::PooledConnection;
use crate::entry::{EntryStatus, PhysicalConnection, PoolEntry};
use crate::error::PoolError;
use crate::probe::probe;
use crate::state::{PoolMetrics, PoolState};

/// A synchronous, thread-safe pooled data source.
///
/// Callers block in [`get_connection`](Pool::get_connection) until a
/// connection is available. Connections come from, in order of preference:
/// the idle set, the factory (while fewer than `max_active_connections` are
/// checked out), or the oldest checked-out connection once its lease exceeds
/// `max_checkout_time`. Every candidate is probed before it is handed out.
///
/// Dropping the pool closes every connection it manages.
///
/// # Example
///
/// ```rust,ignore
/// use datasource_pool::{Pool, PoolConfig};
/// use std::time::Duration;
///
/// let pool = Pool::builder()
///     .factory(driver)
///     .url("postgres://localhost/app")
///     .credentials("app", "secret")
///     .max_active_connections(20)
///     .ping_query("SELECT 1")
///     .build()?;
///
/// let mut conn = pool.get_connection()?;
/// conn.execute("UPDATE counters SET n = n + 1")?;
/// // Returned to the pool on close or drop
/// ```
pub struct Pool {
    shared: Arc<Shared>,
}

/// State shared between the pool and the handles it gives out.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    /// Signalled when a connection is returned to the idle set.
    available: Condvar,
    factory: Arc<dyn ConnectionFactory>,
    next_entry_id: AtomicU64,
    next_connection_id: AtomicU64,
    created_at: Instant,
}

struct Inner {
    config: PoolConfig,
    expected_type_code: u64,
    state: PoolState,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool opening connections through `factory`.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::info!(
            url = %config.url,
            max_active = config.max_active_connections,
            max_idle = config.max_idle_connections,
            "connection pool created"
        );

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                expected_type_code: config.expected_type_code(),
                config,
                state: PoolState::default(),
            }),
            available: Condvar::new(),
            factory,
            next_entry_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
        });

        Ok(Self { shared })
    }

    /// Get a connection using the configured credentials.
    pub fn get_connection(&self) -> Result<PooledConnection, PoolError> {
        let (username, password) = self.default_credentials();
        self.acquire(&username, &password, None)
    }

    /// Get a connection tagged with the given credentials.
    ///
    /// New physical connections are always opened with the configured
    /// credentials; `username` and `password` only determine the connection's
    /// type code. A connection whose type code differs from the pool's is
    /// closed instead of recycled when it is returned.
    pub fn get_connection_as(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PooledConnection, PoolError> {
        self.acquire(username, password, None)
    }

    /// Get a connection, giving up with [`PoolError::Interrupted`] if `token`
    /// is cancelled while waiting.
    pub fn get_connection_interruptible(
        &self,
        token: &CancelToken,
    ) -> Result<PooledConnection, PoolError> {
        let (username, password) = self.default_credentials();
        self.acquire(&username, &password, Some(token))
    }

    /// Create a token that can interrupt waiting acquisitions.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: Arc::clone(&self.shared),
        }
    }

    fn default_credentials(&self) -> (String, String) {
        let inner = self.shared.inner.lock();
        (inner.config.username.clone(), inner.config.password.clone())
    }

    fn acquire(
        &self,
        username: &str,
        password: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<PooledConnection, PoolError> {
        let entry = self.shared.pop_connection(username, password, cancel)?;
        Ok(PooledConnection::new(entry, Arc::clone(&self.shared)))
    }

    /// Close every active and idle connection and recompute the expected type
    /// code. Checked-out handles become invalid.
    pub fn force_close_all(&self) {
        let mut inner = self.shared.inner.lock();
        Shared::close_all(&mut inner);
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = self.shared.inner.lock();
        PoolStatus {
            idle: inner.state.idle.len(),
            active: inner.state.active.len(),
            max_active: inner.config.max_active_connections,
            max_idle: inner.config.max_idle_connections,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.shared.inner.lock();
        inner
            .state
            .metrics(inner.config.clone(), self.shared.created_at.elapsed())
    }

    /// Get a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.shared.inner.lock().config.clone()
    }

    /// Apply `update` to the configuration and reset the pool.
    ///
    /// The configuration is left untouched if the result does not validate.
    pub fn reconfigure(&self, update: impl FnOnce(&mut PoolConfig)) -> Result<(), PoolError> {
        let mut inner = self.shared.inner.lock();
        let mut config = inner.config.clone();
        update(&mut config);
        config.validate()?;
        inner.config = config;
        Shared::close_all(&mut inner);
        Ok(())
    }

    /// Set the connection URL. Resets the pool.
    pub fn set_url(&self, url: impl Into<String>) -> Result<(), PoolError> {
        let url = url.into();
        self.reconfigure(|c| c.url = url)
    }

    /// Set the default username. Resets the pool.
    pub fn set_username(&self, username: impl Into<String>) -> Result<(), PoolError> {
        let username = username.into();
        self.reconfigure(|c| c.username = username)
    }

    /// Set the default password. Resets the pool.
    pub fn set_password(&self, password: impl Into<String>) -> Result<(), PoolError> {
        let password = password.into();
        self.reconfigure(|c| c.password = password)
    }

    /// Set the maximum number of active connections. Resets the pool.
    pub fn set_max_active_connections(&self, count: usize) -> Result<(), PoolError> {
        self.reconfigure(|c| c.max_active_connections = count)
    }

    /// Set the maximum number of idle connections. Resets the pool.
    pub fn set_max_idle_connections(&self, count: usize) -> Result<(), PoolError> {
        self.reconfigure(|c| c.max_idle_connections = count)
    }

    /// Set the checkout time after which a connection may be reclaimed.
    /// Resets the pool.
    pub fn set_max_checkout_time(&self, time: Duration) -> Result<(), PoolError> {
        self.reconfigure(|c| c.max_checkout_time = time)
    }

    /// Set how long a waiting caller sleeps before re-examining the pool.
    /// Resets the pool.
    pub fn set_time_to_wait(&self, time: Duration) -> Result<(), PoolError> {
        self.reconfigure(|c| c.time_to_wait = time)
    }

    /// Set the local bad connection tolerance. Resets the pool.
    pub fn set_max_local_bad_connection_tolerance(&self, tolerance: usize) -> Result<(), PoolError> {
        self.reconfigure(|c| c.max_local_bad_connection_tolerance = tolerance)
    }

    /// Set the ping query. Resets the pool.
    pub fn set_ping_query(&self, query: impl Into<String>) -> Result<(), PoolError> {
        let query = query.into();
        self.reconfigure(|c| c.ping_query = query)
    }

    /// Enable or disable the ping query. Resets the pool.
    pub fn set_ping_enabled(&self, enabled: bool) -> Result<(), PoolError> {
        self.reconfigure(|c| c.ping_enabled = enabled)
    }

    /// Set the idle threshold for pinging. Resets the pool.
    pub fn set_ping_connections_not_used_for(&self, threshold: Duration) -> Result<(), PoolError> {
        self.reconfigure(|c| c.ping_connections_not_used_for = threshold)
    }

    /// The connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.shared.inner.lock().config.url.clone()
    }

    /// The default username.
    #[must_use]
    pub fn username(&self) -> String {
        self.shared.inner.lock().config.username.clone()
    }

    /// The maximum number of active connections.
    #[must_use]
    pub fn max_active_connections(&self) -> usize {
        self.shared.inner.lock().config.max_active_connections
    }

    /// The maximum number of idle connections.
    #[must_use]
    pub fn max_idle_connections(&self) -> usize {
        self.shared.inner.lock().config.max_idle_connections
    }

    /// The checkout time after which a connection may be reclaimed.
    #[must_use]
    pub fn max_checkout_time(&self) -> Duration {
        self.shared.inner.lock().config.max_checkout_time
    }

    /// How long a waiting caller sleeps before re-examining the pool.
    #[must_use]
    pub fn time_to_wait(&self) -> Duration {
        self.shared.inner.lock().config.time_to_wait
    }

    /// The local bad connection tolerance.
    #[must_use]
    pub fn max_local_bad_connection_tolerance(&self) -> usize {
        self.shared.inner.lock().config.max_local_bad_connection_tolerance
    }

    /// The ping query.
    #[must_use]
    pub fn ping_query(&self) -> String {
        self.shared.inner.lock().config.ping_query.clone()
    }

    /// Whether the ping query is used.
    #[must_use]
    pub fn ping_enabled(&self) -> bool {
        self.shared.inner.lock().config.ping_enabled
    }

    /// The idle threshold for pinging.
    #[must_use]
    pub fn ping_connections_not_used_for(&self) -> Duration {
        self.shared.inner.lock().config.ping_connections_not_used_for
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.force_close_all();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("status", &self.status()).finish()
    }
}

impl Shared {
    fn next_entry_id(&self) -> u64 {
        self.next_entry_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pop_connection(
        &self,
        username: &str,
        password: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Arc<PoolEntry>, PoolError> {
        let started = Instant::now();
        let mut counted_wait = false;
        let mut local_bad_connection_count = 0usize;

        let mut inner = self.inner.lock();
        loop {
            let candidate = if let Some(entry) = inner.state.idle.pop_front() {
                tracing::debug!(
                    connection_id = entry.physical().id(),
                    "checked out connection from pool"
                );
                entry
            } else if inner.state.active.len() < inner.config.max_active_connections {
                self.open_entry(&inner.config)?
            } else if let Some(entry) = self.claim_overdue(&mut inner) {
                entry
            } else if inner.state.active.len() < inner.config.max_active_connections {
                // A discarded lease was dropped from the ledger.
                continue;
            } else {
                if inner.state.active.is_empty() {
                    return Err(PoolError::Unavailable);
                }
                if !counted_wait {
                    inner.state.had_to_wait_count += 1;
                    counted_wait = true;
                }
                self.wait(&mut inner, cancel)?;
                continue;
            };

            if !probe(&candidate, &inner.config) {
                tracing::debug!(
                    connection_id = candidate.physical().id(),
                    "bad connection returned from pool, getting another connection"
                );
                inner.state.bad_connection_count += 1;
                local_bad_connection_count += 1;
                candidate.invalidate();
                candidate.physical().close_quietly();

                let limit = inner
                    .config
                    .max_idle_connections
                    .saturating_add(inner.config.max_local_bad_connection_tolerance);
                if local_bad_connection_count > limit {
                    tracing::debug!(
                        bad_connections = local_bad_connection_count,
                        "could not get a good connection to the database"
                    );
                    return Err(PoolError::Exhausted {
                        bad_connections: local_bad_connection_count,
                    });
                }
                continue;
            }

            candidate.physical().rollback_quietly();
            let type_code = connection_type_code(&inner.config.url, username, password);
            let entry = Arc::new(candidate.checked_out(type_code));
            inner.state.push_active(Arc::clone(&entry));
            inner.state.record_request(started.elapsed());
            return Ok(entry);
        }
    }

    fn open_entry(&self, config: &PoolConfig) -> Result<PoolEntry, PoolError> {
        let conn = self
            .factory
            .open(&config.url, &config.username, &config.password)
            .map_err(PoolError::ConnectionCreate)?;
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id, "created connection");
        Ok(PoolEntry::new(
            self.next_entry_id(),
            Arc::new(PhysicalConnection::new(connection_id, conn)),
        ))
    }

    /// Take over the oldest lease if it is overdue.
    fn claim_overdue(&self, inner: &mut Inner) -> Option<PoolEntry> {
        let oldest = inner.state.oldest_active()?;
        let longest_checkout_time = oldest.checkout_time();
        if longest_checkout_time <= inner.config.max_checkout_time {
            return None;
        }

        let oldest = inner.state.active.remove(0);
        inner.state.record_overdue_claim(longest_checkout_time);

        // Retire the old handle before touching the connection so its holder
        // cannot run anything on it once we proceed.
        if !oldest.supersede() {
            // Already invalidated by a fatal error: nothing worth handing over.
            oldest.physical().close_quietly();
            return None;
        }
        oldest.physical().rollback_quietly();
        let entry = oldest.successor(self.next_entry_id());
        tracing::debug!(
            connection_id = entry.physical().id(),
            checkout_time = ?longest_checkout_time,
            "claimed overdue connection"
        );
        Some(entry)
    }

    fn wait(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), PoolError> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(PoolError::Interrupted);
        }

        let time_to_wait = inner.config.time_to_wait;
        tracing::debug!(?time_to_wait, "waiting for connection");
        let wait_started = Instant::now();
        self.available.wait_for(inner, time_to_wait);
        inner.state.accumulated_wait_time += wait_started.elapsed();

        if cancel.is_some_and(CancelToken::is_cancelled) {
            // The wakeup may have been meant for a connection release; pass it on.
            self.available.notify_one();
            return Err(PoolError::Interrupted);
        }
        Ok(())
    }

    /// Return a checked-out entry to the pool.
    pub(crate) fn push_connection(&self, entry: &Arc<PoolEntry>) {
        let mut inner = self.inner.lock();
        inner.state.remove_active(entry);

        if !entry.is_valid() {
            tracing::debug!(
                connection_id = entry.physical().id(),
                status = ?entry.status(),
                "a bad connection attempted to return to the pool, discarding connection"
            );
            inner.state.bad_connection_count += 1;
            if entry.status() == EntryStatus::Invalidated {
                entry.physical().close_quietly();
            }
            return;
        }

        inner.state.accumulated_checkout_time += entry.checkout_time();
        let connection_id = entry.physical().id();

        if inner.state.idle.len() < inner.config.max_idle_connections
            && entry.type_code() == inner.expected_type_code
        {
            entry.physical().rollback_quietly();
            let idle = entry.successor(self.next_entry_id());
            entry.supersede();
            inner.state.idle.push_back(idle);
            tracing::debug!(connection_id, "returned connection to pool");
            self.available.notify_one();
        } else {
            entry.invalidate();
            entry.physical().close_quietly();
            tracing::debug!(connection_id, "closed connection");
        }
    }

    fn close_all(inner: &mut Inner) {
        inner.expected_type_code = inner.config.expected_type_code();

        let active = std::mem::take(&mut inner.state.active);
        let idle = std::mem::take(&mut inner.state.idle);
        let count = active.len() + idle.len();

        for entry in active.iter().rev() {
            entry.invalidate();
            entry.physical().close_quietly();
        }
        for entry in idle.iter().rev() {
            entry.invalidate();
            entry.physical().close_quietly();
        }

        tracing::info!(closed = count, "forcefully closed/removed all connections");
    }
}

/// Interrupts acquisitions waiting on a saturated pool.
///
/// Obtained from [`Pool::cancel_token`]. Cancelling wakes every waiter; those
/// waiting with this token return [`PoolError::Interrupted`].
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl CancelToken {
    /// Cancel, waking all waiting acquisitions.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // Take the lock so a waiter between its check and its wait cannot miss
        // the notification.
        let _inner = self.shared.inner.lock();
        self.shared.available.notify_all();
    }

    /// Whether [`cancel`](CancelToken::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .factory(driver)
///     .pool_config(PoolConfig::from_properties(&text)?)
///     .build()?;
/// ```
pub struct PoolBuilder {
    pool_config: PoolConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            factory: None,
        }
    }

    /// Set the connection factory.
    #[must_use]
    pub fn factory(mut self, factory: impl ConnectionFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Set a shared connection factory.
    #[must_use]
    pub fn shared_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.pool_config.url = url.into();
        self
    }

    /// Set the default credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.pool_config = self.pool_config.credentials(username, password);
        self
    }

    /// Set the maximum number of active connections.
    #[must_use]
    pub fn max_active_connections(mut self, count: usize) -> Self {
        self.pool_config.max_active_connections = count;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle_connections(mut self, count: usize) -> Self {
        self.pool_config.max_idle_connections = count;
        self
    }

    /// Set the checkout time after which a connection may be reclaimed.
    #[must_use]
    pub fn max_checkout_time(mut self, time: Duration) -> Self {
        self.pool_config.max_checkout_time = time;
        self
    }

    /// Set how long a waiting caller sleeps before re-examining the pool.
    #[must_use]
    pub fn time_to_wait(mut self, time: Duration) -> Self {
        self.pool_config.time_to_wait = time;
        self
    }

    /// Set the local bad connection tolerance.
    #[must_use]
    pub fn max_local_bad_connection_tolerance(mut self, tolerance: usize) -> Self {
        self.pool_config.max_local_bad_connection_tolerance = tolerance;
        self
    }

    /// Set the ping query and enable pinging.
    #[must_use]
    pub fn ping_query(mut self, query: impl Into<String>) -> Self {
        self.pool_config = self.pool_config.ping_query(query);
        self
    }

    /// Only ping connections idle for at least `threshold`.
    #[must_use]
    pub fn ping_connections_not_used_for(mut self, threshold: Duration) -> Self {
        self.pool_config.ping_connections_not_used_for = threshold;
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool, PoolError> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::Config("a connection factory is required".into()))?;
        Pool::new(self.pool_config, factory)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: usize,
    /// Number of connections currently checked out.
    pub active: usize,
    /// Maximum number of active connections.
    pub max_active: usize,
    /// Maximum number of idle connections.
    pub max_idle: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_active == 0 {
            return 0.0;
        }
        (self.active as f64 / self.max_active as f64) * 100.0
    }

    /// Check if every allowed connection is checked out.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.active >= self.max_active
    }
}

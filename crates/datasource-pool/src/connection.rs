//! Pooled connection handles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use datasource_core::{Connection, DriverError};

use crate::entry::{EntryStatus, PoolEntry};
use crate::pool::Shared;

/// A connection checked out from a [`Pool`](crate::Pool).
///
/// Implements [`Connection`] by forwarding to the physical connection.
/// Every call first checks that this handle still owns the connection: once
/// the pool has reclaimed it, recycled it, or reset itself, calls fail with
/// [`DriverError::Invalidated`]. A fatal driver error invalidates the handle
/// so the connection is discarded rather than recycled.
///
/// [`close`](Connection::close) returns the connection to the pool, as does
/// dropping the handle.
pub struct PooledConnection {
    entry: Arc<PoolEntry>,
    pool: Arc<Shared>,
    released: bool,
}

impl PooledConnection {
    pub(crate) fn new(entry: Arc<PoolEntry>, pool: Arc<Shared>) -> Self {
        Self {
            entry,
            pool,
            released: false,
        }
    }

    /// Pool-assigned identifier of the physical connection, stable across
    /// checkouts.
    #[must_use]
    pub fn real_id(&self) -> u64 {
        self.entry.physical().id()
    }

    /// Whether this handle may still be used.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.released && self.entry.is_valid()
    }

    /// Validity of the underlying pool entry.
    #[must_use]
    pub fn status(&self) -> EntryStatus {
        self.entry.status()
    }

    /// Type code the connection was checked out under.
    #[must_use]
    pub fn type_code(&self) -> u64 {
        self.entry.type_code()
    }

    /// When the physical connection was opened.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.entry.created_at()
    }

    /// Time since the physical connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.entry.age()
    }

    /// Time this handle has been checked out.
    #[must_use]
    pub fn checkout_time(&self) -> Duration {
        self.entry.checkout_time()
    }

    /// Time since the connection was last handed out.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.entry.idle_time()
    }

    fn intercept<T>(
        &self,
        op: impl FnOnce(&mut dyn Connection) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        if self.released {
            return Err(DriverError::Invalidated);
        }

        let mut conn = self.entry.physical().lock();
        // Checked under the connection lock: the pool retires an entry before
        // it touches the connection on the successor's behalf.
        if !self.entry.is_valid() {
            return Err(DriverError::Invalidated);
        }

        let result = op(&mut **conn);
        if let Err(e) = &result {
            if e.is_fatal() && self.entry.invalidate() {
                tracing::warn!(
                    connection_id = self.entry.physical().id(),
                    error = %e,
                    "fatal error on pooled connection, discarding it on return"
                );
            }
        }
        result
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.push_connection(&self.entry);
        }
    }
}

impl Connection for PooledConnection {
    fn is_closed(&self) -> Result<bool, DriverError> {
        self.intercept(|c| c.is_closed())
    }

    /// Return the connection to the pool.
    fn close(&mut self) -> Result<(), DriverError> {
        self.release();
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, DriverError> {
        self.intercept(|c| c.auto_commit())
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.intercept(|c| c.set_auto_commit(enabled))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.intercept(|c| c.commit())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.intercept(|c| c.rollback())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.intercept(|c| c.execute(sql))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        tracing::trace!(
            connection_id = self.entry.physical().id(),
            "returning connection to pool"
        );
        self.release();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("entry", &self.entry)
            .field("released", &self.released)
            .finish()
    }
}

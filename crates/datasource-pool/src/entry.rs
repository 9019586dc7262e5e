//! Pool entries: a physical connection plus its lease metadata.
//!
//! A physical connection outlives the entries that wrap it. Recycling and
//! overdue reclamation move the physical connection into a fresh entry and
//! retire the old one, so a handle still pointing at the old entry is
//! rejected even though the connection itself lives on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use datasource_core::Connection;
use parking_lot::{Mutex, MutexGuard};

/// A physical connection shared between the pool and the entry that owns it.
pub(crate) struct PhysicalConnection {
    id: u64,
    conn: Mutex<Box<dyn Connection>>,
}

impl PhysicalConnection {
    pub(crate) fn new(id: u64, conn: Box<dyn Connection>) -> Self {
        Self {
            id,
            conn: Mutex::new(conn),
        }
    }

    /// Pool-assigned identifier, stable across recycling.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Connection>> {
        self.conn.lock()
    }

    /// Roll back if the connection is not in auto-commit mode. Errors are
    /// logged and swallowed.
    pub(crate) fn rollback_quietly(&self) {
        let mut conn = self.conn.lock();
        match conn.auto_commit() {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = conn.rollback() {
                    tracing::debug!(connection_id = self.id, error = %e, "bad connection, could not roll back");
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = self.id, error = %e, "could not read auto-commit mode");
            }
        }
    }

    /// Roll back and close. Errors are logged and swallowed.
    pub(crate) fn close_quietly(&self) {
        self.rollback_quietly();
        let mut conn = self.conn.lock();
        if matches!(conn.is_closed(), Ok(true)) {
            return;
        }
        if let Err(e) = conn.close() {
            tracing::debug!(connection_id = self.id, error = %e, "error closing connection");
        }
    }
}

/// Validity of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryStatus {
    /// Owned by exactly one logical holder.
    Valid = 0,
    /// The physical connection was moved to a successor entry.
    Superseded = 1,
    /// Discarded; the physical connection is closed or awaiting close.
    Invalidated = 2,
}

impl EntryStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Valid,
            1 => Self::Superseded,
            _ => Self::Invalidated,
        }
    }
}

/// Lease record for one physical connection.
pub(crate) struct PoolEntry {
    id: u64,
    physical: Arc<PhysicalConnection>,
    status: AtomicU8,
    type_code: u64,
    created_at: Instant,
    last_used_at: Instant,
    checkout_at: Instant,
}

impl PoolEntry {
    /// Wrap a freshly opened connection.
    pub(crate) fn new(id: u64, physical: Arc<PhysicalConnection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            physical,
            status: AtomicU8::new(EntryStatus::Valid as u8),
            type_code: 0,
            created_at: now,
            last_used_at: now,
            checkout_at: now,
        }
    }

    /// A new entry for the same physical connection, keeping its creation
    /// and last-use instants. The caller retires `self`.
    pub(crate) fn successor(&self, id: u64) -> Self {
        Self {
            id,
            physical: Arc::clone(&self.physical),
            status: AtomicU8::new(EntryStatus::Valid as u8),
            type_code: self.type_code,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            checkout_at: self.checkout_at,
        }
    }

    /// Stamp the entry for checkout under `type_code`.
    pub(crate) fn checked_out(mut self, type_code: u64) -> Self {
        let now = Instant::now();
        self.type_code = type_code;
        self.checkout_at = now;
        self.last_used_at = now;
        self
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn physical(&self) -> &PhysicalConnection {
        &self.physical
    }

    pub(crate) fn type_code(&self) -> u64 {
        self.type_code
    }

    pub(crate) fn status(&self) -> EntryStatus {
        EntryStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.status() == EntryStatus::Valid
    }

    /// Mark the entry discarded. Returns `false` if it was already retired.
    pub(crate) fn invalidate(&self) -> bool {
        self.retire(EntryStatus::Invalidated)
    }

    /// Mark the entry as handed over to a successor.
    pub(crate) fn supersede(&self) -> bool {
        self.retire(EntryStatus::Superseded)
    }

    fn retire(&self, to: EntryStatus) -> bool {
        self.status
            .compare_exchange(
                EntryStatus::Valid as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the connection was opened.
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last handed out.
    pub(crate) fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Time since checkout.
    pub(crate) fn checkout_time(&self) -> Duration {
        self.checkout_at.elapsed()
    }
}

impl std::fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id)
            .field("connection_id", &self.physical.id)
            .field("status", &self.status())
            .field("type_code", &self.type_code)
            .finish_non_exhaustive()
    }
}

//! Scriptable in-memory driver.
//!
//! [`MockFactory`] opens [`MockConnection`]s and keeps a handle on the state
//! of every connection it has produced, so tests can break connections behind
//! the pool's back and inspect what the pool did to them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use datasource_core::{Connection, ConnectionFactory, DriverError};
use parking_lot::Mutex;

/// Observable state of one mock connection.
#[derive(Debug)]
pub struct MockConnectionState {
    id: usize,
    closed: AtomicBool,
    broken: AtomicBool,
    fail_statements: AtomicBool,
    auto_commit: AtomicBool,
    close_calls: AtomicUsize,
    rollbacks: AtomicUsize,
    commits: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

impl MockConnectionState {
    fn new(id: usize, auto_commit: bool) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            fail_statements: AtomicBool::new(false),
            auto_commit: AtomicBool::new(auto_commit),
            close_calls: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Order in which the factory opened this connection, starting at 0.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether `close` was called.
    pub fn is_physically_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the connection report itself closed without closing it, as a
    /// connection dropped by the server would.
    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Make every statement fail with a transport error.
    pub fn fail_statements(&self, fail: bool) {
        self.fail_statements.store(fail, Ordering::SeqCst);
    }

    /// Number of `close` calls.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of rollbacks.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of commits.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Statements executed so far, ping queries included.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn is_dead(&self) -> bool {
        self.is_physically_closed() || self.broken.load(Ordering::SeqCst)
    }
}

/// A connection backed by [`MockConnectionState`].
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockConnectionState>,
}

impl Connection for MockConnection {
    fn is_closed(&self) -> Result<bool, DriverError> {
        Ok(self.state.is_dead())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, DriverError> {
        Ok(self.state.auto_commit.load(Ordering::SeqCst))
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), DriverError> {
        if self.state.is_dead() {
            return Err(DriverError::Closed);
        }
        self.state.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        if self.state.is_dead() {
            return Err(DriverError::Closed);
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        if self.state.is_dead() {
            return Err(DriverError::Closed);
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        if self.state.is_dead() {
            return Err(DriverError::Closed);
        }
        if self.state.fail_statements.load(Ordering::SeqCst) {
            return Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.state.statements.lock().push(sql.to_string());
        Ok(1)
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    connections: Mutex<Vec<Arc<MockConnectionState>>>,
    refuse: AtomicBool,
    open_broken: AtomicBool,
    manual_commit: AtomicBool,
    credentials: Mutex<Vec<(String, String, String)>>,
}

/// Factory producing [`MockConnection`]s.
///
/// Clones share state, so a test can keep one clone while the pool owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    inner: Arc<FactoryInner>,
}

impl MockFactory {
    /// Create a factory that opens healthy auto-commit connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Open connections that already report themselves closed.
    pub fn open_broken(&self, broken: bool) {
        self.inner.open_broken.store(broken, Ordering::SeqCst);
    }

    /// Open connections with auto-commit disabled.
    pub fn manual_commit(&self, manual: bool) {
        self.inner.manual_commit.store(manual, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    pub fn opened(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Number of opened connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| !c.is_physically_closed())
            .count()
    }

    /// State of the `index`-th opened connection.
    pub fn connection(&self, index: usize) -> Option<Arc<MockConnectionState>> {
        self.inner.connections.lock().get(index).cloned()
    }

    /// State of every opened connection, in opening order.
    pub fn connections(&self) -> Vec<Arc<MockConnectionState>> {
        self.inner.connections.lock().clone()
    }

    /// `(url, username, password)` of every open call, refused ones included.
    pub fn open_calls(&self) -> Vec<(String, String, String)> {
        self.inner.credentials.lock().clone()
    }
}

impl ConnectionFactory for MockFactory {
    fn open(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn Connection>, DriverError> {
        self.inner.credentials.lock().push((
            url.to_string(),
            username.to_string(),
            password.to_string(),
        ));

        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(DriverError::Connect(format!("{url}: connection refused")));
        }

        let mut connections = self.inner.connections.lock();
        let state = Arc::new(MockConnectionState::new(
            connections.len(),
            !self.inner.manual_commit.load(Ordering::SeqCst),
        ));
        if self.inner.open_broken.load(Ordering::SeqCst) {
            state.break_connection();
        }
        connections.push(Arc::clone(&state));
        tracing::trace!(id = state.id, "mock connection opened");

        Ok(Box::new(MockConnection { state }))
    }
}

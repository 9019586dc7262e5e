//! Physical connection and factory traits.

use crate::error::DriverError;

/// A blocking database connection.
///
/// This is the capability surface the pool relies on. The pool's own
/// connection handle implements it as well, so code consuming a connection
/// cannot tell a pooled handle from a direct one.
pub trait Connection: Send {
    /// Whether the connection has been closed, locally or by the server.
    fn is_closed(&self) -> Result<bool, DriverError>;

    /// Close the connection.
    ///
    /// Closing an already closed connection is a no-op.
    fn close(&mut self) -> Result<(), DriverError>;

    /// Whether statements commit automatically.
    fn auto_commit(&self) -> Result<bool, DriverError>;

    /// Enable or disable auto-commit.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), DriverError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), DriverError>;

    /// Execute a SQL statement, returning the number of rows affected or
    /// produced.
    fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;
}

/// Opens physical connections.
///
/// Implementations must be safe to call from many threads; the pool may call
/// [`open`](ConnectionFactory::open) while holding its lock.
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection to `url` with the given credentials.
    fn open(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn Connection>, DriverError>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(&str, &str, &str) -> Result<Box<dyn Connection>, DriverError> + Send + Sync,
{
    fn open(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn Connection>, DriverError> {
        self(url, username, password)
    }
}

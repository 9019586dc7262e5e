//! Driver-level error types.

use thiserror::Error;

/// Errors reported by a physical connection or a connection factory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The connection could not be established.
    #[error("connection refused: {0}")]
    Connect(String),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected a statement.
    #[error("statement failed: {0}")]
    Statement(String),

    /// Transaction control (commit/rollback) failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The handle was invalidated by its pool and must not be used again.
    #[error("connection handle is invalid: it was returned to or reclaimed by the pool")]
    Invalidated,
}

impl DriverError {
    /// Whether the error means the physical connection can no longer be used.
    ///
    /// Statement and transaction errors leave the session usable; transport
    /// failures and closed connections do not.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_) | Self::Timeout)
    }
}

//! Pool error types.

use datasource_core::DriverError;
use thiserror::Error;

/// Errors returned by the pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The factory could not open a new connection.
    #[error("failed to open connection: {0}")]
    ConnectionCreate(#[source] DriverError),

    /// Too many bad connections were encountered by a single acquisition.
    #[error("could not get a good connection to the database after {bad_connections} bad connections")]
    Exhausted {
        /// Bad connections seen by the failing acquisition.
        bad_connections: usize,
    },

    /// The pool produced no connection and had nothing to wait for.
    #[error("unknown severe error condition: the pool returned no connection")]
    Unavailable,

    /// A waiting acquisition was cancelled.
    #[error("connection acquisition was interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Whether the pool failed to produce a usable connection.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Unavailable)
    }
}

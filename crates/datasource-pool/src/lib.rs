//! # datasource-pool
//!
//! A simple, synchronous, thread-safe database connection pool.
//!
//! The pool hands out connections from a bounded set, creating them through a
//! [`ConnectionFactory`](datasource_core::ConnectionFactory) on demand. When
//! every connection is checked out, callers wait; a connection held longer
//! than the configured checkout time is reclaimed for the next caller.
//!
//! ## Features
//!
//! - Bounded active and idle sets with blocking acquisition
//! - Reclamation of overdue leases, oldest first
//! - Liveness probing with an optional ping query
//! - Tolerance for a bounded number of bad connections per acquisition
//! - Drift detection: connections checked out under stale credentials are
//!   closed on return instead of recycled
//! - Statistics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use datasource_pool::{Pool, PoolConfig};
//! use datasource_core::Connection;
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .url("postgres://localhost/app")
//!     .credentials("app", "secret")
//!     .max_active_connections(20)
//!     .max_checkout_time(Duration::from_secs(30))
//!     .ping_query("SELECT 1");
//!
//! let pool = Pool::new(config, Arc::new(driver))?;
//!
//! let mut conn = pool.get_connection()?;
//! conn.execute("DELETE FROM sessions WHERE expired")?;
//! conn.close()?; // back to the pool
//!
//! println!("{}", pool.metrics());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;

mod entry;
mod probe;
mod state;

// Configuration
pub use config::{PoolConfig, connection_type_code};

// Error types
pub use error::PoolError;

// Pool types
pub use connection::PooledConnection;
pub use entry::EntryStatus;
pub use pool::{CancelToken, Pool, PoolBuilder, PoolStatus};
pub use state::PoolMetrics;

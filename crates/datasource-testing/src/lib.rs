//! # datasource-testing
//!
//! Test infrastructure for the pooled data source.
//!
//! Provides a scriptable in-memory driver ([`MockFactory`]) and fixtures for
//! building pools around it. Pool integration tests live in this crate's
//! `tests/` directory so they can depend on both the pool and the mock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use datasource_testing::{mock_pool, test_config};
//!
//! let (pool, factory) = mock_pool(test_config().max_active_connections(1));
//! let conn = pool.get_connection()?;
//! factory.connection(0).unwrap().break_connection();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use datasource_pool::{Pool, PoolConfig, PoolError};

pub use mock::{MockConnection, MockConnectionState, MockFactory};

/// URL used by [`test_config`].
pub const TEST_URL: &str = "mock://localhost/test";

/// Configuration suited to tests: mock URL and credentials, and short waits
/// so blocked acquisitions re-examine the pool quickly.
pub fn test_config() -> PoolConfig {
    PoolConfig::new()
        .url(TEST_URL)
        .credentials("sa", "secret")
        .time_to_wait(Duration::from_millis(50))
}

/// Build a pool around a fresh [`MockFactory`].
pub fn try_mock_pool(config: PoolConfig) -> Result<(Pool, MockFactory), PoolError> {
    init_tracing();
    let factory = MockFactory::new();
    let pool = Pool::new(config, Arc::new(factory.clone()))?;
    Ok((pool, factory))
}

/// Build a pool around a fresh [`MockFactory`].
///
/// # Panics
///
/// Panics if `config` does not validate.
#[allow(clippy::expect_used)]
pub fn mock_pool(config: PoolConfig) -> (Pool, MockFactory) {
    try_mock_pool(config).expect("invalid test pool configuration")
}

/// Install a `tracing` subscriber writing to the test output.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

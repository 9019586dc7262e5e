//! Pool integration tests against the mock driver.
//!
//! These exercise acquisition, release, reclamation, probing, and reset
//! behavior end to end, including the multi-threaded paths.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use datasource_core::{Connection, DriverError};
use datasource_pool::{EntryStatus, PoolError};
use datasource_testing::{TEST_URL, mock_pool, test_config, try_mock_pool};

// =============================================================================
// Reuse and creation
// =============================================================================

#[test]
fn test_idle_connection_is_reused() {
    let (pool, factory) = mock_pool(test_config());

    let conn = pool.get_connection().unwrap();
    let first_id = conn.real_id();
    drop(conn);

    let conn = pool.get_connection().unwrap();
    assert_eq!(conn.real_id(), first_id);
    assert_eq!(factory.opened(), 1);

    let metrics = pool.metrics();
    assert_eq!(metrics.request_count, 2);
    assert_eq!(metrics.active_connections, 1);
    assert_eq!(metrics.idle_connections, 0);
}

#[test]
fn test_creates_until_max_active() {
    let (pool, factory) = mock_pool(test_config().max_active_connections(3));

    let held: Vec<_> = (0..3).map(|_| pool.get_connection().unwrap()).collect();
    assert_eq!(factory.opened(), 3);

    let status = pool.status();
    assert_eq!(status.active, 3);
    assert!(status.is_at_capacity());
    drop(held);

    assert_eq!(pool.status().active, 0);
    assert_eq!(pool.status().idle, 3);
}

#[test]
fn test_new_connections_use_configured_credentials() {
    let (pool, factory) = mock_pool(test_config());

    let _conn = pool.get_connection_as("reporting", "other").unwrap();
    assert_eq!(
        factory.open_calls(),
        vec![(TEST_URL.to_string(), "sa".to_string(), "secret".to_string())]
    );
}

#[test]
fn test_factory_error_is_propagated() {
    let (pool, factory) = mock_pool(test_config());
    factory.refuse_connections(true);

    let err = pool.get_connection().unwrap_err();
    assert!(matches!(
        err,
        PoolError::ConnectionCreate(DriverError::Connect(_))
    ));
    assert_eq!(pool.status().active, 0);

    // The pool stays usable.
    factory.refuse_connections(false);
    assert!(pool.get_connection().is_ok());
}

// =============================================================================
// Release
// =============================================================================

#[test]
fn test_idle_set_is_capped() {
    let (pool, factory) = mock_pool(test_config().max_idle_connections(1));

    let held: Vec<_> = (0..3).map(|_| pool.get_connection().unwrap()).collect();
    drop(held);

    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.active, 0);
    assert_eq!(factory.open_connections(), 1);
    assert_eq!(pool.metrics().bad_connection_count, 0);
}

#[test]
fn test_close_returns_connection_and_invalidates_handle() {
    let (pool, _factory) = mock_pool(test_config());

    let mut conn = pool.get_connection().unwrap();
    conn.execute("SELECT 1").unwrap();
    conn.close().unwrap();

    assert!(!conn.is_valid());
    assert!(matches!(
        conn.execute("SELECT 1"),
        Err(DriverError::Invalidated)
    ));
    assert_eq!(pool.status().idle, 1);

    // Closing twice does not return the connection twice.
    conn.close().unwrap();
    drop(conn);
    assert_eq!(pool.status().idle, 1);
    assert_eq!(pool.metrics().bad_connection_count, 0);
}

#[test]
fn test_transaction_rolled_back_on_checkout_and_return() {
    let (pool, factory) = mock_pool(test_config());
    factory.manual_commit(true);

    let conn = pool.get_connection().unwrap();
    let state = factory.connection(0).unwrap();
    assert_eq!(state.rollbacks(), 1);

    drop(conn);
    assert_eq!(state.rollbacks(), 2);
    assert_eq!(pool.status().idle, 1);
}

#[test]
fn test_stale_type_code_is_retired_not_recycled() {
    let (pool, factory) = mock_pool(test_config());

    let conn = pool.get_connection_as("reporting", "other").unwrap();
    drop(conn);

    assert_eq!(pool.status().idle, 0);
    assert!(factory.connection(0).unwrap().is_physically_closed());
    assert_eq!(pool.metrics().bad_connection_count, 0);
}

#[test]
fn test_setter_retires_borrowed_connection() {
    let (pool, factory) = mock_pool(test_config());

    let idle = pool.get_connection().unwrap();
    let borrowed = pool.get_connection().unwrap();
    drop(idle);
    assert_eq!(pool.status().idle, 1);

    pool.set_max_idle_connections(3).unwrap();
    assert_eq!(pool.max_idle_connections(), 3);
    assert_eq!(pool.status().idle, 0);

    drop(borrowed);
    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.active, 0);
    assert_eq!(factory.open_connections(), 0);
}

#[test]
fn test_credentials_change_drains_pool() {
    let (pool, factory) = mock_pool(test_config());

    drop(pool.get_connection().unwrap());
    pool.set_password("rotated").unwrap();
    assert_eq!(factory.open_connections(), 0);

    drop(pool.get_connection().unwrap());
    let calls = factory.open_calls();
    assert_eq!(calls.last().unwrap().2, "rotated");
    assert_eq!(pool.status().idle, 1);
}

// =============================================================================
// Overdue reclamation
// =============================================================================

#[test]
fn test_overdue_connection_is_claimed() {
    let (pool, factory) = mock_pool(
        test_config()
            .max_active_connections(1)
            .max_checkout_time(Duration::ZERO),
    );

    let mut first = pool.get_connection().unwrap();
    thread::sleep(Duration::from_millis(5));
    let mut second = pool.get_connection().unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.claimed_overdue_connection_count, 1);
    assert_eq!(metrics.had_to_wait_count, 0);
    assert!(metrics.accumulated_checkout_time_of_overdue_connections > Duration::ZERO);
    assert_eq!(factory.opened(), 1);

    assert_eq!(second.real_id(), first.real_id());
    assert_eq!(first.status(), EntryStatus::Superseded);
    assert!(matches!(
        first.execute("UPDATE t SET x = 1"),
        Err(DriverError::Invalidated)
    ));
    assert!(second.execute("UPDATE t SET x = 2").is_ok());

    // The former holder returning its handle counts as a bad connection and
    // leaves the new holder untouched.
    first.close().unwrap();
    assert_eq!(pool.metrics().bad_connection_count, 1);
    assert!(second.is_valid());
    assert_eq!(pool.status().active, 1);
    assert!(!factory.connection(0).unwrap().is_physically_closed());
}

#[test]
fn test_only_oldest_lease_is_claimed() {
    let (pool, _factory) = mock_pool(
        test_config()
            .max_active_connections(2)
            .max_checkout_time(Duration::from_millis(100)),
    );

    let oldest = pool.get_connection().unwrap();
    thread::sleep(Duration::from_millis(150));
    let younger = pool.get_connection().unwrap();

    let claimed = pool.get_connection().unwrap();
    assert_eq!(claimed.real_id(), oldest.real_id());
    assert!(!oldest.is_valid());
    assert!(younger.is_valid());
    assert_eq!(pool.metrics().claimed_overdue_connection_count, 1);
}

#[test]
fn test_broken_overdue_lease_is_replaced_not_handed_over() {
    let (pool, factory) = mock_pool(
        test_config()
            .max_active_connections(1)
            .max_checkout_time(Duration::ZERO),
    );

    let mut broken = pool.get_connection().unwrap();
    factory.connection(0).unwrap().fail_statements(true);
    assert!(broken.execute("SELECT 1").is_err());
    assert_eq!(broken.status(), EntryStatus::Invalidated);

    let fresh = pool.get_connection().unwrap();
    assert_ne!(fresh.real_id(), broken.real_id());
    assert_eq!(factory.opened(), 2);
    assert!(factory.connection(0).unwrap().is_physically_closed());

    drop(broken);
    assert!(fresh.is_valid());
    assert_eq!(pool.status().active, 1);
    assert!(!factory.connection(1).unwrap().is_physically_closed());
}

// =============================================================================
// Waiting
// =============================================================================

#[test]
fn test_second_caller_waits_for_release() {
    let (pool, _factory) = mock_pool(test_config().max_active_connections(1));
    let pool = Arc::new(pool);

    let held = pool.get_connection().unwrap();
    let held_id = held.real_id();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let conn = pool.get_connection().unwrap();
            tx.send(conn.real_id()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(pool.status().active, 1);

    drop(held);
    let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received, held_id);
    waiter.join().unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.had_to_wait_count, 1);
    assert!(metrics.accumulated_wait_time > Duration::ZERO);
    assert_eq!(metrics.claimed_overdue_connection_count, 0);
}

#[test]
fn test_release_wakes_waiter_before_timeout() {
    let (pool, _factory) = mock_pool(
        test_config()
            .max_active_connections(1)
            .time_to_wait(Duration::from_secs(30)),
    );
    let pool = Arc::new(pool);
    let held = pool.get_connection().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let result = pool.get_connection().map(|c| c.real_id());
            tx.send(result.is_ok()).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(100));
    drop(held);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();
}

#[test]
fn test_waiting_acquisition_can_be_interrupted() {
    let (pool, _factory) = mock_pool(
        test_config()
            .max_active_connections(1)
            .time_to_wait(Duration::from_secs(30)),
    );
    let pool = Arc::new(pool);
    let _held = pool.get_connection().unwrap();
    let token = pool.cancel_token();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = Arc::clone(&pool);
        let token = token.clone();
        thread::spawn(move || {
            let result = pool.get_connection_interruptible(&token);
            tx.send(matches!(result, Err(PoolError::Interrupted))).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(100));
    token.cancel();
    assert!(token.is_cancelled());
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    waiter.join().unwrap();

    assert_eq!(pool.status().active, 1);
}

// =============================================================================
// Bad connections and probing
// =============================================================================

#[test]
fn test_closed_connection_is_never_returned() {
    let (pool, factory) = mock_pool(test_config());

    drop(pool.get_connection().unwrap());
    let broken = factory.connection(0).unwrap();
    broken.break_connection();

    let conn = pool.get_connection().unwrap();
    assert_ne!(conn.real_id(), 1);
    assert_eq!(factory.opened(), 2);
    assert!(pool.metrics().bad_connection_count >= 1);
}

#[test]
fn test_bad_connection_tolerance_is_max_idle_plus_tolerance() {
    let (pool, factory) = mock_pool(
        test_config()
            .max_idle_connections(2)
            .max_local_bad_connection_tolerance(1),
    );
    factory.open_broken(true);

    let err = pool.get_connection().unwrap_err();
    assert!(err.is_exhausted());
    assert!(matches!(err, PoolError::Exhausted { bad_connections: 4 }));

    assert_eq!(factory.opened(), 4);
    let status = pool.status();
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(pool.metrics().bad_connection_count, 4);
}

#[test]
fn test_ping_query_runs_when_enabled() {
    let (pool, factory) = mock_pool(test_config().ping_query("SELECT 1"));

    let _conn = pool.get_connection().unwrap();
    assert_eq!(factory.connection(0).unwrap().statements(), vec!["SELECT 1"]);
}

#[test]
fn test_ping_rolls_back_manual_commit_connection() {
    let (pool, factory) = mock_pool(test_config().ping_query("SELECT 1"));
    factory.manual_commit(true);

    let _conn = pool.get_connection().unwrap();
    let state = factory.connection(0).unwrap();
    assert_eq!(state.statements(), vec!["SELECT 1"]);
    // One rollback after the ping, one before handing the connection out.
    assert_eq!(state.rollbacks(), 2);
}

#[test]
fn test_ping_skipped_for_recently_used_connection() {
    let (pool, factory) = mock_pool(
        test_config()
            .ping_query("SELECT 1")
            .ping_connections_not_used_for(Duration::from_secs(3600)),
    );

    drop(pool.get_connection().unwrap());
    let _conn = pool.get_connection().unwrap();
    assert!(factory.connection(0).unwrap().statements().is_empty());
}

#[test]
fn test_failed_ping_discards_connection() {
    let (pool, factory) = mock_pool(test_config().ping_query("SELECT 1"));

    drop(pool.get_connection().unwrap());
    let first = factory.connection(0).unwrap();
    first.fail_statements(true);

    let conn = pool.get_connection().unwrap();
    assert!(first.is_physically_closed());
    assert_eq!(factory.opened(), 2);
    assert_eq!(pool.metrics().bad_connection_count, 1);
    assert!(conn.is_valid());
}

#[test]
fn test_fatal_error_invalidates_handle() {
    let (pool, factory) = mock_pool(test_config());

    let mut conn = pool.get_connection().unwrap();
    let state = factory.connection(0).unwrap();
    state.fail_statements(true);

    let err = conn.execute("SELECT * FROM t").unwrap_err();
    assert!(err.is_fatal());
    assert!(!conn.is_valid());
    assert!(matches!(
        conn.execute("SELECT * FROM t"),
        Err(DriverError::Invalidated)
    ));

    drop(conn);
    assert!(state.is_physically_closed());
    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.metrics().bad_connection_count, 1);
}

// =============================================================================
// Reset
// =============================================================================

#[test]
fn test_force_close_all_closes_everything() {
    let (pool, factory) = mock_pool(test_config());
    factory.manual_commit(true);

    let mut borrowed = pool.get_connection().unwrap();
    drop(pool.get_connection().unwrap());
    assert_eq!(pool.status().idle, 1);

    pool.force_close_all();

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.active, 0);
    for state in factory.connections() {
        assert!(state.is_physically_closed());
    }

    assert!(!borrowed.is_valid());
    assert_eq!(borrowed.status(), EntryStatus::Invalidated);
    assert!(matches!(
        borrowed.execute("SELECT 1"),
        Err(DriverError::Invalidated)
    ));

    borrowed.close().unwrap();
    assert_eq!(pool.metrics().bad_connection_count, 1);
    assert_eq!(pool.status().active, 0);

    // Subsequent acquisitions open fresh connections.
    let conn = pool.get_connection().unwrap();
    assert!(conn.is_valid());
    assert_eq!(factory.opened(), 3);
}

#[test]
fn test_dropping_pool_closes_connections() {
    let (pool, factory) = mock_pool(test_config());

    let held = pool.get_connection().unwrap();
    drop(pool.get_connection().unwrap());
    drop(pool);

    assert_eq!(factory.open_connections(), 0);
    assert!(!held.is_valid());
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let err = try_mock_pool(test_config().max_active_connections(0)).unwrap_err();
    assert!(matches!(err, PoolError::Config(_)));
}

#[test]
fn test_overflowing_bad_connection_limit_is_rejected() {
    let err = try_mock_pool(
        test_config()
            .max_idle_connections(usize::MAX)
            .max_local_bad_connection_tolerance(1),
    )
    .unwrap_err();
    assert!(matches!(err, PoolError::Config(_)));

    let (pool, factory) = mock_pool(test_config().max_local_bad_connection_tolerance(1));
    assert!(pool.set_max_idle_connections(usize::MAX).is_err());
    assert_eq!(pool.max_idle_connections(), 5);

    // The threshold still applies with the rejected value left out.
    factory.open_broken(true);
    let err = pool.get_connection().unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { bad_connections: 7 }));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_checkouts_respect_max_active() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 50;

    let (pool, factory) = mock_pool(
        test_config()
            .max_active_connections(3)
            .max_idle_connections(2)
            .time_to_wait(Duration::from_millis(5)),
    );
    let pool = Arc::new(pool);
    let done = Arc::new(AtomicBool::new(false));

    let observer = {
        let pool = Arc::clone(&pool);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut max_seen = 0;
            while !done.load(Ordering::SeqCst) {
                let status = pool.status();
                assert!(status.active <= 3);
                assert!(status.idle <= 2);
                max_seen = max_seen.max(status.active);
                thread::yield_now();
            }
            max_seen
        })
    };

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    let mut conn = pool.get_connection().unwrap();
                    conn.execute("UPDATE counters SET n = n + 1").unwrap();
                    thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let max_seen = observer.join().unwrap();
    assert!(max_seen <= 3);

    let metrics = pool.metrics();
    assert_eq!(metrics.request_count, (THREADS * ITERATIONS) as u64);
    assert_eq!(metrics.active_connections, 0);
    assert!(metrics.idle_connections <= 2);
    assert_eq!(metrics.claimed_overdue_connection_count, 0);
    assert_eq!(factory.open_connections(), metrics.idle_connections);
}

#[test]
fn test_metrics_report() {
    let (pool, _factory) = mock_pool(test_config());
    drop(pool.get_connection().unwrap());

    let report = pool.metrics().to_string();
    assert!(report.contains(&format!("url                         {TEST_URL}")));
    assert!(report.contains("password                    ************"));
    assert!(!report.contains("secret"));
    assert!(report.contains("request count               1"));
    assert!(report.contains("idle connections            1"));
}

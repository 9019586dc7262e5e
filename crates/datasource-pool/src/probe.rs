//! Liveness probing of candidate connections.

use crate::config::PoolConfig;
use crate::entry::PoolEntry;

/// Check whether `entry` is still usable.
///
/// A connection that reports itself closed is dead. Otherwise, when pinging
/// is enabled and the connection has been unused for at least the configured
/// threshold, the ping query decides; a failed ping closes the connection.
pub(crate) fn probe(entry: &PoolEntry, config: &PoolConfig) -> bool {
    let physical = entry.physical();
    let connection_id = physical.id();
    let mut conn = physical.lock();

    match conn.is_closed() {
        Ok(false) => {}
        Ok(true) => {
            tracing::debug!(connection_id, "connection is closed");
            return false;
        }
        Err(e) => {
            tracing::debug!(connection_id, error = %e, "connection is BAD");
            return false;
        }
    }

    if !config.ping_enabled || entry.idle_time() < config.ping_connections_not_used_for {
        return true;
    }

    tracing::debug!(connection_id, "testing connection");
    let result = conn.execute(&config.ping_query).and_then(|_| {
        if !conn.auto_commit()? {
            conn.rollback()?;
        }
        Ok(())
    });

    match result {
        Ok(()) => {
            tracing::debug!(connection_id, "connection is GOOD");
            true
        }
        Err(e) => {
            tracing::warn!(
                connection_id,
                query = %config.ping_query,
                error = %e,
                "execution of ping query failed"
            );
            if let Err(e) = conn.close() {
                tracing::debug!(connection_id, error = %e, "error closing connection after failed ping");
            }
            false
        }
    }
}

//! Shared pool ledger: idle and active entries plus running statistics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::entry::PoolEntry;

/// Idle and active entries and the counters accumulated while serving
/// requests. Only ever touched under the pool lock.
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// Entries ready for reuse, oldest release first.
    pub(crate) idle: VecDeque<PoolEntry>,
    /// Checked-out entries in ascending checkout order.
    pub(crate) active: Vec<Arc<PoolEntry>>,

    pub(crate) request_count: u64,
    pub(crate) accumulated_request_time: Duration,
    pub(crate) accumulated_checkout_time: Duration,
    pub(crate) claimed_overdue_connection_count: u64,
    pub(crate) accumulated_checkout_time_of_overdue_connections: Duration,
    pub(crate) accumulated_wait_time: Duration,
    pub(crate) had_to_wait_count: u64,
    pub(crate) bad_connection_count: u64,
}

impl PoolState {
    /// Remove an entry from the active set. Returns `false` if it was not
    /// there.
    pub(crate) fn remove_active(&mut self, entry: &PoolEntry) -> bool {
        match self.active.iter().position(|e| e.id() == entry.id()) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }

    /// The entry with the longest outstanding lease.
    pub(crate) fn oldest_active(&self) -> Option<&Arc<PoolEntry>> {
        self.active.first()
    }

    pub(crate) fn push_active(&mut self, entry: Arc<PoolEntry>) {
        debug_assert!(
            !self.active.iter().any(|e| e.id() == entry.id()),
            "entry checked out twice"
        );
        self.active.push(entry);
    }

    pub(crate) fn record_overdue_claim(&mut self, checkout_time: Duration) {
        self.claimed_overdue_connection_count += 1;
        self.accumulated_checkout_time_of_overdue_connections += checkout_time;
        self.accumulated_checkout_time += checkout_time;
    }

    pub(crate) fn record_request(&mut self, request_time: Duration) {
        self.request_count += 1;
        self.accumulated_request_time += request_time;
    }

    pub(crate) fn metrics(&self, config: PoolConfig, uptime: Duration) -> PoolMetrics {
        PoolMetrics {
            config,
            active_connections: self.active.len(),
            idle_connections: self.idle.len(),
            request_count: self.request_count,
            accumulated_request_time: self.accumulated_request_time,
            accumulated_checkout_time: self.accumulated_checkout_time,
            accumulated_wait_time: self.accumulated_wait_time,
            accumulated_checkout_time_of_overdue_connections: self
                .accumulated_checkout_time_of_overdue_connections,
            had_to_wait_count: self.had_to_wait_count,
            bad_connection_count: self.bad_connection_count,
            claimed_overdue_connection_count: self.claimed_overdue_connection_count,
            uptime,
        }
    }
}

/// Statistics snapshot of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Configuration in effect at the time of the snapshot.
    pub config: PoolConfig,
    /// Connections checked out at the time of the snapshot.
    pub active_connections: usize,
    /// Connections idle at the time of the snapshot.
    pub idle_connections: usize,
    /// Successful acquisitions.
    pub request_count: u64,
    /// Total time spent in successful acquisitions.
    pub accumulated_request_time: Duration,
    /// Total lease time of returned or reclaimed connections.
    pub accumulated_checkout_time: Duration,
    /// Total time callers spent blocked waiting.
    pub accumulated_wait_time: Duration,
    /// Total lease time of reclaimed overdue connections.
    pub accumulated_checkout_time_of_overdue_connections: Duration,
    /// Acquisitions that had to wait at least once.
    pub had_to_wait_count: u64,
    /// Connections found dead or returned after being invalidated.
    pub bad_connection_count: u64,
    /// Overdue connections reclaimed from their holders.
    pub claimed_overdue_connection_count: u64,
    /// Time since the pool was created.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Mean time per successful acquisition.
    #[must_use]
    pub fn average_request_time(&self) -> Duration {
        average(self.accumulated_request_time, self.request_count)
    }

    /// Mean time per acquisition that had to wait.
    #[must_use]
    pub fn average_wait_time(&self) -> Duration {
        average(self.accumulated_wait_time, self.had_to_wait_count)
    }

    /// Mean lease duration per request.
    #[must_use]
    pub fn average_checkout_time(&self) -> Duration {
        average(self.accumulated_checkout_time, self.request_count)
    }

    /// Mean lease duration of reclaimed overdue connections.
    #[must_use]
    pub fn average_overdue_checkout_time(&self) -> Duration {
        average(
            self.accumulated_checkout_time_of_overdue_connections,
            self.claimed_overdue_connection_count,
        )
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

impl fmt::Display for PoolMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = &self.config;
        let password = if config.password.is_empty() { "NULL" } else { "************" };
        writeln!(f, "===CONFIGURATION==============================================")?;
        writeln!(f, " url                         {}", config.url)?;
        writeln!(f, " username                    {}", config.username)?;
        writeln!(f, " password                    {password}")?;
        writeln!(f, " max active connections      {}", config.max_active_connections)?;
        writeln!(f, " max idle connections        {}", config.max_idle_connections)?;
        writeln!(f, " max checkout time           {:?}", config.max_checkout_time)?;
        writeln!(f, " time to wait                {:?}", config.time_to_wait)?;
        writeln!(f, " ping enabled                {}", config.ping_enabled)?;
        writeln!(f, " ping query                  {}", config.ping_query)?;
        writeln!(f, " ping not used for           {:?}", config.ping_connections_not_used_for)?;
        writeln!(f, "===STATUS=====================================================")?;
        writeln!(f, " active connections          {}", self.active_connections)?;
        writeln!(f, " idle connections            {}", self.idle_connections)?;
        writeln!(f, "===STATISTICS=================================================")?;
        writeln!(f, " request count               {}", self.request_count)?;
        writeln!(f, " average request time        {:?}", self.average_request_time())?;
        writeln!(f, " average checkout time       {:?}", self.average_checkout_time())?;
        writeln!(f, " claimed overdue             {}", self.claimed_overdue_connection_count)?;
        writeln!(f, " average overdue checkout    {:?}", self.average_overdue_checkout_time())?;
        writeln!(f, " had to wait                 {}", self.had_to_wait_count)?;
        writeln!(f, " average wait time           {:?}", self.average_wait_time())?;
        writeln!(f, " bad connections             {}", self.bad_connection_count)?;
        write!(f, " uptime                      {:?}", self.uptime)
    }
}

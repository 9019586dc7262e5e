//! Pool configuration.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::error::PoolError;

/// Ping query used until one is configured.
pub const DEFAULT_PING_QUERY: &str = "NO PING QUERY SET";

/// Configuration for a pooled data source.
#[derive(Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connection URL handed to the factory.
    pub url: String,

    /// Default username.
    pub username: String,

    /// Default password.
    pub password: String,

    /// Maximum number of connections checked out at the same time.
    pub max_active_connections: usize,

    /// Maximum number of idle connections kept for reuse.
    pub max_idle_connections: usize,

    /// How long a connection may stay checked out before another caller may
    /// reclaim it.
    pub max_checkout_time: Duration,

    /// How long a caller waits before re-examining the pool.
    pub time_to_wait: Duration,

    /// Extra bad connections one acquisition tolerates on top of
    /// `max_idle_connections` before giving up.
    pub max_local_bad_connection_tolerance: usize,

    /// Query sent to check that a connection is alive.
    pub ping_query: String,

    /// Whether the ping query is used.
    pub ping_enabled: bool,

    /// Only ping connections that have not been used for at least this long.
    pub ping_connections_not_used_for: Duration,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("max_active_connections", &self.max_active_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("max_checkout_time", &self.max_checkout_time)
            .field("time_to_wait", &self.time_to_wait)
            .field(
                "max_local_bad_connection_tolerance",
                &self.max_local_bad_connection_tolerance,
            )
            .field("ping_query", &self.ping_query)
            .field("ping_enabled", &self.ping_enabled)
            .field("ping_connections_not_used_for", &self.ping_connections_not_used_for)
            .finish()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            max_active_connections: 10,
            max_idle_connections: 5,
            max_checkout_time: Duration::from_secs(20),
            time_to_wait: Duration::from_secs(20),
            max_local_bad_connection_tolerance: 3,
            ping_query: DEFAULT_PING_QUERY.to_string(),
            ping_enabled: false,
            ping_connections_not_used_for: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a properties document into configuration.
    ///
    /// One `key=value` pair per line; blank lines and lines starting with `#`
    /// or `!` are skipped. Durations are in milliseconds:
    ///
    /// ```text
    /// url=postgres://localhost/app
    /// username=app
    /// password=secret
    /// poolMaximumActiveConnections=20
    /// poolPingEnabled=true
    /// poolPingQuery=SELECT 1
    /// ```
    pub fn from_properties(text: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| PoolError::Config(format!("invalid key-value: {line}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "url" => config.url = value.to_string(),
                "username" | "user" => config.username = value.to_string(),
                "password" => config.password = value.to_string(),
                "poolmaximumactiveconnections" | "max_active_connections" => {
                    config.max_active_connections = parse_count(&key, value)?;
                }
                "poolmaximumidleconnections" | "max_idle_connections" => {
                    config.max_idle_connections = parse_count(&key, value)?;
                }
                "poolmaximumcheckouttime" | "max_checkout_time_ms" => {
                    config.max_checkout_time = parse_millis(&key, value)?;
                }
                "pooltimetowait" | "time_to_wait_ms" => {
                    config.time_to_wait = parse_millis(&key, value)?;
                }
                "poolmaximumlocalbadconnectiontolerance"
                | "max_local_bad_connection_tolerance" => {
                    config.max_local_bad_connection_tolerance = parse_count(&key, value)?;
                }
                "poolpingquery" | "ping_query" => config.ping_query = value.to_string(),
                "poolpingenabled" | "ping_enabled" => {
                    config.ping_enabled = value.eq_ignore_ascii_case("true")
                        || value.eq_ignore_ascii_case("yes")
                        || value == "1";
                }
                "poolpingconnectionsnotusedfor" | "ping_connections_not_used_for_ms" => {
                    config.ping_connections_not_used_for = parse_millis(&key, value)?;
                }
                _ => {
                    tracing::debug!(key = key, "ignoring unknown pool property");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration describes a usable pool.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_active_connections == 0 {
            return Err(PoolError::Config(
                "max_active_connections must be greater than 0".into(),
            ));
        }
        if self
            .max_idle_connections
            .checked_add(self.max_local_bad_connection_tolerance)
            .is_none()
        {
            return Err(PoolError::Config(
                "max_idle_connections plus max_local_bad_connection_tolerance overflows".into(),
            ));
        }
        if self.ping_enabled && self.ping_query.trim().is_empty() {
            return Err(PoolError::Config(
                "ping_query must not be empty when pinging is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Type code of connections opened with the configured credentials.
    #[must_use]
    pub fn expected_type_code(&self) -> u64 {
        connection_type_code(&self.url, &self.username, &self.password)
    }

    /// Set the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the default credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the maximum number of active connections.
    #[must_use]
    pub fn max_active_connections(mut self, count: usize) -> Self {
        self.max_active_connections = count;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle_connections(mut self, count: usize) -> Self {
        self.max_idle_connections = count;
        self
    }

    /// Set the checkout time after which a connection may be reclaimed.
    #[must_use]
    pub fn max_checkout_time(mut self, time: Duration) -> Self {
        self.max_checkout_time = time;
        self
    }

    /// Set how long a waiting caller sleeps before re-examining the pool.
    #[must_use]
    pub fn time_to_wait(mut self, time: Duration) -> Self {
        self.time_to_wait = time;
        self
    }

    /// Set the local bad connection tolerance.
    #[must_use]
    pub fn max_local_bad_connection_tolerance(mut self, tolerance: usize) -> Self {
        self.max_local_bad_connection_tolerance = tolerance;
        self
    }

    /// Set the ping query and enable pinging.
    #[must_use]
    pub fn ping_query(mut self, query: impl Into<String>) -> Self {
        self.ping_query = query.into();
        self.ping_enabled = true;
        self
    }

    /// Enable or disable the ping query.
    #[must_use]
    pub fn ping_enabled(mut self, enabled: bool) -> Self {
        self.ping_enabled = enabled;
        self
    }

    /// Only ping connections idle for at least `threshold`.
    #[must_use]
    pub fn ping_connections_not_used_for(mut self, threshold: Duration) -> Self {
        self.ping_connections_not_used_for = threshold;
        self
    }
}

/// Hash of URL and credentials identifying the configuration a connection
/// was checked out under.
#[must_use]
pub fn connection_type_code(url: &str, username: &str, password: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    username.hash(&mut hasher);
    password.hash(&mut hasher);
    hasher.finish()
}

fn parse_count(key: &str, value: &str) -> Result<usize, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Config(format!("invalid {key}: {value}")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, PoolError> {
    value
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| PoolError::Config(format!("invalid {key}: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_active_connections, 10);
        assert_eq!(config.max_idle_connections, 5);
        assert_eq!(config.max_checkout_time, Duration::from_secs(20));
        assert_eq!(config.time_to_wait, Duration::from_secs(20));
        assert_eq!(config.max_local_bad_connection_tolerance, 3);
        assert_eq!(config.ping_query, DEFAULT_PING_QUERY);
        assert!(!config.ping_enabled);
        assert_eq!(config.ping_connections_not_used_for, Duration::ZERO);
    }

    #[test]
    fn test_properties_parsing() {
        let config = PoolConfig::from_properties(
            "# pool settings\n\
             url=mem://test\n\
             username=sa\n\
             password=secret\n\
             poolMaximumActiveConnections=20\n\
             poolMaximumIdleConnections=4\n\
             poolMaximumCheckoutTime=1500\n\
             poolTimeToWait=250\n\
             poolPingEnabled=true\n\
             poolPingQuery=SELECT 1\n\
             poolPingConnectionsNotUsedFor=60000\n",
        )
        .unwrap();

        assert_eq!(config.url, "mem://test");
        assert_eq!(config.username, "sa");
        assert_eq!(config.password, "secret");
        assert_eq!(config.max_active_connections, 20);
        assert_eq!(config.max_idle_connections, 4);
        assert_eq!(config.max_checkout_time, Duration::from_millis(1500));
        assert_eq!(config.time_to_wait, Duration::from_millis(250));
        assert!(config.ping_enabled);
        assert_eq!(config.ping_query, "SELECT 1");
        assert_eq!(config.ping_connections_not_used_for, Duration::from_secs(60));
    }

    #[test]
    fn test_properties_snake_case_aliases() {
        let config =
            PoolConfig::from_properties("max_active_connections = 3\nmax_idle_connections=1")
                .unwrap();
        assert_eq!(config.max_active_connections, 3);
        assert_eq!(config.max_idle_connections, 1);
    }

    #[test]
    fn test_properties_rejects_bad_values() {
        assert!(PoolConfig::from_properties("poolMaximumActiveConnections=many").is_err());
        assert!(PoolConfig::from_properties("no separator here").is_err());
        assert!(PoolConfig::from_properties("poolMaximumActiveConnections=0").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::new().validate().is_ok());
        assert!(PoolConfig::new().max_active_connections(0).validate().is_err());
        assert!(PoolConfig::new().ping_query("  ").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_bad_connection_limit() {
        let config = PoolConfig::new()
            .max_idle_connections(usize::MAX)
            .max_local_bad_connection_tolerance(1);
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));

        let at_limit = PoolConfig::new()
            .max_idle_connections(usize::MAX - 1)
            .max_local_bad_connection_tolerance(1);
        assert!(at_limit.validate().is_ok());

        let parsed = PoolConfig::from_properties(&format!(
            "poolMaximumIdleConnections={}\npoolMaximumLocalBadConnectionTolerance=3",
            usize::MAX
        ));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = PoolConfig::new().credentials("sa", "hunter2");
        let debug = format!("{config:?}");
        assert!(debug.contains("\"sa\""));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_type_code_tracks_credentials() {
        let a = connection_type_code("mem://db", "sa", "one");
        let b = connection_type_code("mem://db", "sa", "one");
        let c = connection_type_code("mem://db", "sa", "two");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let config = PoolConfig::new().url("mem://db").credentials("sa", "one");
        assert_eq!(config.expected_type_code(), a);
    }
}

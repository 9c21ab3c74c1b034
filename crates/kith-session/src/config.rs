//! Session configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Shortest profile flush interval; a zero period cannot drive a ticker.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Tunables for every pipeline in a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Followed identities materialised per connection list.
    pub max_connections: usize,

    /// Profile updates accumulated before a flush.
    pub profile_batch_size: usize,

    /// Longest a profile update waits before being flushed.
    pub profile_flush_interval: Duration,

    /// Wait for a connection list.
    pub connection_timeout: Duration,

    /// Wait for a single profile, and for a profile stream to drain.
    pub profile_timeout: Duration,

    /// Wait for a notes fetch.
    pub notes_timeout: Duration,

    /// Notes kept per identity, newest first.
    pub notes_limit: usize,

    /// Wait for the trust scorer.
    pub trust_timeout: Duration,

    /// Trust scores for an identity are not re-fetched within this window.
    pub trust_refresh_window: Duration,

    /// Age after which persisted trust scores are ignored.
    pub trust_cache_ttl: Duration,

    /// JSON file backing the trust cache. In-memory when unset.
    pub trust_cache_path: Option<PathBuf>,

    /// Capacity of the graph event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: 50,
            profile_batch_size: 10,
            profile_flush_interval: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(5),
            profile_timeout: Duration::from_secs(8),
            notes_timeout: Duration::from_secs(10),
            notes_limit: 20,
            trust_timeout: Duration::from_secs(15),
            trust_refresh_window: Duration::from_secs(5 * 60),
            trust_cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            trust_cache_path: None,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_parse("KITH_MAX_CONNECTIONS", defaults.max_connections),
            profile_batch_size: env_parse("KITH_PROFILE_BATCH_SIZE", defaults.profile_batch_size)
                .max(1),
            profile_flush_interval: env_millis("KITH_PROFILE_FLUSH_MS", defaults.profile_flush_interval)
                .max(MIN_FLUSH_INTERVAL),
            connection_timeout: env_millis("KITH_CONNECTION_TIMEOUT_MS", defaults.connection_timeout),
            profile_timeout: env_millis("KITH_PROFILE_TIMEOUT_MS", defaults.profile_timeout),
            notes_timeout: env_millis("KITH_NOTES_TIMEOUT_MS", defaults.notes_timeout),
            notes_limit: env_parse("KITH_NOTES_LIMIT", defaults.notes_limit),
            trust_timeout: env_millis("KITH_TRUST_TIMEOUT_MS", defaults.trust_timeout),
            trust_cache_path: std::env::var("KITH_TRUST_CACHE").ok().map(PathBuf::from),
            ..defaults
        }
    }

    /// Short timeouts and windows, for tests and local fixtures.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            profile_flush_interval: Duration::from_millis(20),
            connection_timeout: Duration::from_millis(500),
            profile_timeout: Duration::from_millis(500),
            notes_timeout: Duration::from_millis(500),
            trust_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_profile_batching(mut self, batch_size: usize, flush_interval: Duration) -> Self {
        self.profile_batch_size = batch_size.max(1);
        self.profile_flush_interval = flush_interval.max(MIN_FLUSH_INTERVAL);
        self
    }

    #[must_use]
    pub fn with_notes_limit(mut self, limit: usize) -> Self {
        self.notes_limit = limit;
        self
    }

    #[must_use]
    pub fn with_trust_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_cache_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_trust_refresh_window(mut self, window: Duration) -> Self {
        self.trust_refresh_window = window;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self.profile_timeout = timeout;
        self.notes_timeout = timeout;
        self.trust_timeout = timeout;
        self
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, "Ignoring unparseable config value");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(env_parse(name, millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_values() {
        let config = SessionConfig::default();
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.profile_batch_size, 10);
        assert_eq!(config.profile_flush_interval, Duration::from_millis(500));
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.trust_timeout, Duration::from_secs(15));
        assert_eq!(config.trust_cache_ttl, Duration::from_secs(604_800));
    }

    #[test]
    fn builders_override() {
        let config = SessionConfig::fast()
            .with_max_connections(3)
            .with_profile_batching(0, Duration::from_millis(5))
            .with_notes_limit(2);
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.profile_batch_size, 1);
        assert_eq!(config.notes_limit, 2);
    }

    #[test]
    fn zero_flush_interval_is_clamped() {
        let config = SessionConfig::default().with_profile_batching(5, Duration::ZERO);
        assert_eq!(config.profile_flush_interval, MIN_FLUSH_INTERVAL);
    }

    #[test]
    fn bad_env_value_falls_back() {
        assert_eq!(env_parse("KITH_TEST_UNSET_VARIABLE", 7usize), 7);
    }
}

//! Configuration for the cache coordinator.

use qcache_core::RetryPolicy;
use std::time::Duration;

/// Tunables of one [`QueryCache`](crate::QueryCache) instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Retry policy shared by every retrying operation.
    pub retry: RetryPolicy,
    /// Upper bound on one watch wait. A timed-out wait consumes one retry
    /// attempt and re-reads the status. `None` reproduces an unbounded
    /// block: a waiter then outlives a claimant that never populates.
    pub watch_timeout: Option<Duration>,
    /// Maximum entries returned by one inspection snapshot.
    pub inspect_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            watch_timeout: Some(Duration::from_secs(60)),
            inspect_limit: 4096,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set or disable the watch-wait bound.
    pub fn with_watch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.watch_timeout = timeout;
        self
    }

    /// Set the inspection snapshot limit.
    pub fn with_inspect_limit(mut self, limit: usize) -> Self {
        self.inspect_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new()
            .with_retry(RetryPolicy::with_max_attempts(3))
            .with_watch_timeout(None)
            .with_inspect_limit(16);

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.watch_timeout, None);
        assert_eq!(config.inspect_limit, 16);
    }

    #[test]
    fn test_default_matches_protocol_cap() {
        let config = CacheConfig::default();
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.watch_timeout, Some(Duration::from_secs(60)));
    }
}

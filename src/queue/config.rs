//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RedqError, Result};

/// State records must outlive locks by at least this margin, so that a
/// reaper finding an expired lock can still read the state record.
pub(crate) const STATE_TTL_MARGIN: Duration = Duration::from_millis(60_000);

/// Configuration for a [`RedisQueue`](crate::queue::RedisQueue).
///
/// ## Example
/// ```rust
/// use redq::QueueConfig;
/// use std::time::Duration;
///
/// let config = QueueConfig::new("invoices")
///     .with_pop_timeout(Duration::from_secs(2))
///     .with_lock_time(Duration::from_secs(30))
///     .with_discard_time(Duration::from_secs(600))
///     .with_scheduler_workers(8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name; embedded in every derived key.
    pub name: String,
    /// How long the consumer blocks on the ready-list pop per iteration.
    pub pop_timeout: Duration,
    /// TTL of content and state records.
    pub state_ttl: Duration,
    /// TTL of the per-document lock; the liveness horizon of a consumer.
    pub lock_time: Duration,
    /// Maximum age between push and dispatch; older documents are skipped.
    pub discard_time: Duration,
    /// Pause between in-flight scans.
    pub reaper_interval: Duration,
    /// Number of tasks draining the handler dispatch queue.
    pub scheduler_workers: usize,
    /// Capacity of the handler dispatch queue; submissions beyond it are
    /// rejected and re-enqueued.
    pub scheduler_capacity: usize,
    /// How long an idle handler worker waits before re-checking for shutdown.
    pub poll_delay: Duration,
    /// Default timeout for state waits created without an explicit one.
    pub subscription_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            pop_timeout: Duration::from_secs(5),
            state_ttl: Duration::from_secs(86_400),
            lock_time: Duration::from_secs(90),
            discard_time: Duration::from_secs(3_600),
            reaper_interval: Duration::from_secs(5),
            scheduler_workers: 4,
            scheduler_capacity: 64,
            poll_delay: Duration::from_millis(500),
            subscription_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create a configuration for the named queue with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the blocking-pop timeout.
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Set the TTL of content and state records.
    pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    /// Set the lock TTL.
    pub fn with_lock_time(mut self, lock_time: Duration) -> Self {
        self.lock_time = lock_time;
        self
    }

    /// Set the maximum age a document may reach before dispatch.
    pub fn with_discard_time(mut self, discard_time: Duration) -> Self {
        self.discard_time = discard_time;
        self
    }

    /// Set the pause between in-flight scans.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the number of handler workers.
    pub fn with_scheduler_workers(mut self, workers: usize) -> Self {
        self.scheduler_workers = workers;
        self
    }

    /// Set the handler dispatch queue capacity.
    pub fn with_scheduler_capacity(mut self, capacity: usize) -> Self {
        self.scheduler_capacity = capacity;
        self
    }

    /// Set the idle handler-worker poll delay.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Set the default state-wait timeout.
    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    /// Check the configuration, as done at queue construction.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RedqError::configuration("queue name must not be empty"));
        }
        if self.pop_timeout.is_zero() {
            return Err(RedqError::configuration(
                "pop timeout must be positive; a zero timeout would block forever",
            ));
        }
        if self.lock_time < Duration::from_secs(1) {
            return Err(RedqError::configuration(
                "lock time must be at least one second",
            ));
        }
        if self.state_ttl.saturating_sub(self.lock_time) <= STATE_TTL_MARGIN {
            return Err(RedqError::configuration(format!(
                "state ttl must exceed the lock time by more than {}ms",
                STATE_TTL_MARGIN.as_millis()
            )));
        }
        if self.scheduler_workers == 0 {
            return Err(RedqError::configuration(
                "at least one handler worker is required",
            ));
        }
        if self.scheduler_capacity == 0 {
            return Err(RedqError::configuration(
                "handler queue capacity must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(QueueConfig::new("q").validate().is_ok());
    }

    #[test]
    fn rejects_insufficient_state_ttl_margin() {
        // 60s - 10s = 50s, below the required 60s margin.
        let config = QueueConfig::new("q")
            .with_state_ttl(Duration::from_secs(60))
            .with_lock_time(Duration::from_secs(10));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RedqError::Configuration { .. }));
    }

    #[test]
    fn rejects_margin_boundary() {
        // Exactly 60s of headroom is still too little.
        let config = QueueConfig::new("q")
            .with_state_ttl(Duration::from_secs(70))
            .with_lock_time(Duration::from_secs(10));
        assert!(config.validate().is_err());

        let config = QueueConfig::new("q")
            .with_state_ttl(Duration::from_secs(71))
            .with_lock_time(Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(QueueConfig::new("").validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let config = QueueConfig::new("q").with_scheduler_workers(0);
        assert!(config.validate().is_err());
    }
}

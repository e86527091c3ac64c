//! Client configuration.

use rand::Rng;
use std::time::Duration;

/// Isolation enforced at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Snapshot reads; a commit fails only if another transaction committed
    /// a write to one of the same keys after this transaction's snapshot.
    #[default]
    Snapshot,
    /// As `Snapshot`, and a commit also fails if a key this transaction
    /// read was overwritten after its snapshot.
    Serializable,
}

/// Configuration for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Retry policy for read-write transactions.
    pub retry: RetryConfig,

    /// Rows fetched from the store per batch while streaming.
    pub read_batch_size: usize,

    /// Maximum number of mutations a single transaction may buffer.
    pub max_mutations: usize,

    /// Isolation enforced at commit.
    pub isolation: IsolationLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            read_batch_size: 128,
            max_mutations: 20_000,
            isolation: IsolationLevel::Snapshot,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the read batch size. Zero is treated as one.
    #[must_use]
    pub const fn read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the per-transaction mutation cap.
    #[must_use]
    pub const fn max_mutations(mut self, limit: usize) -> Self {
        self.max_mutations = limit;
        self
    }

    /// Sets the isolation level.
    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Retry policy for conflicting commits.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, counting the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry policy allowing `max_attempts` attempts.
    ///
    /// `max_attempts` below one is treated as one.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a policy with a single attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before attempt `attempt` (0-indexed).
    ///
    /// Attempt 0 never waits. Later attempts back off exponentially from
    /// `initial_delay`, capped at `max_delay` before jitter is added.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.isolation, IsolationLevel::Snapshot);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.read_batch_size > 0);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .read_batch_size(0)
            .max_mutations(3)
            .isolation(IsolationLevel::Serializable)
            .retry(RetryConfig::no_retry());

        assert_eq!(config.read_batch_size, 1);
        assert_eq!(config.max_mutations, 3);
        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(50)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(250));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));
        for _ in 0..20 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn zero_attempts_clamped() {
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }
}

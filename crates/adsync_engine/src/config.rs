//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the whole engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate limiter settings.
    pub limiter: LimiterConfig,
    /// Retry settings for rate-limited failures.
    pub retry: RetryConfig,
    /// The platform default display type; campaigns with this value omit
    /// the field from their create payload.
    pub default_display_type: String,
}

impl EngineConfig {
    /// Sets the limiter configuration.
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the platform default display type.
    pub fn with_default_display_type(mut self, display_type: impl Into<String>) -> Self {
        self.default_display_type = display_type.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limiter: LimiterConfig::default(),
            retry: RetryConfig::default(),
            default_display_type: "standard".into(),
        }
    }
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum tasks running at once.
    pub max_concurrent: usize,
    /// Maximum tasks started within one 1000 ms window.
    pub max_per_second: u32,
    /// How long a task may wait in the queue before eviction.
    pub queue_timeout: Duration,
    /// How long the coordinator idles when nothing can start.
    pub poll_interval: Duration,
}

impl LimiterConfig {
    /// Sets the concurrency ceiling.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the per-second ceiling.
    pub fn with_max_per_second(mut self, max: u32) -> Self {
        self.max_per_second = max;
        self
    }

    /// Sets the queue timeout.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_per_second: 4,
            queue_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Configuration for retrying rate-limited failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Ceiling on any single backoff delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the maximum retry count.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Calculates the backoff delay before retry number `retry_count`
    /// (0-indexed): `base_delay * multiplier^retry_count`, capped at
    /// `max_delay`.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(retry_count as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

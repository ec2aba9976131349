//! Configuration for the sync engine.

use cardsync_sync_protocol::ConflictPolicy;
use rand::Rng;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server base URL, e.g. `https://sync.example.com`.
    pub server_url: String,
    /// Platform label sent with every request.
    pub platform: String,
    /// Period of automatic sync while the app is in the foreground.
    pub sync_interval: Duration,
    /// Timeout of each network request.
    pub timeout: Duration,
    /// How push conflicts are settled.
    pub conflict_policy: ConflictPolicy,
    /// Whether to push only the latest pending change per entity.
    pub compact_pending: bool,
    /// Whether to compare checksums after every pull.
    pub validate_consistency: bool,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            platform: std::env::consts::OS.to_string(),
            sync_interval: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(30),
            conflict_policy: ConflictPolicy::ServerWins,
            compact_pending: true,
            validate_consistency: true,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the platform label.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Sets the automatic sync period.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets whether pending changes are compacted before push.
    #[must_use]
    pub fn with_compact_pending(mut self, compact: bool) -> Self {
        self.compact_pending = compact;
        self
    }

    /// Sets whether cycles end with consistency validation.
    #[must_use]
    pub fn with_validate_consistency(mut self, validate: bool) -> Self {
        self.validate_consistency = validate;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for retry behavior after a failed cycle.
///
/// The default is a fixed 30 second delay. A multiplier above 1 turns it
/// into exponential backoff capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a fixed-delay configuration.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates an exponential backoff configuration with jitter.
    #[must_use]
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets whether jitter is added.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns the delay before retry number `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

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
        Self::fixed(Duration::from_secs(30))
    }
}

//! Configuration for the sync engine.

use learnsync_protocol::{ConflictStrategy, Domain};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backoff behaviour between remote attempts.
    pub retry: RetryConfig,
    /// Debounce delays per field type.
    pub delays: DelayPolicy,
    /// Attempt budget stamped on every new operation.
    pub default_max_retries: u32,
    /// Background drain interval; `None` drains only on reconnect and enqueue.
    pub process_interval: Option<Duration>,
    /// Per-domain conflict strategies replacing [`Domain::default_strategy`].
    pub strategy_overrides: HashMap<Domain, ConflictStrategy>,
    /// Maximum operations handled in one drain pass.
    pub batch_limit: Option<usize>,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            delays: DelayPolicy::default(),
            default_max_retries: 3,
            process_interval: Some(Duration::from_secs(30)),
            strategy_overrides: HashMap::new(),
            batch_limit: None,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the debounce delays.
    pub fn with_delays(mut self, delays: DelayPolicy) -> Self {
        self.delays = delays;
        self
    }

    /// Sets the attempt budget for new operations.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets or disables the background drain interval.
    pub fn with_process_interval(mut self, interval: Option<Duration>) -> Self {
        self.process_interval = interval;
        self
    }

    /// Overrides the conflict strategy for one domain.
    pub fn with_strategy(mut self, domain: Domain, strategy: ConflictStrategy) -> Self {
        self.strategy_overrides.insert(domain, strategy);
        self
    }

    /// Caps the number of operations handled per drain pass.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    /// Strategy used to settle conflicts for `domain`.
    pub fn strategy_for(&self, domain: Domain) -> ConflictStrategy {
        self.strategy_overrides
            .get(&domain)
            .copied()
            .unwrap_or_else(|| domain.default_strategy())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Debounce delays per kind of edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Interactive text fields: code, notes, recap answers.
    pub text_field: Duration,
    /// Profile edits.
    pub profile: Duration,
    /// Task and day completion. Zero means immediate.
    pub completion: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            text_field: Duration::from_millis(2000),
            profile: Duration::from_millis(1000),
            completion: Duration::ZERO,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to perturb delays by up to ±50%.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(initial × multiplier^attempt, max)`, without jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            Duration::ZERO
        } else if secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-0.5..=0.5);
        base.mul_f64(factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

//! Validated policy parameters for the protection components.

use std::time::Duration;

use tenantguard_core::{AppError, AppResult};

const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(10 * 60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_ATTEMPT_WINDOW: Duration = Duration::from_secs(60 * 60);
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest window, lockout, or bucket lifetime a policy accepts.
///
/// Every policy duration ends up as a store TTL, so it must stay
/// representable as an expiry instant and as Redis milliseconds.
pub const MAX_POLICY_DURATION: Duration = Duration::from_secs(366 * 24 * 60 * 60);

fn ensure_within_limit(name: &str, duration: Duration) -> AppResult<()> {
    if duration > MAX_POLICY_DURATION {
        return Err(AppError::Validation(format!(
            "{name} must not exceed {} seconds, got {} seconds",
            MAX_POLICY_DURATION.as_secs(),
            duration.as_secs()
        )));
    }

    Ok(())
}

/// Token-bucket admission policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketPolicy {
    rate_per_second: f64,
    burst: u32,
    idle_threshold: Duration,
    sweep_interval: Duration,
}

impl TokenBucketPolicy {
    /// Creates a policy refilling `rate_per_second` tokens up to `burst`.
    pub fn new(rate_per_second: f64, burst: u32) -> AppResult<Self> {
        if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            return Err(AppError::Validation(format!(
                "rate_per_second must be a positive finite number, got {rate_per_second}"
            )));
        }

        if burst == 0 {
            return Err(AppError::Validation(
                "burst must be at least 1".to_owned(),
            ));
        }

        let policy = Self {
            rate_per_second,
            burst,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        };
        ensure_within_limit("full bucket refill time", policy.full_refill_time())?;
        Ok(policy)
    }

    /// Sets how long a bucket may stay untouched before the sweep evicts it.
    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> AppResult<Self> {
        if idle_threshold.is_zero() {
            return Err(AppError::Validation(
                "idle_threshold must be greater than zero".to_owned(),
            ));
        }
        ensure_within_limit("idle_threshold", idle_threshold)?;

        self.idle_threshold = idle_threshold;
        Ok(self)
    }

    /// Sets how often the eviction sweep runs.
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> AppResult<Self> {
        if sweep_interval.is_zero() {
            return Err(AppError::Validation(
                "sweep_interval must be greater than zero".to_owned(),
            ));
        }
        ensure_within_limit("sweep_interval", sweep_interval)?;

        self.sweep_interval = sweep_interval;
        Ok(self)
    }

    /// Tokens regenerated per second.
    #[must_use]
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    /// Bucket capacity.
    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Idle time after which a bucket is evicted.
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Interval between eviction sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Time for an empty bucket to become completely full again.
    #[must_use]
    pub fn full_refill_time(&self) -> Duration {
        Duration::try_from_secs_f64(f64::from(self.burst) / self.rate_per_second)
            .unwrap_or(Duration::MAX)
    }
}

/// Replay-protection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPolicy {
    window: Duration,
    key_prefix: String,
}

impl ReplayPolicy {
    /// Creates a policy with the given freshness window.
    ///
    /// The window is also the lifetime of every nonce record, so it must be
    /// at least one second.
    pub fn new(window: Duration) -> AppResult<Self> {
        if window < Duration::from_secs(1) {
            return Err(AppError::Validation(
                "replay window must be at least one second".to_owned(),
            ));
        }
        ensure_within_limit("replay window", window)?;

        Ok(Self {
            window,
            key_prefix: "replay".to_owned(),
        })
    }

    /// Sets the store key prefix.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> AppResult<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(AppError::Validation(
                "replay key prefix must not be empty".to_owned(),
            ));
        }

        self.key_prefix = key_prefix;
        Ok(self)
    }

    /// Freshness window and nonce record lifetime.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Store key prefix.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_str()
    }
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_REPLAY_WINDOW,
            key_prefix: "replay".to_owned(),
        }
    }
}

/// Brute-force lockout policy.
#[derive(Debug, Clone, PartialEq)]
pub struct LockoutPolicy {
    max_attempts: u32,
    attempt_window: Duration,
    lockout_duration: Duration,
    use_exponential_backoff: bool,
    backoff_multiplier: f64,
    backoff_cap: Duration,
    key_prefix: String,
}

impl LockoutPolicy {
    /// Creates a policy locking after `max_attempts` failures inside `attempt_window`.
    pub fn new(
        max_attempts: u32,
        attempt_window: Duration,
        lockout_duration: Duration,
    ) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "max_attempts must be at least 1".to_owned(),
            ));
        }

        if attempt_window < Duration::from_secs(1) || lockout_duration < Duration::from_secs(1) {
            return Err(AppError::Validation(
                "attempt_window and lockout_duration must be at least one second".to_owned(),
            ));
        }
        ensure_within_limit("attempt_window", attempt_window)?;
        ensure_within_limit("lockout_duration", lockout_duration)?;

        Ok(Self {
            max_attempts,
            attempt_window,
            lockout_duration,
            ..Self::default()
        })
    }

    /// Enables exponential backoff of the lockout duration.
    pub fn with_exponential_backoff(mut self, multiplier: f64, cap: Duration) -> AppResult<Self> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(AppError::Validation(format!(
                "backoff multiplier must be greater than 1, got {multiplier}"
            )));
        }

        if cap < self.lockout_duration {
            return Err(AppError::Validation(
                "backoff cap must not be shorter than the base lockout duration".to_owned(),
            ));
        }
        ensure_within_limit("backoff cap", cap)?;

        self.use_exponential_backoff = true;
        self.backoff_multiplier = multiplier;
        self.backoff_cap = cap;
        Ok(self)
    }

    /// Sets the store key prefix.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> AppResult<Self> {
        let key_prefix = key_prefix.into();
        if key_prefix.trim().is_empty() {
            return Err(AppError::Validation(
                "lockout key prefix must not be empty".to_owned(),
            ));
        }

        self.key_prefix = key_prefix;
        Ok(self)
    }

    /// Failures tolerated before a lock is installed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Window over which failures accumulate, measured from the first failure.
    #[must_use]
    pub fn attempt_window(&self) -> Duration {
        self.attempt_window
    }

    /// Base lockout duration.
    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    /// Whether lockouts grow exponentially with the overage.
    #[must_use]
    pub fn use_exponential_backoff(&self) -> bool {
        self.use_exponential_backoff
    }

    /// Store key prefix.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_str()
    }

    /// Lockout duration to install for an observed attempt count.
    ///
    /// With backoff enabled the overage `k = attempts - max_attempts + 1`
    /// yields `min(base * multiplier^k, cap)`, so the first lock is already
    /// `base * multiplier`.
    #[must_use]
    pub fn lockout_for(&self, attempts: u64) -> Duration {
        if !self.use_exponential_backoff {
            return self.lockout_duration;
        }

        let overage = attempts
            .saturating_sub(u64::from(self.max_attempts))
            .saturating_add(1);
        let exponent = i32::try_from(overage).unwrap_or(i32::MAX);
        let scaled = self.lockout_duration.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        Duration::try_from_secs_f64(scaled)
            .map_or(self.backoff_cap, |duration| duration.min(self.backoff_cap))
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_window: DEFAULT_ATTEMPT_WINDOW,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
            use_exponential_backoff: false,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            key_prefix: "bruteforce".to_owned(),
        }
    }
}

//! Retry policy for transport failures.

use std::time::Duration;

/// Exponential, capped backoff between failed push cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: u32,
    /// Failed deliveries after which a change is parked as a conflict
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
            multiplier: 2,
            max_attempts: 8,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay to wait after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1).saturating_pow(failures - 1);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Tracks consecutive failures against a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Count a failure and return how long to wait before retrying.
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay currently in force, `None` after a success.
    pub fn current_delay(&self) -> Option<Duration> {
        (self.failures > 0).then(|| self.policy.delay(self.failures))
    }
}

//! Retry policy for webhook delivery

use std::time::Duration;

/// Default number of attempts per delivery lineage (initial + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy configuration
///
/// The delay scheduled after failed attempt `n` is `base_delay * 2^n`, so the
/// default policy waits 2s, 4s, 8s, ...
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Ceiling on attempts per lineage, counting the first one
    pub max_attempts: u32,

    /// Unit of the exponential backoff
    pub base_delay: Duration,

    /// Optional cap on the cumulative backoff of one lineage
    pub max_lineage: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_lineage: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with exponential backoff
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the backoff unit
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Cap the cumulative backoff of a lineage
    pub fn with_max_lineage(mut self, max_lineage: Duration) -> Self {
        self.max_lineage = Some(max_lineage);
        self
    }

    /// Delay to wait after failed attempt `attempt` before the next one
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Sum of all backoff delays scheduled up to and including `attempt`
    pub fn lineage_delay_through(&self, attempt: u32) -> Duration {
        (1..=attempt)
            .map(|a| self.delay_for_attempt(a))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Check if another attempt should follow failed attempt `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match self.max_lineage {
            Some(cap) => self.lineage_delay_through(attempt) <= cap,
            None => true,
        }
    }
}

//! Shared retry policy for transactional operations.
//!
//! Every retrying operation in the protocol (status claim, populate,
//! invalidate) uses one [`RetryPolicy`] value, so the attempt cap cannot
//! drift between call sites. Classification of what is worth retrying lives
//! on [`crate::StoreError::is_transient`].

use std::time::Duration;

/// Bounded-retry configuration for store transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum transaction attempts before the operation reports exhaustion.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the exponential backoff.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt cap and default backoff.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Whether `attempt` (1-indexed) is past the cap.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }

    /// Backoff to sleep after a failed `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = self.backoff_multiplier.max(1.0).powi(exp as i32);
        let backoff = self.initial_backoff.mul_f32(factor);
        backoff.min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cap_is_ten() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert!(!policy.is_exhausted(10));
        assert!(policy.is_exhausted(11));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(5));
        assert_eq!(policy.backoff(2), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(20));
        assert_eq!(policy.backoff(30), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(500));
    }
}

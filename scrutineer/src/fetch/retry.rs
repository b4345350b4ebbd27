use std::time::Duration;

/// Bounded retry with optional exponential backoff, applied per link per pass
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per link, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay: Duration,
    /// Factor applied to the delay for each further attempt
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-indexed) before the
    /// next one. Zero once no attempts remain.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || !self.should_retry(attempt) {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi((attempt - 1) as i32);
        let secs = (self.delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Whether another attempt follows failed attempt `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_between_attempts_only() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::ZERO);
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(4),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(20),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for(4), Duration::from_secs(20));
    }
}

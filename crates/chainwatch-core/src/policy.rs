//! Bounded exponential backoff for reopening subscriptions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum consecutive failed attempts before giving up. `None` = forever.
    pub max_retries: Option<u32>,
    /// Delay before the first reconnect.
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Cap on the delay.
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    /// Multiplier applied to the delay on each consecutive failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.max(1.0).powi(exp);
        let cap_ms = self.config.max_backoff.as_millis() as f64;

        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }

    /// Returns `true` if attempt number `attempt` is still allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && self.config.max_retries.map_or(true, |max| attempt <= max)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: None,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
        });
        assert_eq!(policy.next_delay(5), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(10_000), Some(Duration::from_millis(500)));
    }

    #[test]
    fn unlimited_retries() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: None,
            ..Default::default()
        });
        assert!(policy.should_retry(u32::MAX));
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: Some(2),
            ..Default::default()
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}

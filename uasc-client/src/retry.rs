//! Reconnect backoff policy for sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Generator of exponentially growing sleep intervals with an optional cap
/// on the number of retries.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_sleep: Duration,
    max_retries: Option<u32>,
    current_sleep: Duration,
    retry_count: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff generator starting at `initial_sleep` and
    /// doubling up to `max_sleep`. `max_retries` of `None` retries forever.
    pub fn new(max_sleep: Duration, max_retries: Option<u32>, initial_sleep: Duration) -> Self {
        Self {
            max_sleep,
            max_retries,
            current_sleep: initial_sleep,
            retry_count: 0,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.max_retries.is_some_and(|max| self.retry_count >= max) {
            return None;
        }
        let next_sleep = self.current_sleep;
        self.current_sleep = self.max_sleep.min(self.current_sleep * 2);
        self.retry_count += 1;
        Some(next_sleep)
    }
}

/// The reconnect policy of a session: how often and how patiently the client
/// tries to restore a lost connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRetryPolicy {
    initial_sleep_ms: u64,
    max_sleep_ms: u64,
    max_retries: Option<u32>,
}

impl Default for SessionRetryPolicy {
    fn default() -> Self {
        Self {
            initial_sleep_ms: 500,
            max_sleep_ms: 30_000,
            max_retries: None,
        }
    }
}

impl SessionRetryPolicy {
    /// Create a policy retrying at most `max_retries` times.
    pub fn new(initial_sleep: Duration, max_sleep: Duration, max_retries: Option<u32>) -> Self {
        Self {
            initial_sleep_ms: initial_sleep.as_millis() as u64,
            max_sleep_ms: max_sleep.as_millis() as u64,
            max_retries,
        }
    }

    /// A policy that never retries.
    pub fn never() -> Self {
        Self {
            max_retries: Some(0),
            ..Default::default()
        }
    }

    /// Start a fresh backoff sequence.
    pub fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.max_sleep_ms),
            self.max_retries,
            Duration::from_millis(self.initial_sleep_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(400),
            Some(4),
            Duration::from_millis(100),
        );
        assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn never_policy_yields_nothing() {
        let mut backoff = SessionRetryPolicy::never().new_backoff();
        assert_eq!(backoff.next(), None);
    }
}

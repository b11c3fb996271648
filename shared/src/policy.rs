//! Reconnect policy
//!
//! Delays grow geometrically from the base interval and are capped:
//! ```text
//! delay(n) = min(base * 1.5^(n-1), max_delay)    n >= 1
//! ```

use std::time::Duration;

use crate::limits::{BACKOFF_MULTIPLIER, DEFAULT_RECONNECT_INTERVAL_MS, MAX_RECONNECT_DELAY_MS};

/// Configuration for automatic reconnection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether involuntary closes schedule a reconnection at all
    pub enabled: bool,
    /// Delay before the first reconnection attempt
    pub base_interval: Duration,
    /// Maximum number of consecutive reconnection attempts (None = unbounded)
    pub max_attempts: Option<u32>,
    /// Upper bound on any computed delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_attempts: None,
            max_delay: Duration::from_millis(MAX_RECONNECT_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_base_interval(mut self, base_interval: Duration) -> Self {
        self.base_interval = base_interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Calculate the delay for the given (1-based) attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let base_ms = self.base_interval.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = (base_ms * BACKOFF_MULTIPLIER.powi(exponent.min(i32::MAX as u32) as i32))
            .min(max_ms);
        Duration::from_millis(delay_ms.round() as u64)
    }

    /// Check whether the given (1-based) attempt may still be scheduled
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        if !self.enabled {
            return false;
        }
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}

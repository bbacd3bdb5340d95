//! Reconnection Policy
//!
//! Delay schedule between upstream connection attempts. The default is a
//! fixed 5 second delay with unlimited attempts; a multiplier above `1.0`
//! turns it into capped exponential backoff, and a jitter factor
//! randomizes each delay.

use std::time::Duration;

use rand::Rng;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt (`1.0` = fixed delay).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (`0.1` = ±10%).
    pub jitter_factor: f64,
    /// Maximum consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Fixed delay, no jitter, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Whether retries never run out.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.max_attempts == 0
    }
}

/// Stateful delay generator built from a [`ReconnectConfig`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ticker_relay::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
///
/// // A successful connection starts the schedule over.
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay to wait before the next attempt.
    ///
    /// Returns `None` once a finite attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count = self.attempt_count.saturating_add(1);
        let delay = self.apply_jitter(self.current_delay.min(self.config.max_delay));
        self.current_delay = self.grow(self.current_delay);

        Some(delay)
    }

    /// Start over after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.is_unlimited() || self.attempt_count < self.config.max_attempts
    }

    fn grow(&self, delay: Duration) -> Duration {
        let multiplier = self.config.multiplier;
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return delay;
        }

        let max_millis = self.config.max_delay.as_millis();
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * multiplier).round();
        // Growth never shrinks the delay; overflow saturates at the cap.
        let next_millis = if scaled.is_finite() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            max_millis
        };
        let capped = next_millis.max(delay.as_millis()).min(max_millis);
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * factor.min(1.0);
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn default_is_fixed_five_seconds_unlimited() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert!((config.multiplier - 1.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert!(config.is_unlimited());
    }

    #[test]
    fn fixed_delay_never_grows() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..10 {
            assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
        }
        assert_eq!(policy.attempt_count(), 10);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let mut policy = ReconnectPolicy::new(backoff(100, 500, 2.0, 0));
        let delays: Vec<u128> = (0..5)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn initial_delay_above_max_is_capped() {
        let mut policy = ReconnectPolicy::new(backoff(1000, 200, 1.0, 0));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn finite_attempt_budget() {
        let mut policy = ReconnectPolicy::new(backoff(10, 10, 1.0, 2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut policy = ReconnectPolicy::new(backoff(100, 10_000, 2.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::fixed(Duration::from_millis(1000))
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn non_finite_multiplier_keeps_delay() {
        for multiplier in [f64::NAN, f64::INFINITY, -2.0, 0.0] {
            let mut policy = ReconnectPolicy::new(backoff(100, 1_000, multiplier, 0));
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        }
    }

    #[test]
    fn non_finite_jitter_is_ignored() {
        for jitter_factor in [f64::NAN, f64::INFINITY, -0.5] {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor,
                ..ReconnectConfig::fixed(Duration::from_millis(250))
            });
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(250)));
        }
    }

    #[test]
    fn unlimited_never_gives_up() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }
}

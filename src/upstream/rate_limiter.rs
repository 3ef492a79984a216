//! Cooperative rate limiting, exponential backoff and overload cooldown for
//! upstream calls.
//!
//! The limiter is call-site blocking: [`RateLimiter::wait_if_needed`] sleeps
//! the caller until the minimum interval since the last recorded request has
//! passed. There is no token bucket and no background task.
//!
//! Failures are tracked as a consecutive count. Reaching the threshold sleeps
//! for the overload cooldown and resets the count, which keeps one run from
//! hammering a struggling service.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trackhound_core::{ManualClock, RateLimitSettings, RateLimiter};
//!
//! # async fn example() {
//! let clock = Arc::new(ManualClock::default());
//! let limiter = RateLimiter::new(RateLimitSettings::default(), clock.clone());
//!
//! limiter.apply_backoff(1).await.unwrap();
//! limiter.apply_backoff(2).await.unwrap();
//! assert_eq!(clock.sleeps(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::error::RateLimitError;
use crate::clock::Clock;
use crate::config::{
    DEFAULT_BACKOFF_BASE, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_REQUEST_INTERVAL, DEFAULT_OVERLOAD_COOLDOWN, PipelineConfig,
};

/// Timing knobs for [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Minimum spacing between requests.
    pub min_interval: Duration,
    /// Base delay; attempt `n` waits `base * 2^(n-1)`.
    pub backoff_base: Duration,
    /// Highest attempt number backoff will sleep for.
    pub max_attempts: u32,
    /// Consecutive failures that trigger the cooldown.
    pub failure_threshold: u32,
    /// Cooldown length for overload and rate-limit signals.
    pub cooldown: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_attempts: DEFAULT_MAX_RETRIES,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_OVERLOAD_COOLDOWN,
        }
    }
}

impl From<&PipelineConfig> for RateLimitSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            min_interval: config.min_request_interval,
            backoff_base: config.backoff_base,
            max_attempts: config.max_retries,
            failure_threshold: config.failure_threshold,
            cooldown: config.overload_cooldown,
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    /// `None` until the first request, which is never delayed.
    last_request: Option<Duration>,
    consecutive_failures: u32,
}

/// Spacing, backoff and cooldown for one upstream service.
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Creates a limiter. A zero `failure_threshold` is treated as 1.
    #[must_use]
    pub fn new(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let settings = RateLimitSettings {
            failure_threshold: settings.failure_threshold.max(1),
            ..settings
        };
        Self {
            settings,
            clock,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Sleeps until `min_interval` has passed since the last recorded request.
    ///
    /// Returns the time slept.
    #[instrument(skip(self))]
    pub async fn wait_if_needed(&self) -> Duration {
        let state = self.state.lock().await;
        let Some(last) = state.last_request else {
            return Duration::ZERO;
        };

        let elapsed = self.clock.now().saturating_sub(last);
        if elapsed >= self.settings.min_interval {
            return Duration::ZERO;
        }

        let wait = self.settings.min_interval - elapsed;
        debug!(wait_ms = wait.as_millis(), "spacing upstream request");
        self.clock.sleep(wait).await;
        wait
    }

    /// Marks "now" as the time of the latest request.
    pub async fn record_request(&self) {
        let mut state = self.state.lock().await;
        state.last_request = Some(self.clock.now());
    }

    /// Clears the consecutive failure count.
    pub async fn record_success(&self) {
        self.state.lock().await.consecutive_failures = 0;
    }

    /// Counts a failure; at the threshold, sleeps the cooldown and resets.
    ///
    /// Returns whether the cooldown was applied.
    #[instrument(skip(self))]
    pub async fn record_failure(&self) -> bool {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        if state.consecutive_failures < self.settings.failure_threshold {
            debug!(failures = state.consecutive_failures, "upstream failure recorded");
            return false;
        }

        warn!(
            failures = state.consecutive_failures,
            cooldown_secs = self.settings.cooldown.as_secs(),
            "repeated upstream failures, cooling down"
        );
        state.consecutive_failures = 0;
        self.clock.sleep(self.settings.cooldown).await;
        true
    }

    /// Current consecutive failure count.
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    /// Sleeps `base * 2^(attempt-1)` for a 1-indexed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::MaxAttemptsExceeded`] without sleeping once
    /// `attempt` exceeds the configured maximum.
    #[instrument(skip(self), fields(max = self.settings.max_attempts))]
    pub async fn apply_backoff(&self, attempt: u32) -> Result<Duration, RateLimitError> {
        if attempt > self.settings.max_attempts {
            return Err(RateLimitError::MaxAttemptsExceeded {
                attempt,
                max: self.settings.max_attempts,
            });
        }

        let delay = self.backoff_delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "backing off");
        self.clock.sleep(delay).await;
        Ok(delay)
    }

    /// Delay [`apply_backoff`](Self::apply_backoff) would sleep for `attempt`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.settings
            .backoff_base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }

    /// Sleeps the cooldown after an explicit rate-limit signal and clears the
    /// consecutive failure streak.
    #[instrument(skip(self))]
    pub async fn handle_rate_limit_error(&self) {
        warn!(
            cooldown_secs = self.settings.cooldown.as_secs(),
            "upstream rate limit hit, cooling down"
        );
        self.state.lock().await.consecutive_failures = 0;
        self.clock.sleep(self.settings.cooldown).await;
        self.record_request().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(settings: RateLimitSettings) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(1_000)));
        (RateLimiter::new(settings, clock.clone()), clock)
    }

    // ==================== Spacing Tests ====================

    #[tokio::test]
    async fn test_first_request_is_not_delayed() {
        let (limiter, clock) = limiter(RateLimitSettings::default());
        assert_eq!(limiter.wait_if_needed().await, Duration::ZERO);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_wait_sleeps_remaining_interval() {
        let (limiter, clock) = limiter(RateLimitSettings {
            min_interval: Duration::from_secs(1),
            ..RateLimitSettings::default()
        });
        limiter.record_request().await;
        clock.advance(Duration::from_millis(300));

        assert_eq!(limiter.wait_if_needed().await, Duration::from_millis(700));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(700)]);
    }

    #[tokio::test]
    async fn test_no_wait_after_interval_elapsed() {
        let (limiter, clock) = limiter(RateLimitSettings::default());
        limiter.record_request().await;
        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.wait_if_needed().await, Duration::ZERO);
    }

    // ==================== Backoff Tests ====================

    #[tokio::test]
    async fn test_backoff_schedule_doubles_from_base() {
        let (limiter, clock) = limiter(RateLimitSettings {
            backoff_base: Duration::from_secs(2),
            max_attempts: 3,
            ..RateLimitSettings::default()
        });

        for attempt in 1..=3 {
            limiter.apply_backoff(attempt).await.unwrap();
        }
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[tokio::test]
    async fn test_backoff_past_max_fails_without_sleeping() {
        let (limiter, clock) = limiter(RateLimitSettings {
            max_attempts: 3,
            ..RateLimitSettings::default()
        });

        let err = limiter.apply_backoff(4).await.unwrap_err();
        assert_eq!(err, RateLimitError::MaxAttemptsExceeded { attempt: 4, max: 3 });
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let (limiter, _clock) = limiter(RateLimitSettings::default());
        assert_eq!(limiter.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(limiter.backoff_delay(200), Duration::MAX);
    }

    // ==================== Failure Tracking Tests ====================

    #[tokio::test]
    async fn test_cooldown_at_threshold_then_reset() {
        let (limiter, clock) = limiter(RateLimitSettings {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
            ..RateLimitSettings::default()
        });

        assert!(!limiter.record_failure().await);
        assert!(!limiter.record_failure().await);
        assert!(limiter.record_failure().await);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(300)]);
        assert_eq!(limiter.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let (limiter, clock) = limiter(RateLimitSettings::default());
        limiter.record_failure().await;
        limiter.record_failure().await;
        limiter.record_success().await;
        assert!(!limiter.record_failure().await);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_signal_sleeps_cooldown() {
        let (limiter, clock) = limiter(RateLimitSettings {
            cooldown: Duration::from_secs(60),
            ..RateLimitSettings::default()
        });
        limiter.handle_rate_limit_error().await;
        assert_eq!(clock.total_slept(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_rate_limit_signal_resets_failure_count() {
        let (limiter, clock) = limiter(RateLimitSettings {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
            ..RateLimitSettings::default()
        });
        assert!(!limiter.record_failure().await);
        limiter.handle_rate_limit_error().await;
        assert_eq!(limiter.consecutive_failures().await, 0);
        assert!(!limiter.record_failure().await);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    }
}

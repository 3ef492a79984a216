//! Explicit pipeline configuration.
//!
//! A single [`PipelineConfig`] is built at startup (defaults, then config file,
//! then environment, then CLI flags) and handed to each component's
//! constructor. Nothing in the library reads the environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default cache time-to-live (24 hours).
pub const DEFAULT_CACHE_TTL_HOURS: u64 = 24;

/// Default minimum spacing between upstream calls.
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Default maximum attempts for a single upstream search.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base for exponential backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Default pause after repeated upstream failures (5 minutes).
pub const DEFAULT_OVERLOAD_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Consecutive failures that trigger the overload cooldown.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Age after which a lock file is considered stale (1 hour).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default limit for monitoring a single transfer (10 minutes).
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default transfer status polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default time a transfer may sit in the remote peer's queue.
pub const DEFAULT_REMOTE_QUEUE_GRACE: Duration = Duration::from_secs(5 * 60);

/// Default similarity required for a fuzzy duplicate match.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.85;

/// Default pause between lines that touched the upstream service.
pub const DEFAULT_INTER_DOWNLOAD_PAUSE: Duration = Duration::from_secs(2);

/// Default time to let a search collect peer responses.
pub const DEFAULT_SEARCH_WAIT: Duration = Duration::from_secs(10);

/// Default process tag written into the lock file.
pub const DEFAULT_PROCESS_TAG: &str = "trackhound";

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A numeric option is outside its accepted range.
    #[error("invalid value for `{field}`: {value} (expected {expected})")]
    OutOfRange {
        /// Option name.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },

    /// An enumerated option has an unknown label.
    #[error("invalid value for `{field}`: '{value}' (expected one of: {expected})")]
    UnknownValue {
        /// Option name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Accepted labels.
        expected: &'static str,
    },
}

/// What to record when a transfer is still in progress at the monitoring timeout.
///
/// `AssumeSuccess` keeps the historical behavior of treating a long-running
/// transfer as done; it can record a success for a file that never finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Record `SUCCESS` and drop the line from the playlist.
    #[default]
    AssumeSuccess,
    /// Record `ERROR` and keep the line for a later run.
    MarkError,
}

impl TimeoutPolicy {
    /// Returns the configuration label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssumeSuccess => "assume_success",
            Self::MarkError => "mark_error",
        }
    }
}

impl std::str::FromStr for TimeoutPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "assume_success" => Ok(Self::AssumeSuccess),
            "mark_error" => Ok(Self::MarkError),
            _ => Err(ConfigError::UnknownValue {
                field: "timeout_policy",
                value: value.to_string(),
                expected: "assume_success, mark_error",
            }),
        }
    }
}

/// Runtime settings shared by every pipeline component.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Lifetime of cached search results.
    pub cache_ttl: Duration,
    /// Sweep expired cache rows on every cache read.
    pub cache_auto_cleanup: bool,
    /// Minimum spacing between upstream calls.
    pub min_request_interval: Duration,
    /// Maximum attempts for one upstream search (including the first).
    pub max_retries: u32,
    /// Base delay for exponential backoff (`base * 2^(attempt-1)`).
    pub backoff_base: Duration,
    /// Pause applied on rate-limit signals and after repeated failures.
    pub overload_cooldown: Duration,
    /// Consecutive failures that trigger the overload cooldown.
    pub failure_threshold: u32,
    /// Lock files older than this are stale.
    pub lock_timeout: Duration,
    /// Upper bound for monitoring one transfer.
    pub download_timeout: Duration,
    /// Interval between transfer status polls.
    pub poll_interval: Duration,
    /// Time a transfer may wait in the remote queue before it is abandoned.
    pub remote_queue_grace: Duration,
    /// Similarity in `[0, 1]` required for a fuzzy duplicate.
    pub fuzzy_threshold: f64,
    /// Pause between lines that reached the upstream service.
    pub inter_download_pause: Duration,
    /// Time a search is left open to collect responses before reading them.
    pub search_wait: Duration,
    /// Outcome recorded for transfers still running at the timeout.
    pub timeout_policy: TimeoutPolicy,
    /// Tag stored in the lock file to label the holder.
    pub process_tag: String,
    /// Local directory where the upstream service places completed files.
    pub download_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_HOURS * 3600),
            cache_auto_cleanup: true,
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            overload_cooldown: DEFAULT_OVERLOAD_COOLDOWN,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            remote_queue_grace: DEFAULT_REMOTE_QUEUE_GRACE,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            inter_download_pause: DEFAULT_INTER_DOWNLOAD_PAUSE,
            search_wait: DEFAULT_SEARCH_WAIT,
            timeout_policy: TimeoutPolicy::default(),
            process_tag: DEFAULT_PROCESS_TAG.to_string(),
            download_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first invalid option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) || self.fuzzy_threshold.is_nan() {
            return Err(out_of_range(
                "fuzzy_threshold",
                self.fuzzy_threshold,
                "0.0..=1.0",
            ));
        }
        if !(1..=10).contains(&self.max_retries) {
            return Err(out_of_range("max_retries", self.max_retries, "1..=10"));
        }
        if self.failure_threshold == 0 {
            return Err(out_of_range(
                "failure_threshold",
                self.failure_threshold,
                ">= 1",
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(out_of_range("cache_ttl_hours", 0, ">= 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(out_of_range("poll_interval_secs", 0, ">= 1"));
        }
        if self.download_timeout < self.poll_interval {
            return Err(out_of_range(
                "download_timeout_secs",
                self.download_timeout.as_secs(),
                "at least one poll interval",
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(out_of_range("lock_timeout_secs", 0, ">= 1"));
        }
        if self.process_tag.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "process_tag",
                value: String::new(),
                expected: "a non-empty tag",
            });
        }
        Ok(())
    }
}

fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.cache_ttl, Duration::from_secs(24 * 3600));
        assert!((config.fuzzy_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.timeout_policy, TimeoutPolicy::AssumeSuccess);
    }

    #[test]
    fn test_validate_rejects_threshold_above_one() {
        let config = PipelineConfig {
            fuzzy_threshold: 1.5,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fuzzy_threshold"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = PipelineConfig {
            max_retries: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_shorter_than_poll() {
        let config = PipelineConfig {
            download_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                field: "download_timeout_secs",
                value: "1".to_string(),
                expected: "at least one poll interval",
            }
        );
    }

    #[test]
    fn test_timeout_policy_parses_labels() {
        assert_eq!(
            "assume-success".parse::<TimeoutPolicy>(),
            Ok(TimeoutPolicy::AssumeSuccess)
        );
        assert_eq!(
            "MARK_ERROR".parse::<TimeoutPolicy>(),
            Ok(TimeoutPolicy::MarkError)
        );
        assert!("optimistic".parse::<TimeoutPolicy>().is_err());
    }
}

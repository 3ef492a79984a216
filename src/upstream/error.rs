//! Error types for the upstream search/transfer service.

use thiserror::Error;

/// Raised by [`RateLimiter::apply_backoff`](super::RateLimiter::apply_backoff)
/// once the attempt budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The attempt number is past the configured maximum; do not retry.
    #[error("max attempts exceeded: attempt {attempt} > max {max}")]
    MaxAttemptsExceeded {
        /// Attempt that was requested.
        attempt: u32,
        /// Configured maximum.
        max: u32,
    },
}

/// Errors returned by upstream operations.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, DNS or TLS failure.
    #[error("network error calling {endpoint}: {source}")]
    Network {
        /// Endpoint that was being called.
        endpoint: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete in time.
    #[error("timeout calling {endpoint}")]
    Timeout {
        /// Endpoint that timed out.
        endpoint: String,
    },

    /// Non-success HTTP status other than 429.
    #[error("HTTP {status} from {endpoint}")]
    Http {
        /// Endpoint that failed.
        endpoint: String,
        /// Response status code.
        status: u16,
    },

    /// The service signalled rate limiting (HTTP 429).
    #[error("rate limited by upstream at {endpoint}")]
    RateLimited {
        /// Endpoint that was throttled.
        endpoint: String,
    },

    /// The response body did not have the expected shape.
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode {
        /// Endpoint whose response was malformed.
        endpoint: String,
        /// Decoder error text.
        message: String,
    },

    /// The configured base URL cannot be joined with an API path.
    #[error("invalid upstream URL {url}: {message}")]
    InvalidUrl {
        /// Offending URL text.
        url: String,
        /// Parser error text.
        message: String,
    },

    /// A search kept failing until the attempt budget ran out.
    #[error("search '{query}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Query that was being searched.
        query: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: Box<UpstreamError>,
    },

    /// Backoff refused another attempt.
    #[error(transparent)]
    Backoff(#[from] RateLimitError),
}

impl UpstreamError {
    /// Creates a network error.
    pub fn network(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(endpoint: impl Into<String>) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an error from a non-success status, mapping 429 to
    /// [`UpstreamError::RateLimited`].
    pub fn http_status(endpoint: impl Into<String>, status: u16) -> Self {
        if status == 429 {
            Self::RateLimited {
                endpoint: endpoint.into(),
            }
        } else {
            Self::Http {
                endpoint: endpoint.into(),
                status,
            }
        }
    }

    /// Creates a rate-limit error.
    pub fn rate_limited(endpoint: impl Into<String>) -> Self {
        Self::RateLimited {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Maps a transport error, distinguishing timeouts.
    pub fn from_reqwest(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(endpoint)
        } else if source.is_decode() {
            Self::decode(endpoint, source)
        } else {
            Self::network(endpoint, source)
        }
    }

    /// Whether this error (or the last attempt it wraps) was a rate-limit signal.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        classify_error(self) == FailureType::RateLimited
    }
}

/// Retry classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on another attempt (network, timeout, 5xx, 408).
    Transient,
    /// The service asked us to slow down.
    RateLimited,
    /// Will not succeed by retrying.
    Permanent,
}

/// Classifies an error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network, Timeout | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | other HTTP, Decode, InvalidUrl, Backoff | Permanent |
#[must_use]
pub fn classify_error(error: &UpstreamError) -> FailureType {
    match error {
        UpstreamError::Network { .. } | UpstreamError::Timeout { .. } => FailureType::Transient,
        UpstreamError::RateLimited { .. } => FailureType::RateLimited,
        UpstreamError::Http { status, .. } => classify_http_status(*status),
        UpstreamError::RetriesExhausted { source, .. } => classify_error(source),
        UpstreamError::Decode { .. }
        | UpstreamError::InvalidUrl { .. }
        | UpstreamError::Backoff(_) => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited,
        408 | 500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_429_becomes_rate_limited() {
        let error = UpstreamError::http_status("searches", 429);
        assert!(matches!(error, UpstreamError::RateLimited { .. }));
        assert!(error.is_rate_limited());
    }

    #[test]
    fn test_classify_server_errors_as_transient() {
        for status in [500, 502, 503, 504, 408] {
            assert_eq!(
                classify_error(&UpstreamError::http_status("x", status)),
                FailureType::Transient,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_classify_client_errors_as_permanent() {
        for status in [400, 401, 404] {
            assert_eq!(
                classify_error(&UpstreamError::http_status("x", status)),
                FailureType::Permanent
            );
        }
        assert_eq!(
            classify_error(&UpstreamError::decode("x", "bad json")),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_retries_exhausted_classifies_by_last_error() {
        let error = UpstreamError::RetriesExhausted {
            query: "q".to_string(),
            attempts: 3,
            source: Box::new(UpstreamError::timeout("searches")),
        };
        assert_eq!(classify_error(&error), FailureType::Transient);
        let msg = error.to_string();
        assert!(msg.contains("3 attempts"), "{msg}");
    }

    #[test]
    fn test_backoff_error_display() {
        let error = UpstreamError::from(RateLimitError::MaxAttemptsExceeded { attempt: 4, max: 3 });
        assert_eq!(error.to_string(), "max attempts exceeded: attempt 4 > max 3");
    }
}

//! Access to the external search/transfer service.
//!
//! - [`TransferService`] is the seam; [`SlskdService`] implements it over HTTP.
//! - [`RateLimiter`] spaces calls and owns backoff and cooldown.
//! - [`UpstreamClient`] composes both with the search cache and a retry loop.
//!
//! Raw hits are normalized into [`ResultDescriptor`](crate::ResultDescriptor)
//! before they are returned or cached.

mod client;
mod error;
mod http;
mod rate_limiter;
mod service;
mod types;

pub use client::UpstreamClient;
pub use error::{FailureType, RateLimitError, UpstreamError, classify_error};
pub use http::{API_KEY_HEADER, SlskdService};
pub use rate_limiter::{RateLimitSettings, RateLimiter};
pub use service::{Result, TransferService};
pub use types::{EnqueueFile, RawSearchHit, TransferState, TransferStatus};

//! The single entry point for talking to the upstream service.
//!
//! Every call is spaced by the [`RateLimiter`]. Searches additionally go
//! through the [`SearchCache`] and a retry loop:
//!
//! - transient failures back off exponentially (`base * 2^(attempt-1)`)
//! - rate-limit signals sleep the cooldown instead of the backoff
//! - every failure counts toward the overload threshold, whose cooldown
//!   replaces that attempt's backoff
//! - permanent failures are returned at once

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::error::{FailureType, UpstreamError, classify_error};
use super::rate_limiter::RateLimiter;
use super::service::{Result, TransferService};
use super::types::{EnqueueFile, TransferStatus};
use crate::cache::SearchCache;
use crate::clock::Clock;
use crate::store::ResultDescriptor;

/// Rate-limited, cached, retrying access to a [`TransferService`].
#[derive(Debug)]
pub struct UpstreamClient {
    service: Arc<dyn TransferService>,
    limiter: RateLimiter,
    cache: SearchCache,
    clock: Arc<dyn Clock>,
    search_wait: Duration,
}

impl UpstreamClient {
    /// Assembles a client.
    ///
    /// `search_wait` is how long a search is left open to collect peer
    /// responses before its results are read.
    #[must_use]
    pub fn new(
        service: Arc<dyn TransferService>,
        limiter: RateLimiter,
        cache: SearchCache,
        clock: Arc<dyn Clock>,
        search_wait: Duration,
    ) -> Self {
        Self {
            service,
            limiter,
            cache,
            clock,
            search_wait,
        }
    }

    /// The limiter shared by every call.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The search cache.
    #[must_use]
    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Search results for `query`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the permanent error, or [`UpstreamError::RetriesExhausted`]
    /// wrapping the last failure once the attempt budget is spent.
    #[instrument(skip(self))]
    pub async fn search_tracks_cached(&self, query: &str) -> Result<Vec<ResultDescriptor>> {
        self.cache
            .search_with_cache(query, || self.search_tracks(query))
            .await
    }

    /// Uncached search with retries.
    ///
    /// # Errors
    ///
    /// See [`search_tracks_cached`](Self::search_tracks_cached).
    #[instrument(skip(self))]
    pub async fn search_tracks(&self, query: &str) -> Result<Vec<ResultDescriptor>> {
        let max_attempts = self.limiter.settings().max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.throttle().await;

            let error = match self.search_once(query).await {
                Ok(hits) => {
                    self.limiter.record_success().await;
                    let results: Vec<ResultDescriptor> =
                        hits.into_iter().map(ResultDescriptor::from).collect();
                    debug!(attempt, count = results.len(), "search completed");
                    return Ok(results);
                }
                Err(error) => error,
            };

            let failure = classify_error(&error);
            if failure == FailureType::Permanent {
                warn!(%error, "permanent search failure");
                return Err(error);
            }

            warn!(attempt, max_attempts, %error, ?failure, "search attempt failed");
            let cooled_down = if failure == FailureType::RateLimited {
                self.limiter.handle_rate_limit_error().await;
                true
            } else {
                self.limiter.record_failure().await
            };

            if attempt >= max_attempts {
                return Err(UpstreamError::RetriesExhausted {
                    query: query.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            if failure == FailureType::Transient && !cooled_down {
                self.limiter.apply_backoff(attempt).await?;
            }
            attempt += 1;
        }
    }

    async fn search_once(&self, query: &str) -> Result<Vec<super::RawSearchHit>> {
        let search_id = self.service.search(query).await?;
        if !self.search_wait.is_zero() {
            self.clock.sleep(self.search_wait).await;
        }
        self.service.search_results(&search_id).await
    }

    /// Every transfer in the service's queue.
    ///
    /// # Errors
    ///
    /// Returns the service error unchanged.
    #[instrument(skip(self))]
    pub async fn get_download_queue(&self) -> Result<Vec<TransferStatus>> {
        self.throttle().await;
        self.service.list_queue().await
    }

    /// Enqueues one file and returns its transfer id, if the service gave one.
    ///
    /// # Errors
    ///
    /// Returns the service error unchanged.
    #[instrument(skip(self))]
    pub async fn add_download(
        &self,
        username: &str,
        filename: &str,
        size: u64,
    ) -> Result<Option<String>> {
        self.throttle().await;
        let files = [EnqueueFile {
            filename: filename.to_string(),
            size,
        }];
        let id = self.service.enqueue_download(username, &files).await?;
        match &id {
            Some(id) => info!(transfer_id = %id, "download enqueued"),
            None => warn!("service accepted the download without a transfer id"),
        }
        Ok(id)
    }

    /// Cancels and removes a transfer.
    ///
    /// # Errors
    ///
    /// Returns the service error unchanged.
    #[instrument(skip(self))]
    pub async fn remove_download(&self, transfer_id: &str) -> Result<()> {
        self.throttle().await;
        self.service.cancel_download(transfer_id).await
    }

    /// Current status of a transfer, or `None` if it vanished.
    ///
    /// # Errors
    ///
    /// Returns the service error unchanged.
    #[instrument(skip(self))]
    pub async fn get_download_status(&self, transfer_id: &str) -> Result<Option<TransferStatus>> {
        self.throttle().await;
        self.service.download_status(transfer_id).await
    }

    async fn throttle(&self) {
        self.limiter.wait_if_needed().await;
        self.limiter.record_request().await;
    }
}

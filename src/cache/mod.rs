//! TTL cache for upstream search results.
//!
//! Queries are reduced to a fixed-width key (SHA-256 of the trimmed,
//! whitespace-collapsed, lower-cased text) before they touch the store, so
//! the cache never compares free text. Empty result sets are never written:
//! a transient "nothing found" must not stick for a whole TTL.
//!
//! The cache degrades instead of failing: a store error on read is logged and
//! treated as a miss, and a store error on write is logged and ignored.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::dedup::sha256_hex;
use crate::store::{ResultDescriptor, Store};

/// Search-result cache over the `search_cache` table.
#[derive(Debug, Clone)]
pub struct SearchCache {
    store: Store,
    ttl: Duration,
    auto_cleanup: bool,
}

impl SearchCache {
    /// Creates a cache with a default entry lifetime.
    ///
    /// With `auto_cleanup`, every read first sweeps expired rows.
    #[must_use]
    pub fn new(store: Store, ttl: Duration, auto_cleanup: bool) -> Self {
        Self {
            store,
            ttl,
            auto_cleanup,
        }
    }

    /// Default entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key for a query.
    ///
    /// ```
    /// use trackhound_core::SearchCache;
    ///
    /// assert_eq!(
    ///     SearchCache::query_hash("  Black   Hole SUN "),
    ///     SearchCache::query_hash("black hole sun")
    /// );
    /// assert_ne!(
    ///     SearchCache::query_hash("black hole sun"),
    ///     SearchCache::query_hash("black hole sun flac")
    /// );
    /// assert_eq!(SearchCache::query_hash("x").len(), 64);
    /// ```
    #[must_use]
    pub fn query_hash(query: &str) -> String {
        sha256_hex(normalize_query(query).as_bytes())
    }

    /// Cached results for `query`, or `None` on a miss.
    #[instrument(skip(self))]
    pub async fn get_cached_results(&self, query: &str) -> Option<Vec<ResultDescriptor>> {
        if self.auto_cleanup {
            self.cleanup_expired().await;
        }

        match self.store.get_cached_search(&Self::query_hash(query)).await {
            Ok(Some(results)) => {
                debug!(count = results.len(), "cache hit");
                Some(results)
            }
            Ok(None) => {
                debug!("cache miss");
                None
            }
            Err(error) => {
                warn!(%error, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Stores `results` for `query`, expiring after `ttl` (or the default).
    ///
    /// Returns whether a row was written. Empty results are skipped.
    #[instrument(skip(self, results), fields(count = results.len()))]
    pub async fn save_results(
        &self,
        query: &str,
        results: &[ResultDescriptor],
        ttl: Option<Duration>,
    ) -> bool {
        if results.is_empty() {
            debug!("not caching empty results");
            return false;
        }

        let ttl = ttl.unwrap_or(self.ttl);
        match self
            .store
            .save_cached_search(&Self::query_hash(query), query, results, ttl)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "cache write failed");
                false
            }
        }
    }

    /// Returns cached results, or runs `search` and caches a non-empty outcome.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `search` on a miss.
    pub async fn search_with_cache<F, Fut, E>(
        &self,
        query: &str,
        search: F,
    ) -> Result<Vec<ResultDescriptor>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ResultDescriptor>, E>>,
    {
        if let Some(results) = self.get_cached_results(query).await {
            return Ok(results);
        }

        let results = search().await?;
        self.save_results(query, &results, None).await;
        Ok(results)
    }

    /// Removes expired rows and returns how many were deleted (0 on error).
    pub async fn cleanup_expired(&self) -> u64 {
        match self.store.cleanup_expired_cache().await {
            Ok(removed) => removed,
            Err(error) => {
                warn!(%error, "cache cleanup failed");
                0
            }
        }
    }
}

/// Trims, collapses inner whitespace and lower-cases a query.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

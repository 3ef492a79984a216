//! Persistent store for download attempts and cached searches.
//!
//! A single SQLite file holds two tables:
//! - `downloads` - one row per finalized playlist line ([`DownloadRecord`])
//! - `search_cache` - one row per distinct query hash ([`SearchCacheEntry`])
//!
//! Every write is a single-statement upsert, so a crashed run leaves only
//! complete rows behind and re-recording the same id is harmless.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trackhound_core::{DownloadStatus, NewDownloadRecord, Store, SystemClock};
//!
//! let store = Store::open(Path::new("trackhound.db"), Arc::new(SystemClock)).await?;
//! let record = NewDownloadRecord { file_line: "Artist - Song", ..Default::default() };
//! store.record_download(&record, DownloadStatus::NotFound).await?;
//! assert!(!store.is_downloaded("Artist - Song").await?);
//! ```

mod error;
mod models;

pub use error::{DbErrorKind, StoreError};
pub use models::{
    DownloadRecord, DownloadStatus, NewDownloadRecord, ResultDescriptor, SearchCacheEntry,
};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::db::{Database, DbError};
use crate::dedup::normalize_filename;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 10_000;

/// Typed access to the `downloads` and `search_cache` tables.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Opens (creating if needed) the store file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the file cannot be opened or migrated.
    pub async fn open(path: &Path, clock: Arc<dyn Clock>) -> std::result::Result<Self, DbError> {
        Ok(Self::new(Database::new(path).await?, clock))
    }

    /// Opens a throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when migrations fail.
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> std::result::Result<Self, DbError> {
        Ok(Self::new(Database::new_in_memory().await?, clock))
    }

    /// Underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts or replaces a download row and returns its id.
    ///
    /// The normalized filename is derived here so every row carries the same
    /// comparison key the duplicate detector computes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, record), fields(line = %record.file_line, status = %status))]
    pub async fn record_download(
        &self,
        record: &NewDownloadRecord<'_>,
        status: DownloadStatus,
    ) -> Result<String> {
        let id = record
            .id
            .map_or_else(generate_record_id, ToString::to_string);
        let now = self.clock.unix_timestamp();
        let normalized = normalize_filename(record.filename);

        sqlx::query(
            r"INSERT OR REPLACE INTO downloads (
                id,
                username,
                filename,
                filename_normalized,
                file_line,
                status,
                file_size,
                file_hash,
                error_message,
                requested_at,
                created_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(record.username)
        .bind(record.filename)
        .bind(&normalized)
        .bind(record.file_line)
        .bind(status.as_str())
        .bind(record.file_size)
        .bind(record.file_hash)
        .bind(record.error_message)
        .bind(record.requested_at.unwrap_or(now))
        .bind(now)
        .execute(self.db.pool())
        .await?;

        debug!(id = %id, "recorded download");
        Ok(id)
    }

    /// Fetches a single row by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_download(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query_as::<_, DownloadRecord>("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    /// Whether `line` already has a `SUCCESS` row (exact text match).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_downloaded(&self, line: &str) -> Result<bool> {
        self.exists_success("file_line", line).await
    }

    /// Whether a `SUCCESS` row carries this normalized filename.
    ///
    /// Empty keys never match.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_duplicate_by_normalized_name(&self, normalized_name: &str) -> Result<bool> {
        if normalized_name.trim().is_empty() {
            return Ok(false);
        }
        self.exists_success("filename_normalized", normalized_name)
            .await
    }

    /// Whether a `SUCCESS` row carries this content hash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_duplicate_by_hash(&self, file_hash: &str) -> Result<bool> {
        if file_hash.trim().is_empty() {
            return Ok(false);
        }
        self.exists_success("file_hash", file_hash).await
    }

    async fn exists_success(&self, column: &'static str, value: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM downloads WHERE {column} = ? AND status = ?)");
        let (exists,): (i64,) = sqlx::query_as(&sql)
            .bind(value)
            .bind(DownloadStatus::Success.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists != 0)
    }

    /// Requested lines of every `SUCCESS` row, for fuzzy comparison.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn successful_lines(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT file_line FROM downloads WHERE status = ?")
                .bind(DownloadStatus::Success.as_str())
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows.into_iter().map(|(line,)| line).collect())
    }

    /// Most recent rows first, optionally filtered by status.
    ///
    /// A zero `limit` uses the default page size; larger limits are capped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn recent_downloads(
        &self,
        limit: usize,
        status: Option<DownloadStatus>,
    ) -> Result<Vec<DownloadRecord>> {
        let limit = if limit == 0 {
            DEFAULT_HISTORY_LIMIT
        } else {
            limit.min(MAX_HISTORY_LIMIT)
        };
        #[allow(clippy::cast_possible_wrap)]
        let limit = limit as i64;

        let rows = if let Some(status) = status {
            sqlx::query_as::<_, DownloadRecord>(
                "SELECT * FROM downloads WHERE status = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?
        } else {
            sqlx::query_as::<_, DownloadRecord>(
                "SELECT * FROM downloads ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?
        };
        Ok(rows)
    }

    /// Row counts per status. Statuses without rows report zero.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<BTreeMap<DownloadStatus, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM downloads GROUP BY status")
                .fetch_all(self.db.pool())
                .await?;

        let mut stats: BTreeMap<DownloadStatus, i64> =
            DownloadStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in rows {
            match status.parse::<DownloadStatus>() {
                Ok(status) => {
                    stats.insert(status, count);
                }
                Err(error) => warn!(%error, "ignoring unknown status in stats"),
            }
        }
        Ok(stats)
    }

    /// Cached results for `query_hash`, or `None` when missing, expired or malformed.
    ///
    /// An expired row found here is deleted on the spot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_cached_search(&self, query_hash: &str) -> Result<Option<Vec<ResultDescriptor>>> {
        let Some(entry) = self.get_cache_entry(query_hash).await? else {
            return Ok(None);
        };

        let now = self.clock.unix_timestamp();
        if entry.is_expired_at(now) {
            debug!(expires_at = entry.expires_at, now, "cache entry expired");
            sqlx::query("DELETE FROM search_cache WHERE query_hash = ? AND expires_at <= ?")
                .bind(query_hash)
                .bind(now)
                .execute(self.db.pool())
                .await?;
            return Ok(None);
        }

        match entry.parse_results() {
            Some(results) => Ok(Some(results)),
            None => {
                warn!(query = %entry.query_text, "malformed cache row, treating as miss");
                Ok(None)
            }
        }
    }

    /// Raw cache row regardless of expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_cache_entry(&self, query_hash: &str) -> Result<Option<SearchCacheEntry>> {
        let entry = sqlx::query_as::<_, SearchCacheEntry>(
            "SELECT * FROM search_cache WHERE query_hash = ?",
        )
        .bind(query_hash)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(entry)
    }

    /// Writes (or overwrites) a cache row expiring `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the results cannot be encoded,
    /// or [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, results), fields(count = results.len()))]
    pub async fn save_cached_search(
        &self,
        query_hash: &str,
        query_text: &str,
        results: &[ResultDescriptor],
        ttl: Duration,
    ) -> Result<()> {
        let encoded = serde_json::to_string(results).map_err(|e| StoreError::Serialization {
            query: query_text.to_string(),
            message: e.to_string(),
        })?;
        let created_at = self.clock.unix_timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = created_at.saturating_add(ttl_secs);

        sqlx::query(
            r"INSERT OR REPLACE INTO search_cache (query_hash, query_text, results, created_at, expires_at)
              VALUES (?, ?, ?, ?, ?)",
        )
        .bind(query_hash)
        .bind(query_text)
        .bind(encoded)
        .bind(created_at)
        .bind(expires_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Deletes every expired cache row and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_cache(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM search_cache WHERE expires_at <= ?")
            .bind(self.clock.unix_timestamp())
            .execute(self.db.pool())
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "removed expired cache rows");
        }
        Ok(removed)
    }

    /// Number of rows in the search cache, expired ones included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn cache_entry_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM search_cache")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

fn generate_record_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

//! Record types persisted by the store.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Terminal outcome of a playlist line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    /// The track was fetched (or assumed fetched at the monitoring timeout).
    Success,
    /// Search, enqueue or transfer failed.
    Error,
    /// No search pattern produced a usable candidate.
    NotFound,
}

impl DownloadStatus {
    /// All statuses, in storage order.
    pub const ALL: [Self; 3] = [Self::Success, Self::Error, Self::NotFound];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "NOT_FOUND" => Ok(Self::NotFound),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// Insert payload for a finalized line.
///
/// `id` is generated when absent; reusing an id replaces the earlier row.
#[derive(Debug, Clone, Default)]
pub struct NewDownloadRecord<'a> {
    /// Stable id for idempotent re-recording.
    pub id: Option<&'a str>,
    /// Remote peer that supplied the file (empty when none).
    pub username: &'a str,
    /// Raw remote path of the file (empty when none).
    pub filename: &'a str,
    /// Requested playlist line, verbatim.
    pub file_line: &'a str,
    /// Size in bytes when known.
    pub file_size: Option<i64>,
    /// Content hash of a locally verified file.
    pub file_hash: Option<&'a str>,
    /// Failure description for `ERROR` rows.
    pub error_message: Option<&'a str>,
    /// When the line was picked up; defaults to the insert time.
    pub requested_at: Option<i64>,
}

/// A stored download attempt.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Unique identifier.
    pub id: String,
    /// Remote peer that supplied the file.
    pub username: String,
    /// Raw remote path.
    pub filename: String,
    /// Normalized comparison key derived from `filename`.
    pub filename_normalized: String,
    /// Requested playlist line.
    pub file_line: String,
    /// Stored status text, parsed via [`DownloadRecord::status`].
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Size in bytes when known.
    pub file_size: Option<i64>,
    /// Content hash of a locally verified file.
    pub file_hash: Option<String>,
    /// Failure description for `ERROR` rows.
    pub error_message: Option<String>,
    /// Unix seconds when the line was picked up.
    pub requested_at: i64,
    /// Unix seconds when the row was written.
    pub created_at: i64,
}

impl DownloadRecord {
    /// Returns the parsed status, falling back to `Error` for unknown text.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status_str.parse().unwrap_or(DownloadStatus::Error)
    }
}

/// One search hit in the canonical shape callers and the cache see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDescriptor {
    /// Peer offering the file.
    pub username: String,
    /// Remote path of the file.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Bit rate in kbps, when reported.
    #[serde(default)]
    pub bit_rate: Option<u32>,
    /// Bits per sample, when reported.
    #[serde(default)]
    pub bit_depth: Option<u32>,
    /// Sample rate in Hz, when reported.
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

/// A cached search, as stored.
#[derive(Debug, Clone, FromRow)]
pub struct SearchCacheEntry {
    /// Hash of the normalized query text.
    pub query_hash: String,
    /// Original query text.
    pub query_text: String,
    /// JSON-encoded list of [`ResultDescriptor`].
    pub results: String,
    /// Unix seconds when the entry was written.
    pub created_at: i64,
    /// Unix seconds after which the entry is treated as absent.
    pub expires_at: i64,
}

impl SearchCacheEntry {
    /// Decodes the stored results, or `None` if the JSON is malformed.
    #[must_use]
    pub fn parse_results(&self) -> Option<Vec<ResultDescriptor>> {
        serde_json::from_str(&self.results).ok()
    }

    /// Whether the entry is expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

//! Playlist orchestration.
//!
//! Each line moves through
//!
//! ```text
//! PENDING ─┬─> DUPLICATE                                   (dropped)
//!          └─> SEARCHING ─┬─> NOT_FOUND                    (kept)
//!                         └─> FOUND ─> DOWNLOADING ─┬─> SUCCESS  (dropped)
//!                                                   └─> ERROR    (kept)
//! ```
//!
//! Lines are handled strictly one at a time. Per-line failures are recorded
//! and counted but never stop the batch; only failing to open the store or
//! to take the process lock ends a run early. Cancellation is checked between
//! lines.

mod monitor;
mod playlist;
mod select;

pub use monitor::{MonitorSettings, PollTimer, TransferOutcome, monitor_transfer};
pub use playlist::{parse_playlist, read_playlist, rewrite_playlist};
pub use select::{
    AUDIO_EXTENSIONS, QualityTier, extension_of, is_audio_file, is_remix, search_patterns,
    select_best_candidate,
};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::SearchCache;
use crate::clock::Clock;
use crate::config::{PipelineConfig, TimeoutPolicy};
use crate::db::DbError;
use crate::dedup::{DuplicateDetector, DuplicateReason, DuplicateVerdict, extract_artist_song};
use crate::lock::{LockError, ProcessLock};
use crate::store::{DownloadStatus, NewDownloadRecord, ResultDescriptor, Store};
use crate::upstream::{
    RateLimitSettings, RateLimiter, TransferService, TransferState, TransferStatus,
    UpstreamClient,
};

/// Conditions that end a run before or instead of processing lines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The store could not be opened.
    #[error("failed to open store: {0}")]
    Db(#[from] DbError),

    /// The process lock could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The playlist could not be read or rewritten.
    #[error("playlist {path}: {source}")]
    Io {
        /// Playlist path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Shared flag for cooperative cancellation between lines.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-line processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Not yet examined.
    Pending,
    /// Trying search patterns.
    Searching,
    /// A candidate was selected.
    Found,
    /// A transfer is being monitored.
    Downloading,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Searching => "SEARCHING",
            Self::Found => "FOUND",
            Self::Downloading => "DOWNLOADING",
        };
        write!(f, "{label}")
    }
}

/// Terminal result for one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Already satisfied; nothing recorded.
    Duplicate(DuplicateReason),
    /// Fetched (or assumed fetched at the timeout).
    Success,
    /// Search, enqueue or transfer failed.
    Error(String),
    /// No usable candidate.
    NotFound,
}

impl LineOutcome {
    /// Label used in logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "DUPLICATE",
            Self::Success => "SUCCESS",
            Self::Error(_) => "ERROR",
            Self::NotFound => "NOT_FOUND",
        }
    }

    /// Whether the line stays in the playlist for a later run.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Error(_) | Self::NotFound)
    }
}

impl fmt::Display for LineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(reason) => write!(f, "DUPLICATE ({reason})"),
            Self::Error(message) => write!(f, "ERROR ({message})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Progress notification for one finalized line.
#[derive(Debug, Clone)]
pub struct LineReport {
    /// Zero-based position in the batch.
    pub index: usize,
    /// Batch size.
    pub total: usize,
    /// The line text.
    pub line: String,
    /// How it ended.
    pub outcome: LineOutcome,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Lines that reached a terminal outcome.
    pub processed: usize,
    /// Transfers enqueued or adopted from the queue.
    pub started: usize,
    /// Lines recorded as `SUCCESS`.
    pub completed: usize,
    /// Lines skipped as duplicates.
    pub duplicates: usize,
    /// Lines recorded as `ERROR`.
    pub errors: usize,
    /// Lines recorded as `NOT_FOUND`.
    pub not_found: usize,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

impl RunStats {
    fn record(&mut self, outcome: &LineOutcome) {
        self.processed += 1;
        match outcome {
            LineOutcome::Duplicate(_) => self.duplicates += 1,
            LineOutcome::Success => self.completed += 1,
            LineOutcome::Error(_) => self.errors += 1,
            LineOutcome::NotFound => self.not_found += 1,
        }
    }
}

/// Result of processing a batch.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Counters.
    pub stats: RunStats,
    /// Lines to keep for a later run, in input order.
    pub pending: Vec<String>,
}

/// Callback invoked after each finalized line.
pub type ProgressCallback = Box<dyn Fn(&LineReport) + Send + Sync>;

struct LineRun {
    outcome: LineOutcome,
    searched: bool,
    started: bool,
}

impl LineRun {
    fn local(outcome: LineOutcome) -> Self {
        Self {
            outcome,
            searched: false,
            started: false,
        }
    }

    fn searched(outcome: LineOutcome, started: bool) -> Self {
        Self {
            outcome,
            searched: true,
            started,
        }
    }
}

#[derive(Default)]
struct RowDetails<'a> {
    candidate: Option<&'a ResultDescriptor>,
    file_size: Option<i64>,
    file_hash: Option<&'a str>,
    error_message: Option<&'a str>,
}

/// Drives lines through duplicate detection, search, transfer and recording.
pub struct PlaylistOrchestrator {
    store: Store,
    detector: DuplicateDetector,
    client: UpstreamClient,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    cancel: CancellationFlag,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for PlaylistOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistOrchestrator")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

impl PlaylistOrchestrator {
    /// Builds every component from `config` around an open store.
    #[must_use]
    pub fn new(
        store: Store,
        service: Arc<dyn TransferService>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let detector = DuplicateDetector::new(store.clone(), config.fuzzy_threshold);
        let cache = SearchCache::new(store.clone(), config.cache_ttl, config.cache_auto_cleanup);
        let limiter = RateLimiter::new(RateLimitSettings::from(&config), Arc::clone(&clock));
        let client = UpstreamClient::new(
            service,
            limiter,
            cache,
            Arc::clone(&clock),
            config.search_wait,
        );
        Self {
            store,
            detector,
            client,
            clock,
            config,
            cancel: CancellationFlag::new(),
            progress: None,
        }
    }

    /// Opens the store at `db_path` and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] if the store cannot be opened.
    pub async fn open(
        db_path: &Path,
        service: Arc<dyn TransferService>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let store = Store::open(db_path, Arc::clone(&clock)).await?;
        Ok(Self::new(store, service, clock, config))
    }

    /// Uses an externally owned cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Installs a per-line progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: impl Fn(&LineReport) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Handle for cancelling a run from elsewhere.
    #[must_use]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The duplicate detector.
    #[must_use]
    pub fn detector(&self) -> &DuplicateDetector {
        &self.detector
    }

    /// The upstream client.
    #[must_use]
    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    /// Takes `lock`, processes the playlist file and rewrites it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Lock`] when another instance holds the lock,
    /// or [`PipelineError::Io`] when the playlist cannot be read or written.
    pub async fn run_locked(
        &self,
        lock: &ProcessLock,
        playlist: &Path,
    ) -> Result<RunReport, PipelineError> {
        let _guard = lock.acquire_guard()?;
        self.process_file(playlist).await
    }

    /// Processes a playlist file and rewrites it with the lines still pending.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] when the playlist cannot be read or
    /// written.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn process_file(&self, path: &Path) -> Result<RunReport, PipelineError> {
        let lines = read_playlist(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let report = self.process_lines(&lines).await;
        rewrite_playlist(path, &report.pending)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        debug!(remaining = report.pending.len(), "playlist rewritten");
        Ok(report)
    }

    /// Processes lines in order and returns counters plus the lines to keep.
    #[instrument(skip(self, lines), fields(total = lines.len()))]
    pub async fn process_lines(&self, lines: &[String]) -> RunReport {
        let total = lines.len();
        let mut report = RunReport::default();

        for (index, line) in lines.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = total - index, "run cancelled");
                report.stats.cancelled = true;
                report.pending.extend(lines[index..].iter().cloned());
                break;
            }

            let run = self.process_line(line).await;
            report.stats.record(&run.outcome);
            if run.started {
                report.stats.started += 1;
            }
            if run.outcome.is_retained() {
                report.pending.push(line.clone());
            }

            if let Some(callback) = &self.progress {
                callback(&LineReport {
                    index,
                    total,
                    line: line.clone(),
                    outcome: run.outcome.clone(),
                });
            }

            let more = index + 1 < total && !self.cancel.is_cancelled();
            if run.searched && more && !self.config.inter_download_pause.is_zero() {
                self.clock.sleep(self.config.inter_download_pause).await;
            }
        }

        let stats = report.stats;
        info!(
            processed = stats.processed,
            started = stats.started,
            completed = stats.completed,
            duplicates = stats.duplicates,
            errors = stats.errors,
            not_found = stats.not_found,
            cancelled = stats.cancelled,
            "run finished"
        );
        report
    }

    #[instrument(skip(self), fields(line = %line))]
    async fn process_line(&self, line: &str) -> LineRun {
        let requested_at = self.clock.unix_timestamp();
        let (artist, song) = extract_artist_song(line);
        debug!(state = %LineState::Pending, %artist, %song);

        match self
            .detector
            .check_all_duplicates(line, None, &artist, &song)
            .await
        {
            Ok(DuplicateVerdict::Duplicate(reason)) => {
                info!(%reason, "already downloaded, skipping");
                return LineRun::local(LineOutcome::Duplicate(reason));
            }
            Ok(DuplicateVerdict::New) => {}
            Err(err) => {
                let message = format!("duplicate check failed: {err}");
                error!(%message);
                return LineRun::local(
                    self.finish_error(line, requested_at, None, message).await,
                );
            }
        }

        debug!(state = %LineState::Searching);
        let candidate = match self.find_candidate(line, &artist, &song).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                info!("no candidate found");
                self.record(line, DownloadStatus::NotFound, requested_at, RowDetails::default())
                    .await;
                return LineRun::searched(LineOutcome::NotFound, false);
            }
            Err(message) => {
                error!(%message, "search failed");
                let outcome = self.finish_error(line, requested_at, None, message).await;
                return LineRun::searched(outcome, false);
            }
        };
        debug!(state = %LineState::Found, username = %candidate.username, filename = %candidate.filename);

        match self
            .detector
            .check_all_duplicates(line, Some(&candidate.filename), &artist, &song)
            .await
        {
            Ok(DuplicateVerdict::Duplicate(reason)) => {
                info!(%reason, filename = %candidate.filename, "candidate already downloaded");
                return LineRun::searched(LineOutcome::Duplicate(reason), false);
            }
            Ok(DuplicateVerdict::New) => {}
            Err(err) => warn!(%err, "candidate duplicate check failed, continuing"),
        }

        let transfer_id = match self.start_transfer(&candidate).await {
            Ok(id) => id,
            Err(message) => {
                error!(%message, "could not start transfer");
                let outcome = self
                    .finish_error(line, requested_at, Some(&candidate), message)
                    .await;
                return LineRun::searched(outcome, false);
            }
        };

        debug!(state = %LineState::Downloading, %transfer_id);
        let settings = MonitorSettings {
            poll_interval: self.config.poll_interval,
            timeout: self.config.download_timeout,
            remote_queue_grace: self.config.remote_queue_grace,
        };
        let transfer =
            monitor_transfer(&self.client, self.clock.as_ref(), &transfer_id, settings).await;
        let outcome = self
            .finish_transfer(line, requested_at, &candidate, &transfer_id, transfer)
            .await;
        LineRun::searched(outcome, true)
    }

    /// First non-empty pattern whose results yield a candidate.
    async fn find_candidate(
        &self,
        line: &str,
        artist: &str,
        song: &str,
    ) -> Result<Option<ResultDescriptor>, String> {
        for pattern in search_patterns(artist, song) {
            let results = self
                .client
                .search_tracks_cached(&pattern)
                .await
                .map_err(|e| format!("search '{pattern}' failed: {e}"))?;
            debug!(%pattern, count = results.len(), "search results");
            if let Some(candidate) = select_best_candidate(&results, line) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Reuses a matching live transfer or enqueues a new one.
    async fn start_transfer(&self, candidate: &ResultDescriptor) -> Result<String, String> {
        if let Some(existing) = self.queued_transfer(candidate).await {
            if existing.state.is_failure() {
                debug!(id = %existing.id, state = %existing.state, "clearing failed transfer");
                if let Err(err) = self.client.remove_download(&existing.id).await {
                    warn!(%err, "could not clear failed transfer");
                }
            } else {
                info!(id = %existing.id, state = %existing.state, "already queued, not enqueueing again");
                return Ok(existing.id);
            }
        }

        let id = self
            .client
            .add_download(&candidate.username, &candidate.filename, candidate.size)
            .await
            .map_err(|e| format!("enqueue failed: {e}"))?;
        if let Some(id) = id {
            return Ok(id);
        }

        self.queued_transfer(candidate)
            .await
            .map(|transfer| transfer.id)
            .ok_or_else(|| "enqueue returned no transfer id".to_string())
    }

    async fn queued_transfer(&self, candidate: &ResultDescriptor) -> Option<TransferStatus> {
        match self.client.get_download_queue().await {
            Ok(queue) => queue
                .into_iter()
                .find(|transfer| transfer.matches(&candidate.username, &candidate.filename)),
            Err(err) => {
                warn!(%err, "could not read download queue");
                None
            }
        }
    }

    async fn finish_transfer(
        &self,
        line: &str,
        requested_at: i64,
        candidate: &ResultDescriptor,
        transfer_id: &str,
        transfer: TransferOutcome,
    ) -> LineOutcome {
        match transfer {
            TransferOutcome::Succeeded(status) => {
                self.remove_transfer(transfer_id).await;
                self.finish_success(line, requested_at, candidate, status.size)
                    .await
            }
            TransferOutcome::Failed(state) => {
                self.remove_transfer(transfer_id).await;
                self.finish_error(
                    line,
                    requested_at,
                    Some(candidate),
                    format!("transfer ended as {state}"),
                )
                .await
            }
            TransferOutcome::Stalled { queued_for } => {
                self.remove_transfer(transfer_id).await;
                self.finish_error(
                    line,
                    requested_at,
                    Some(candidate),
                    format!("remote queue stalled for {}s", queued_for.as_secs()),
                )
                .await
            }
            TransferOutcome::TimedOut { last_state } => {
                let in_progress = last_state == Some(TransferState::InProgress);
                if in_progress && self.config.timeout_policy == TimeoutPolicy::AssumeSuccess {
                    warn!(%transfer_id, "transfer still in progress at timeout, assuming success");
                    return self
                        .finish_success(line, requested_at, candidate, candidate.size)
                        .await;
                }
                self.remove_transfer(transfer_id).await;
                let state = last_state.map_or_else(|| "unknown".to_string(), |s| s.to_string());
                self.finish_error(
                    line,
                    requested_at,
                    Some(candidate),
                    format!("transfer timed out (last state {state})"),
                )
                .await
            }
        }
    }

    async fn finish_success(
        &self,
        line: &str,
        requested_at: i64,
        candidate: &ResultDescriptor,
        size: u64,
    ) -> LineOutcome {
        let mut file_size = i64::try_from(size).ok().filter(|s| *s > 0);
        let mut file_hash = None;

        if let Some(path) = self.locate_local_file(&candidate.filename).await {
            match self.detector.check_file_hash(&path).await {
                Ok(check) if check.is_duplicate => {
                    info!(path = %path.display(), "identical file already recorded");
                    return LineOutcome::Duplicate(DuplicateReason::FileHashMatch);
                }
                Ok(check) => {
                    file_hash = Some(check.hash);
                    if let Ok(metadata) = tokio::fs::metadata(&path).await {
                        file_size = i64::try_from(metadata.len()).ok();
                    }
                }
                Err(err) => warn!(%err, "could not hash downloaded file"),
            }
        }

        self.record(
            line,
            DownloadStatus::Success,
            requested_at,
            RowDetails {
                candidate: Some(candidate),
                file_size,
                file_hash: file_hash.as_deref(),
                error_message: None,
            },
        )
        .await;
        info!(filename = %candidate.filename, "download complete");
        LineOutcome::Success
    }

    async fn finish_error(
        &self,
        line: &str,
        requested_at: i64,
        candidate: Option<&ResultDescriptor>,
        message: String,
    ) -> LineOutcome {
        self.record(
            line,
            DownloadStatus::Error,
            requested_at,
            RowDetails {
                candidate,
                file_size: None,
                file_hash: None,
                error_message: Some(&message),
            },
        )
        .await;
        LineOutcome::Error(message)
    }

    async fn record(
        &self,
        line: &str,
        status: DownloadStatus,
        requested_at: i64,
        details: RowDetails<'_>,
    ) {
        let record = NewDownloadRecord {
            id: None,
            username: details.candidate.map_or("", |c| c.username.as_str()),
            filename: details.candidate.map_or("", |c| c.filename.as_str()),
            file_line: line,
            file_size: details.file_size,
            file_hash: details.file_hash,
            error_message: details.error_message,
            requested_at: Some(requested_at),
        };
        if let Err(err) = self.store.record_download(&record, status).await {
            error!(%err, %status, "failed to record outcome");
        }
    }

    async fn remove_transfer(&self, transfer_id: &str) {
        if let Err(err) = self.client.remove_download(transfer_id).await {
            warn!(%transfer_id, %err, "could not remove transfer from queue");
        }
    }

    /// Where the service is expected to have written a finished file.
    async fn locate_local_file(&self, remote: &str) -> Option<PathBuf> {
        let dir = self.config.download_dir.as_ref()?;
        let mut segments = remote.rsplit(['/', '\\']).filter(|s| !s.is_empty());
        let basename = segments.next()?;
        let mut candidates = Vec::with_capacity(2);
        if let Some(parent) = segments.next() {
            candidates.push(dir.join(parent).join(basename));
        }
        candidates.push(dir.join(basename));

        for path in candidates {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        debug!(remote, "completed file not found locally");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_retention() {
        assert!(LineOutcome::NotFound.is_retained());
        assert!(LineOutcome::Error("x".to_string()).is_retained());
        assert!(!LineOutcome::Success.is_retained());
        assert!(!LineOutcome::Duplicate(DuplicateReason::ExactLineMatch).is_retained());
    }

    #[test]
    fn test_stats_record_counts_each_outcome() {
        let mut stats = RunStats::default();
        stats.record(&LineOutcome::Success);
        stats.record(&LineOutcome::NotFound);
        stats.record(&LineOutcome::Duplicate(DuplicateReason::ExactLineMatch));
        stats.record(&LineOutcome::Error("boom".to_string()));
        assert_eq!(
            stats,
            RunStats {
                processed: 4,
                started: 0,
                completed: 1,
                duplicates: 1,
                errors: 1,
                not_found: 1,
                cancelled: false,
            }
        );
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            LineOutcome::Duplicate(DuplicateReason::FuzzyMatch {
                similarity: 0.9,
                matched_line: "x".to_string()
            })
            .to_string(),
            "DUPLICATE (fuzzy_match)"
        );
        assert_eq!(LineOutcome::NotFound.to_string(), "NOT_FOUND");
    }
}

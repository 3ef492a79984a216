//! Trackhound Core Library
//!
//! This library turns a plain-text playlist of `Artist - Album - Track` lines
//! into completed downloads from a peer-to-peer search/transfer service,
//! skipping anything already fetched and keeping only unresolved lines for
//! the next run.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`store`] - Download history and search cache persistence
//! - [`dedup`] - Three-check duplicate detection
//! - [`cache`] - TTL-bounded search result cache
//! - [`upstream`] - Rate-limited, retrying client for the transfer service
//! - [`lock`] - Single-instance process lock with staleness recovery
//! - [`pipeline`] - Playlist orchestration
//! - [`config`] - Runtime settings shared by every component
//! - [`clock`] - Injectable time source

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod lock;
pub mod pipeline;
pub mod store;
pub mod upstream;

// Re-export commonly used types
pub use cache::SearchCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PipelineConfig, TimeoutPolicy};
pub use db::{Database, DbError};
pub use dedup::{DuplicateDetector, DuplicateReason, DuplicateVerdict};
pub use lock::{LockError, LockRecord, ProcessLock};
pub use pipeline::{
    CancellationFlag, LineOutcome, LineReport, PipelineError, PlaylistOrchestrator, RunReport,
    RunStats,
};
pub use store::{
    DownloadRecord, DownloadStatus, NewDownloadRecord, ResultDescriptor, Store, StoreError,
};
pub use upstream::{
    FailureType, RateLimitSettings, RateLimiter, SlskdService, TransferService, TransferState,
    TransferStatus, UpstreamClient, UpstreamError,
};

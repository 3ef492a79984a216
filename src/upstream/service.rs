//! Trait seam for the external search/transfer service.

use async_trait::async_trait;

use super::error::UpstreamError;
use super::types::{EnqueueFile, RawSearchHit, TransferStatus};

/// Result type for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Operations the pipeline needs from the upstream service.
///
/// [`SlskdService`](super::SlskdService) talks HTTP; tests plug in an
/// in-memory fake.
#[async_trait]
pub trait TransferService: Send + Sync + std::fmt::Debug {
    /// Starts a search and returns its id.
    async fn search(&self, query: &str) -> Result<String>;

    /// Hits collected so far for a search.
    async fn search_results(&self, search_id: &str) -> Result<Vec<RawSearchHit>>;

    /// Enqueues files from one peer; returns the first transfer id, if any.
    async fn enqueue_download(
        &self,
        username: &str,
        files: &[EnqueueFile],
    ) -> Result<Option<String>>;

    /// Status of a transfer, or `None` if it no longer exists.
    async fn download_status(&self, transfer_id: &str) -> Result<Option<TransferStatus>>;

    /// Cancels a transfer and removes it from the queue.
    async fn cancel_download(&self, transfer_id: &str) -> Result<()>;

    /// Every transfer currently in the download queue.
    async fn list_queue(&self) -> Result<Vec<TransferStatus>>;
}

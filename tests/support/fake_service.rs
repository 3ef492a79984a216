//! In-memory stand-in for the transfer service.
//!
//! Search results are keyed by exact query text. Each enqueued file follows a
//! scripted list of states, advancing one state per status poll and staying
//! on the last one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use trackhound_core::upstream::{EnqueueFile, RawSearchHit, Result};
use trackhound_core::{TransferService, TransferState, TransferStatus, UpstreamError};

#[derive(Debug, Default)]
struct State {
    results: HashMap<String, Vec<RawSearchHit>>,
    search_failures: VecDeque<u16>,
    searches: Vec<String>,
    search_ids: HashMap<String, String>,
    scripts: HashMap<String, VecDeque<TransferState>>,
    queue: Vec<TransferStatus>,
    enqueued: Vec<(String, String)>,
    cancelled: Vec<String>,
    status_polls: usize,
    next_id: u32,
}

#[derive(Debug, Default)]
pub struct FakeService {
    state: Mutex<State>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Results returned for `query`.
    pub fn add_results(&self, query: &str, hits: Vec<RawSearchHit>) {
        self.state().results.insert(query.to_string(), hits);
    }

    /// States a transfer of `filename` reports, one per status poll.
    pub fn script_transfer(&self, filename: &str, states: &[TransferState]) {
        self.state()
            .scripts
            .insert(filename.to_string(), states.iter().cloned().collect());
    }

    /// The next `times` searches fail with HTTP `status`.
    pub fn fail_searches(&self, status: u16, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.search_failures.push_back(status);
        }
    }

    /// Puts a transfer in the queue as if an earlier run had enqueued it.
    pub fn seed_queue(&self, transfer: TransferStatus) {
        self.state().queue.push(transfer);
    }

    pub fn searches(&self) -> Vec<String> {
        self.state().searches.clone()
    }

    pub fn enqueued(&self) -> Vec<(String, String)> {
        self.state().enqueued.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    pub fn queue(&self) -> Vec<TransferStatus> {
        self.state().queue.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.state().status_polls
    }
}

#[async_trait]
impl TransferService for FakeService {
    async fn search(&self, query: &str) -> Result<String> {
        let mut state = self.state();
        state.searches.push(query.to_string());
        if let Some(status) = state.search_failures.pop_front() {
            return Err(UpstreamError::http_status("searches", status));
        }
        let id = format!("search-{}", state.searches.len());
        state.search_ids.insert(id.clone(), query.to_string());
        Ok(id)
    }

    async fn search_results(&self, search_id: &str) -> Result<Vec<RawSearchHit>> {
        let state = self.state();
        let hits = state
            .search_ids
            .get(search_id)
            .and_then(|query| state.results.get(query))
            .cloned()
            .unwrap_or_default();
        Ok(hits)
    }

    async fn enqueue_download(
        &self,
        username: &str,
        files: &[EnqueueFile],
    ) -> Result<Option<String>> {
        let mut state = self.state();
        let mut first = None;
        for file in files {
            state.next_id += 1;
            let id = format!("transfer-{}", state.next_id);
            state
                .enqueued
                .push((username.to_string(), file.filename.clone()));
            state.queue.push(TransferStatus {
                id: id.clone(),
                username: username.to_string(),
                filename: file.filename.clone(),
                size: file.size,
                state: TransferState::Requested,
                bytes_transferred: None,
                percent_complete: None,
            });
            first.get_or_insert(id);
        }
        Ok(first)
    }

    async fn download_status(&self, transfer_id: &str) -> Result<Option<TransferStatus>> {
        let mut state = self.state();
        state.status_polls += 1;
        let Some(index) = state.queue.iter().position(|t| t.id == transfer_id) else {
            return Ok(None);
        };
        let filename = state.queue[index].filename.clone();
        let next = state.scripts.get_mut(&filename).and_then(|script| {
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        });
        if let Some(next) = next {
            state.queue[index].state = next;
        }
        Ok(Some(state.queue[index].clone()))
    }

    async fn cancel_download(&self, transfer_id: &str) -> Result<()> {
        let mut state = self.state();
        state.queue.retain(|t| t.id != transfer_id);
        state.cancelled.push(transfer_id.to_string());
        Ok(())
    }

    async fn list_queue(&self) -> Result<Vec<TransferStatus>> {
        Ok(self.state().queue.clone())
    }
}

/// A search hit with the given quality fields.
pub fn hit(
    username: &str,
    filename: &str,
    size: u64,
    bit_depth: Option<u32>,
    sample_rate: Option<u32>,
) -> RawSearchHit {
    RawSearchHit {
        username: username.to_string(),
        filename: filename.to_string(),
        size,
        bit_rate: None,
        bit_depth,
        sample_rate,
        length: None,
    }
}

//! Value types exchanged with the upstream service.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::ResultDescriptor;

/// One file offered by one peer, as the service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSearchHit {
    /// Peer offering the file.
    #[serde(default)]
    pub username: String,
    /// Remote path.
    pub filename: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Bit rate in kbps.
    #[serde(default)]
    pub bit_rate: Option<u32>,
    /// Bits per sample.
    #[serde(default)]
    pub bit_depth: Option<u32>,
    /// Sample rate in Hz.
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Track length in seconds.
    #[serde(default)]
    pub length: Option<u32>,
}

impl From<RawSearchHit> for ResultDescriptor {
    fn from(hit: RawSearchHit) -> Self {
        Self {
            username: hit.username,
            filename: hit.filename,
            size: hit.size,
            bit_rate: hit.bit_rate.filter(|v| *v > 0),
            bit_depth: hit.bit_depth.filter(|v| *v > 0),
            sample_rate: hit.sample_rate.filter(|v| *v > 0),
        }
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// Accepted locally, not yet negotiated with the peer.
    Requested,
    /// Waiting in the remote peer's upload queue.
    QueuedRemote,
    /// Waiting in the local download queue.
    QueuedLocal,
    /// Connection being set up.
    Initializing,
    /// Bytes are flowing.
    InProgress,
    /// Completed successfully.
    Succeeded,
    /// Completed with an error.
    Errored,
    /// Cancelled locally or remotely.
    Cancelled,
    /// Completed by timing out.
    TimedOut,
    /// The peer refused the transfer.
    Rejected,
    /// Anything unrecognized, kept verbatim.
    Other(String),
}

impl TransferState {
    /// Parses a state label leniently.
    ///
    /// Case, spaces, commas and dashes are ignored, so
    /// `"Completed, Succeeded"` and `"Completed-Succeeded"` agree.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let key: String = label
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();

        if key.contains("succeeded") {
            Self::Succeeded
        } else if key.contains("errored") || key.contains("failed") {
            Self::Errored
        } else if key.contains("cancel") || key.contains("aborted") {
            Self::Cancelled
        } else if key.contains("timedout") {
            Self::TimedOut
        } else if key.contains("rejected") {
            Self::Rejected
        } else if key.contains("queued") && key.contains("remote") {
            Self::QueuedRemote
        } else if key.contains("queued") {
            Self::QueuedLocal
        } else if key.contains("inprogress") {
            Self::InProgress
        } else if key.contains("initializing") {
            Self::Initializing
        } else if key.contains("requested") {
            Self::Requested
        } else {
            Self::Other(label.to_string())
        }
    }

    /// Whether no further change will happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    /// Completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Completed unsuccessfully.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Errored | Self::Cancelled | Self::TimedOut | Self::Rejected
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Requested => "Requested",
            Self::QueuedRemote => "Queued-Remote",
            Self::QueuedLocal => "Queued-Local",
            Self::Initializing => "Initializing",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Completed-Succeeded",
            Self::Errored => "Completed-Errored",
            Self::Cancelled => "Completed-Cancelled",
            Self::TimedOut => "Completed-TimedOut",
            Self::Rejected => "Completed-Rejected",
            Self::Other(label) => label,
        };
        write!(f, "{label}")
    }
}

impl<'de> Deserialize<'de> for TransferState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(Self::parse(&label))
    }
}

/// A transfer in the service's download queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    /// Transfer id assigned by the service.
    pub id: String,
    /// Peer the file comes from.
    #[serde(default)]
    pub username: String,
    /// Remote path.
    pub filename: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Current state.
    pub state: TransferState,
    /// Bytes received so far.
    #[serde(default)]
    pub bytes_transferred: Option<u64>,
    /// Progress in percent.
    #[serde(default)]
    pub percent_complete: Option<f64>,
}

impl TransferStatus {
    /// Whether this transfer is for `username`'s `filename`.
    #[must_use]
    pub fn matches(&self, username: &str, filename: &str) -> bool {
        self.username == username && self.filename == filename
    }
}

/// File to enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueFile {
    /// Remote path.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
}

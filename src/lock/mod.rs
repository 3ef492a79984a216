//! Single-instance coordination through a lock file.
//!
//! Acquisition takes an exclusive, non-blocking advisory lock (`fs2`) on the
//! lock file and writes a [`LockRecord`] into it. Before trying, an existing
//! file is checked for staleness and removed when any of these hold:
//!
//! 1. its content does not parse
//! 2. it is older than the lock timeout
//! 3. the recorded PID is not a live process
//! 4. the live process's command line does not mention the process
//!    signature, the executable name by default (skipped when the command
//!    line cannot be read)
//!
//! A stale-looking file is left alone while another handle still holds its
//! advisory lock. The tag written into the record is informational and plays
//! no part in staleness.
//!
//! Release only deletes the file when the recorded PID is still ours;
//! [`ProcessLock::force_release`] skips that check.

mod inspector;
mod record;

pub use inspector::{ProcessInspector, SystemProcessInspector, hostname};
pub use record::LockRecord;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::{DEFAULT_LOCK_TIMEOUT, DEFAULT_PROCESS_TAG};

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Filesystem failure on the lock file.
    #[error("lock file {path}: {source}")]
    Io {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Another live instance holds the lock.
    #[error("another instance is running (pid {pid}, lock held for {age_secs}s)")]
    AlreadyLocked {
        /// Holder PID, 0 when the lock file could not be read.
        pid: u32,
        /// Seconds since the holder acquired the lock.
        age_secs: u64,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Why an existing lock file is considered abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// Content could not be parsed.
    Unreadable,
    /// Older than the lock timeout.
    Expired {
        /// Age in seconds.
        age_secs: u64,
    },
    /// The recorded process does not exist.
    DeadProcess {
        /// Recorded PID.
        pid: u32,
    },
    /// The recorded PID belongs to an unrelated program.
    ForeignProcess {
        /// Recorded PID.
        pid: u32,
        /// That process's command line.
        command_line: String,
    },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable => write!(f, "unreadable lock file"),
            Self::Expired { age_secs } => write!(f, "lock is {age_secs}s old"),
            Self::DeadProcess { pid } => write!(f, "pid {pid} is not running"),
            Self::ForeignProcess { pid, command_line } => {
                write!(f, "pid {pid} is an unrelated process ({command_line})")
            }
        }
    }
}

/// File-based mutual exclusion with staleness recovery.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    tag: String,
    signature: String,
    timeout: Duration,
    pid: u32,
    clock: Arc<dyn Clock>,
    inspector: Arc<dyn ProcessInspector>,
    held: Mutex<Option<File>>,
}

impl ProcessLock {
    /// Creates a lock for `path` owned by the current process.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            tag: DEFAULT_PROCESS_TAG.to_string(),
            signature: default_signature(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            pid: std::process::id(),
            clock,
            inspector: Arc::new(SystemProcessInspector),
            held: Mutex::new(None),
        }
    }

    /// Sets the process tag written to lock files.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Sets the text a live holder's command line must contain.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Sets the age after which a lock file is stale.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the process inspector.
    #[must_use]
    pub fn with_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Overrides the PID this lock writes and checks ownership against.
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this instance currently holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Tries to take the lock without blocking.
    ///
    /// Returns `false` when another live holder has it, either by a fresh
    /// record naming a matching process or by the advisory file lock. A stale
    /// lock file is removed first. Calling this while already holding the lock returns
    /// `true`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the file cannot be opened or written.
    #[instrument(skip(self), fields(path = %self.path.display(), pid = self.pid))]
    pub fn acquire(&self) -> Result<bool, LockError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.is_some() {
            return Ok(true);
        }

        if let Some(reason) = self.stale_reason() {
            if self.is_file_lock_contended() {
                warn!(%reason, "lock file looks stale but its holder still has the file lock");
                return Ok(false);
            }
            warn!(%reason, "removing stale lock file");
            remove_if_exists(&self.path)?;
        } else if let Some(record) = self.get_lock_info()
            && record.pid != self.pid
        {
            debug!(holder = record.pid, "lock file names a live holder");
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| LockError::io(&self.path, e))?;

        if let Err(error) = file.try_lock_exclusive() {
            if error.kind() == fs2::lock_contended_error().kind() {
                debug!("lock is held by another process");
                return Ok(false);
            }
            return Err(LockError::io(&self.path, error));
        }

        let record = LockRecord {
            pid: self.pid,
            timestamp: self.clock.unix_timestamp(),
            hostname: hostname(),
            tag: self.tag.clone(),
        };
        if let Err(error) = write_record(&mut file, &record) {
            let _ = FileExt::unlock(&file);
            return Err(LockError::io(&self.path, error));
        }

        info!("process lock acquired");
        *held = Some(file);
        Ok(true)
    }

    /// Acquires the lock or reports the competing holder.
    ///
    /// The returned guard releases the lock when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::AlreadyLocked`] on contention, or
    /// [`LockError::Io`] on filesystem failure.
    pub fn acquire_guard(&self) -> Result<LockGuard<'_>, LockError> {
        if self.acquire()? {
            return Ok(LockGuard { lock: self });
        }

        let now = self.clock.unix_timestamp();
        let (pid, age_secs) = self
            .get_lock_info()
            .map_or((0, 0), |record| (record.pid, record.age_secs(now)));
        Err(LockError::AlreadyLocked { pid, age_secs })
    }

    /// Releases a lock this instance holds.
    ///
    /// The file is deleted only if it still names our PID. Returns whether
    /// the file was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the file cannot be deleted.
    #[instrument(skip(self), fields(path = %self.path.display(), pid = self.pid))]
    pub fn release(&self) -> Result<bool, LockError> {
        let Some(file) = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!("release called without holding the lock");
            return Ok(false);
        };

        let owner = self.get_lock_info().map(|record| record.pid);
        let removed = if owner == Some(self.pid) {
            remove_if_exists(&self.path)?
        } else {
            warn!(?owner, "lock file is no longer ours, leaving it in place");
            false
        };

        let _ = FileExt::unlock(&file);
        if removed {
            info!("process lock released");
        }
        Ok(removed)
    }

    /// Whether a live, non-stale holder (possibly us) has the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.is_held()
            || (self.path.exists()
                && (self.stale_reason().is_none() || self.is_file_lock_contended()))
    }

    /// Whether another open handle holds the advisory lock on the file.
    #[must_use]
    pub fn is_file_lock_contended(&self) -> bool {
        let Ok(file) = File::open(&self.path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(error) => error.kind() == fs2::lock_contended_error().kind(),
        }
    }

    /// Parsed lock file, or `None` when missing or unreadable.
    #[must_use]
    pub fn get_lock_info(&self) -> Option<LockRecord> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| LockRecord::parse(&text))
    }

    /// Deletes the lock file regardless of owner. Returns whether a file existed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the file exists but cannot be deleted.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn force_release(&self) -> Result<bool, LockError> {
        let held = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let removed = remove_if_exists(&self.path)?;
        if let Some(file) = held {
            let _ = FileExt::unlock(&file);
        }
        if removed {
            warn!("lock file forcibly removed");
        }
        Ok(removed)
    }

    /// Whether the current lock file is stale. A missing file is not stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale_reason().is_some()
    }

    /// Why the current lock file is stale, if it is.
    #[must_use]
    pub fn stale_reason(&self) -> Option<StaleReason> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
            Err(_) => return Some(StaleReason::Unreadable),
        };
        let Some(record) = LockRecord::parse(&text) else {
            return Some(StaleReason::Unreadable);
        };

        let age_secs = record.age_secs(self.clock.unix_timestamp());
        if age_secs > self.timeout.as_secs() {
            return Some(StaleReason::Expired { age_secs });
        }
        if !self.inspector.is_alive(record.pid) {
            return Some(StaleReason::DeadProcess { pid: record.pid });
        }
        if let Some(command_line) = self.inspector.command_line(record.pid)
            && !command_line.contains(&self.signature)
        {
            return Some(StaleReason::ForeignProcess {
                pid: record.pid,
                command_line,
            });
        }
        None
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if self.is_held()
            && let Err(error) = self.release()
        {
            warn!(%error, "failed to release process lock on drop");
        }
    }
}

/// Holds a [`ProcessLock`] until dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a ProcessLock,
}

impl LockGuard<'_> {
    /// The guarded lock.
    #[must_use]
    pub fn lock(&self) -> &ProcessLock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.lock.release() {
            warn!(%error, "failed to release process lock");
        }
    }
}

fn default_signature() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| DEFAULT_PROCESS_TAG.to_string())
}

fn write_record(file: &mut File, record: &LockRecord) -> io::Result<()> {
    file.set_len(0)?;
    file.write_all(record.to_string().as_bytes())?;
    file.sync_all()
}

fn remove_if_exists(path: &Path) -> Result<bool, LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(LockError::io(path, error)),
    }
}

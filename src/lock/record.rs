//! Lock file contents.

use std::fmt;

/// Who holds the lock, as written in the lock file.
///
/// The file holds four newline-separated fields: PID, Unix timestamp,
/// hostname and process tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Holder process id.
    pub pid: u32,
    /// Unix seconds when the lock was taken.
    pub timestamp: i64,
    /// Host the holder runs on.
    pub hostname: String,
    /// Process-kind tag of the holder.
    pub tag: String,
}

impl LockRecord {
    /// Parses lock file text, or `None` if any field is missing or malformed.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines().map(str::trim);
        let pid = lines.next()?.parse().ok()?;
        let timestamp = lines.next()?.parse().ok()?;
        let hostname = lines.next()?.to_string();
        let tag = lines.next()?.to_string();
        if tag.is_empty() {
            return None;
        }
        Some(Self {
            pid,
            timestamp,
            hostname,
            tag,
        })
    }

    /// Seconds since the lock was taken; zero for timestamps in the future.
    #[must_use]
    pub fn age_secs(&self, now: i64) -> u64 {
        u64::try_from(now.saturating_sub(self.timestamp)).unwrap_or(0)
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.pid)?;
        writeln!(f, "{}", self.timestamp)?;
        writeln!(f, "{}", self.hostname)?;
        writeln!(f, "{}", self.tag)
    }
}

//! Operating-system process introspection behind a trait.

/// Answers liveness and identity questions about other processes.
pub trait ProcessInspector: Send + Sync + std::fmt::Debug {
    /// Whether a process with this id exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// The process's command line, or `None` when it cannot be read.
    fn command_line(&self, pid: u32) -> Option<String>;
}

/// Real process table.
///
/// On Unix liveness is probed with signal 0 and command lines come from
/// `/proc` when available. Elsewhere every pid is reported alive and no
/// command line is available, leaving the lock timeout as the only recovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessInspector;

impl ProcessInspector for SystemProcessInspector {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check.
        let result = unsafe { libc::kill(pid, 0) };
        result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }

    fn command_line(&self, pid: u32) -> Option<String> {
        let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let text: String = String::from_utf8_lossy(&raw)
            .split('\0')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() { None } else { Some(text) }
    }
}

/// Name of this host, or `"unknown"`.
#[must_use]
pub fn hostname() -> String {
    system_hostname()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buffer = [0_u8; 256];
    // SAFETY: the buffer is valid for `buffer.len()` bytes and outlives the call.
    let result = unsafe { libc::gethostname(buffer.as_mut_ptr().cast(), buffer.len()) };
    if result != 0 {
        return None;
    }
    let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
    Some(String::from_utf8_lossy(&buffer[..end]).into_owned())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(SystemProcessInspector.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_out_of_range_pids_are_dead() {
        assert!(!SystemProcessInspector.is_alive(0));
        assert!(!SystemProcessInspector.is_alive(u32::MAX));
        assert!(!SystemProcessInspector.is_alive(0x7fff_ffff));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_command_line_is_readable() {
        let cmd = SystemProcessInspector
            .command_line(std::process::id())
            .unwrap_or_default();
        assert!(!cmd.is_empty());
    }

    #[test]
    fn test_hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }
}

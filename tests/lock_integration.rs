//! Integration tests for the single-instance process lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use trackhound_core::lock::{ProcessInspector, StaleReason, SystemProcessInspector};
use trackhound_core::{LockError, LockRecord, ManualClock, ProcessLock};

const NOW: u64 = 2_000_000;

/// Fixed process table: PID to command line.
#[derive(Debug, Default)]
struct ProcessTable {
    alive: HashMap<u32, String>,
}

impl ProcessTable {
    fn running(pids: &[(u32, &str)]) -> Arc<Self> {
        Arc::new(Self {
            alive: pids
                .iter()
                .map(|(pid, cmd)| (*pid, (*cmd).to_string()))
                .collect(),
        })
    }
}

impl ProcessInspector for ProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.contains_key(&pid)
    }

    fn command_line(&self, pid: u32) -> Option<String> {
        self.alive.get(&pid).cloned()
    }
}

fn lock_for(path: &std::path::Path, pid: u32, table: &Arc<ProcessTable>) -> ProcessLock {
    let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(NOW)));
    ProcessLock::new(path, clock)
        .with_pid(pid)
        .with_signature("trackhound")
        .with_inspector(table.clone())
        .with_timeout(Duration::from_secs(3600))
}

fn write_lock_file(path: &std::path::Path, pid: u32, timestamp: i64, tag: &str) {
    let record = LockRecord {
        pid,
        timestamp,
        hostname: "host".to_string(),
        tag: tag.to_string(),
    };
    std::fs::write(path, record.to_string()).unwrap();
}

#[test]
fn test_two_live_instances_exclude_each_other() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    let table = ProcessTable::running(&[
        (100, "/usr/bin/trackhound run a.txt"),
        (200, "/usr/bin/trackhound run b.txt"),
    ]);
    let first = lock_for(&path, 100, &table);
    let second = lock_for(&path, 200, &table);

    assert!(first.acquire().unwrap());
    assert!(!second.acquire().unwrap());
    match second.acquire_guard() {
        Err(LockError::AlreadyLocked { pid, .. }) => assert_eq!(pid, 100),
        other => panic!("expected AlreadyLocked, got {other:?}"),
    }
    assert!(second.is_locked());

    assert!(first.release().unwrap());
    assert!(second.acquire().unwrap());
    assert_eq!(second.get_lock_info().unwrap().pid, 200);
}

#[test]
fn test_dead_holder_is_taken_over() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    write_lock_file(&path, 4242, i64::try_from(NOW).unwrap() - 10, "trackhound");
    let table = ProcessTable::running(&[(200, "trackhound run")]);
    let lock = lock_for(&path, 200, &table);

    assert_eq!(lock.stale_reason(), Some(StaleReason::DeadProcess { pid: 4242 }));
    assert!(!lock.is_locked());
    assert!(lock.acquire().unwrap());
    assert_eq!(lock.get_lock_info().unwrap().pid, 200);
}

#[test]
fn test_expired_holder_is_taken_over() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    write_lock_file(&path, 100, i64::try_from(NOW).unwrap() - 7200, "trackhound");
    let table = ProcessTable::running(&[(100, "trackhound run"), (200, "trackhound run")]);
    let lock = lock_for(&path, 200, &table);

    assert!(matches!(
        lock.stale_reason(),
        Some(StaleReason::Expired { age_secs: 7200 })
    ));
    assert!(lock.acquire().unwrap());
}

#[test]
fn test_reused_pid_of_other_program_is_stale() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    write_lock_file(&path, 100, i64::try_from(NOW).unwrap(), "trackhound");
    let table = ProcessTable::running(&[(100, "/usr/sbin/sshd -D")]);
    let lock = lock_for(&path, 200, &table);

    assert!(lock.is_stale());
    assert!(lock.acquire().unwrap());
}

#[test]
fn test_guard_removes_file_when_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    let table = ProcessTable::running(&[(100, "trackhound")]);
    let lock = lock_for(&path, 100, &table);

    {
        let _guard = lock.acquire_guard().unwrap();
        assert!(path.exists());
        assert!(lock.is_held());
    }
    assert!(!path.exists());
    assert!(!lock.is_held());
}

#[test]
fn test_force_release_removes_live_holder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    write_lock_file(&path, 100, i64::try_from(NOW).unwrap(), "trackhound");
    let table = ProcessTable::running(&[(100, "trackhound run")]);
    let operator = lock_for(&path, 300, &table);

    assert!(operator.is_locked());
    assert!(operator.force_release().unwrap());
    assert!(!path.exists());
    assert!(!operator.force_release().unwrap());
}

#[test]
fn test_garbage_lock_file_is_stale() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trackhound.lock");
    std::fs::write(&path, "not a lock\n").unwrap();
    let table = ProcessTable::running(&[]);
    let lock = lock_for(&path, 100, &table);

    assert_eq!(lock.stale_reason(), Some(StaleReason::Unreadable));
    assert!(lock.get_lock_info().is_none());
    assert!(lock.acquire().unwrap());
}

// ==================== Real Process Table ====================

fn system_lock(path: &std::path::Path, pid: u32) -> ProcessLock {
    let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(NOW)));
    ProcessLock::new(path, clock)
        .with_pid(pid)
        .with_tag("nightly")
        .with_inspector(Arc::new(SystemProcessInspector))
}

#[cfg(target_os = "linux")]
#[test]
fn test_custom_tag_live_holder_is_not_stale() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.lock");
    write_lock_file(&path, std::process::id(), i64::try_from(NOW).unwrap(), "nightly");

    let contender = system_lock(&path, 0x7fff_fff0);
    assert_eq!(contender.stale_reason(), None);
    assert!(contender.is_locked());
    assert!(!contender.acquire().unwrap());
    assert_eq!(contender.get_lock_info().unwrap().pid, std::process::id());
}

#[cfg(target_os = "linux")]
#[test]
fn test_custom_tag_instances_exclude_each_other() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.lock");

    let first = system_lock(&path, std::process::id());
    let second = system_lock(&path, 0x7fff_fff0);
    assert!(first.acquire().unwrap());
    assert_eq!(second.stale_reason(), None);
    assert!(matches!(
        second.acquire_guard(),
        Err(LockError::AlreadyLocked { .. })
    ));

    assert!(first.release().unwrap());
    assert!(second.acquire().unwrap());
}

//! `lock-status` and `unlock`.

use anyhow::{Result, bail};
use trackhound_core::SystemClock;
use trackhound_core::clock::Clock;

use super::process_lock;
use crate::app_config::Settings;
use crate::cli::UnlockArgs;
use crate::output;

pub fn run_lock_status_command(settings: &Settings) -> Result<()> {
    let lock = process_lock(settings);
    let path = lock.path().display();
    if !lock.path().exists() {
        println!("Unlocked ({path})");
        return Ok(());
    }

    match lock.get_lock_info() {
        Some(record) => println!(
            "{}",
            output::render_lock_holder(&record, SystemClock.unix_timestamp())
        ),
        None => println!("Lock file {path} is unreadable"),
    }
    match lock.stale_reason() {
        Some(reason) if lock.is_file_lock_contended() => {
            println!("Active ({reason}, but the file lock is still held)");
        }
        Some(reason) => println!("Stale: {reason}; the next run will take over."),
        None => println!("Active"),
    }
    Ok(())
}

pub fn run_unlock_command(settings: &Settings, args: &UnlockArgs) -> Result<()> {
    let lock = process_lock(settings);
    let path = lock.path().display();
    if !args.force && lock.is_locked() {
        bail!("Lock {path} is held by a running instance; pass --force to remove it anyway");
    }
    if lock.force_release()? {
        println!("Removed lock file {path}");
    } else {
        println!("No lock file at {path}");
    }
    Ok(())
}

//! CLI command handlers.

mod check;
mod history;
mod lock;
mod run;

pub use check::run_check_command;
pub use history::{run_cache_cleanup_command, run_history_command, run_stats_command};
pub use lock::{run_lock_status_command, run_unlock_command};
pub use run::run_playlist_command;

use std::sync::Arc;

use anyhow::{Context, Result};
use trackhound_core::{Clock, ProcessLock, Store, SystemClock};

use crate::app_config::Settings;

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

async fn open_store(settings: &Settings) -> Result<Store> {
    if let Some(parent) = settings.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    Store::open(&settings.db_path, system_clock())
        .await
        .with_context(|| format!("Failed to open database '{}'", settings.db_path.display()))
}

fn process_lock(settings: &Settings) -> ProcessLock {
    ProcessLock::new(&settings.lock_file, system_clock())
        .with_tag(&settings.pipeline.process_tag)
        .with_timeout(settings.pipeline.lock_timeout)
}

//! Read-only store commands: `stats`, `history`, `cache-cleanup`.

use anyhow::Result;
use trackhound_core::DownloadStatus;

use super::open_store;
use crate::app_config::Settings;
use crate::cli::HistoryArgs;
use crate::output;

pub async fn run_stats_command(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let counts = store.get_stats().await?;
    for status in DownloadStatus::ALL {
        println!(
            "{:<10} {}",
            status.as_str(),
            counts.get(&status).copied().unwrap_or(0)
        );
    }
    println!("{:<10} {}", "CACHED", store.cache_entry_count().await?);
    Ok(())
}

pub async fn run_history_command(settings: &Settings, args: &HistoryArgs) -> Result<()> {
    let store = open_store(settings).await?;
    let rows = store
        .recent_downloads(usize::from(args.limit), args.status)
        .await?;
    if rows.is_empty() {
        println!("No history rows matched the current filters.");
        return Ok(());
    }
    let width = output::terminal_width();
    for row in &rows {
        println!("{}", output::render_history_row(row, width));
    }
    Ok(())
}

pub async fn run_cache_cleanup_command(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let removed = store.cleanup_expired_cache().await?;
    println!("Removed {removed} expired cache entries.");
    Ok(())
}

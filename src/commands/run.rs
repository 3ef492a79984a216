//! `run`: process a playlist under the process lock.

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use trackhound_core::{PlaylistOrchestrator, SlskdService};

use super::{open_store, process_lock, system_clock};
use crate::ProcessExit;
use crate::app::{exit_handler, progress, terminal};
use crate::app_config::Settings;
use crate::cli::RunArgs;
use crate::output;

pub async fn run_playlist_command(
    settings: &Settings,
    args: &RunArgs,
    quiet: bool,
) -> Result<ProcessExit> {
    let service = SlskdService::new(&settings.upstream_url, settings.upstream_api_key.clone())
        .with_context(|| format!("Invalid upstream URL '{}'", settings.upstream_url))?;
    let store = open_store(settings).await?;
    if let Some(parent) = settings.lock_file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let lock = process_lock(settings);

    let bar = progress::line_progress_bar(terminal::should_use_progress(
        std::io::stderr().is_terminal(),
        quiet,
        args.no_progress,
        terminal::is_dumb_terminal(),
    ));
    let bar_for_updates = bar.clone();
    let orchestrator = PlaylistOrchestrator::new(
        store,
        Arc::new(service),
        system_clock(),
        settings.pipeline.clone(),
    )
    .with_progress(move |report| progress::report_line(&bar_for_updates, report));

    let cancel = orchestrator.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current line");
            cancel.cancel();
        }
    });

    info!(
        playlist = %args.playlist.display(),
        upstream = %settings.upstream_url,
        "Starting run"
    );
    let result = orchestrator.run_locked(&lock, &args.playlist).await;
    bar.finish_and_clear();
    let report = result
        .with_context(|| format!("Run aborted for '{}'", args.playlist.display()))?;

    if !quiet {
        println!("{}", output::render_run_summary(&report));
    }
    Ok(exit_handler::determine_exit_outcome(&report.stats))
}

//! CLI entry point for trackhound.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app;
mod app_config;
mod cli;
mod commands;
mod output;

use app::terminal;
use app_config::CliOverrides;
use cli::{Cli, Command};

/// Process exit outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything succeeded.
    Success,
    /// Some lines failed.
    Partial,
    /// Every line failed, or the run could not start.
    Failure,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    terminal::init_tracing(terminal::default_level(cli.verbose, cli.quiet));
    debug!(?cli, "CLI arguments parsed");

    match run(cli).await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}

async fn run(cli: Cli) -> Result<ProcessExit> {
    let mut overrides = CliOverrides {
        db_path: cli.db.clone(),
        lock_file: cli.lock_file.clone(),
        ..CliOverrides::default()
    };
    if let Command::Run(args) = &cli.command {
        overrides.upstream_url.clone_from(&args.upstream_url);
        overrides.download_dir.clone_from(&args.download_dir);
        overrides.timeout_policy = args.timeout_policy;
    }
    let settings = app_config::load_settings(cli.config.as_deref(), overrides)?;
    debug!(
        config = ?settings.config_path,
        db = %settings.db_path.display(),
        lock = %settings.lock_file.display(),
        "Settings resolved"
    );

    match &cli.command {
        Command::Run(args) => {
            return commands::run_playlist_command(&settings, args, cli.quiet).await;
        }
        Command::Check(args) => commands::run_check_command(&settings, args).await?,
        Command::Stats => commands::run_stats_command(&settings).await?,
        Command::History(args) => commands::run_history_command(&settings, args).await?,
        Command::CacheCleanup => commands::run_cache_cleanup_command(&settings).await?,
        Command::LockStatus => commands::run_lock_status_command(&settings)?,
        Command::Unlock(args) => commands::run_unlock_command(&settings, args)?,
    }
    Ok(ProcessExit::Success)
}

//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use trackhound_core::{DownloadStatus, TimeoutPolicy};

/// Fetch the tracks listed in a playlist file from a peer-to-peer service.
///
/// Each run works through the playlist, skips tracks that were already
/// downloaded, and leaves only unresolved lines in the file for next time.
#[derive(Parser, Debug)]
#[command(name = "trackhound")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/trackhound/config.toml)
    #[arg(long, value_name = "PATH", env = "TRACKHOUND_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Download history database
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Single-instance lock file
    #[arg(long = "lock-file", value_name = "PATH", global = true)]
    pub lock_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process a playlist file and rewrite it with the unresolved lines
    Run(RunArgs),
    /// Report whether a line would be skipped as a duplicate
    Check(CheckArgs),
    /// Show download counts per status and the cache size
    Stats,
    /// List recent download records
    History(HistoryArgs),
    /// Remove expired search cache entries
    CacheCleanup,
    /// Show who holds the process lock
    LockStatus,
    /// Remove the process lock file
    Unlock(UnlockArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Playlist file, one `Artist - Album - Track` per line
    #[arg(value_name = "PLAYLIST")]
    pub playlist: PathBuf,

    /// Base URL of the transfer service
    #[arg(long, value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Directory where the transfer service stores completed files
    #[arg(long, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// What to record for transfers still running at the timeout
    #[arg(long, value_name = "POLICY", value_parser = parse_timeout_policy)]
    pub timeout_policy: Option<TimeoutPolicy>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for `check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Playlist line to check
    #[arg(value_name = "LINE")]
    pub line: String,

    /// Candidate remote filename to check as well
    #[arg(long, value_name = "FILENAME")]
    pub filename: Option<String>,
}

/// Arguments for `history`.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum rows to show (1-10000)
    #[arg(short = 'n', long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..=10000))]
    pub limit: u16,

    /// Only show rows with this status (success, error, not_found)
    #[arg(long, value_parser = parse_status)]
    pub status: Option<DownloadStatus>,
}

/// Arguments for `unlock`.
#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Remove the lock even if its holder may still be running
    #[arg(long)]
    pub force: bool,
}

fn parse_timeout_policy(value: &str) -> Result<TimeoutPolicy, String> {
    value.parse().map_err(|e: trackhound_core::ConfigError| e.to_string())
}

fn parse_status(value: &str) -> Result<DownloadStatus, String> {
    value.parse()
}
